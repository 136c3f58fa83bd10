//! Collection combinators: wait-for-all and race-to-first-settlement.
//!
//! Both coerce every element through [`Promise::resolve`], so plain values,
//! promises, and thenables mix freely, and both lean on the settle guard for
//! their first-wins behavior instead of tracking extra state.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::promise::{Promise, ReasonObserver, ValueObserver};
use crate::resolution::Resolution;

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Fulfills with every element's value, in input order, once all of them
    /// fulfill; rejects with the first rejection among them.
    ///
    /// Empty input fulfills with an empty vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{queue, Promise};
    ///
    /// let all = Promise::<i32, String>::all([1, 2, 3]);
    /// queue::drain();
    /// let values = all.value().unwrap();
    /// assert_eq!(values.iter().map(|v| **v).collect::<Vec<_>>(), [1, 2, 3]);
    /// ```
    pub fn all<I>(items: I) -> Promise<Vec<Rc<T>>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let entries: Vec<Promise<T, E>> = items
            .into_iter()
            .map(|item| Promise::resolve(item))
            .collect();
        let combined: Promise<Vec<Rc<T>>, E> = Promise::unsettled();
        let total = entries.len();
        if total == 0 {
            combined.fulfill(Rc::new(Vec::new()));
            return combined;
        }
        let slots: Rc<RefCell<Vec<Option<Rc<T>>>>> = Rc::new(RefCell::new(vec![None; total]));
        let filled = Rc::new(Cell::new(0usize));
        for (index, entry) in entries.iter().enumerate() {
            let on_value: ValueObserver<T> = {
                let combined = combined.clone();
                let slots = slots.clone();
                let filled = filled.clone();
                Box::new(move |value| {
                    slots.borrow_mut()[index] = Some(value);
                    filled.set(filled.get() + 1);
                    if filled.get() == total {
                        let values: Vec<Rc<T>> = slots
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.expect("counter equals total only when every slot is filled"))
                            .collect();
                        combined.fulfill(Rc::new(values));
                    }
                })
            };
            let on_reason: ReasonObserver<E> = {
                let combined = combined.clone();
                Box::new(move |reason| combined.reject_with(reason))
            };
            entry.observe(on_value, on_reason);
        }
        combined
    }

    /// Settles with whichever element settles first, value or rejection;
    /// every later settlement is a no-op.
    ///
    /// Empty input stays pending forever.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{queue, Promise, Resolution};
    ///
    /// let winner = Promise::<i32, String>::race([
    ///     Resolution::from(Promise::resolve(5)),
    ///     Resolution::from(9),
    /// ]);
    /// queue::drain();
    /// assert_eq!(winner.value().map(|v| *v), Some(9));
    /// ```
    pub fn race<I>(items: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let entries: Vec<Promise<T, E>> = items
            .into_iter()
            .map(|item| Promise::resolve(item))
            .collect();
        let winner = Promise::unsettled();
        for entry in entries.iter() {
            let on_value: ValueObserver<T> = {
                let winner = winner.clone();
                Box::new(move |value| winner.fulfill(value))
            };
            let on_reason: ReasonObserver<E> = {
                let winner = winner.clone();
                Box::new(move |reason| winner.reject_with(reason))
            };
            entry.observe(on_value, on_reason);
        }
        winner
    }
}
