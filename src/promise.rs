//! The promise state machine and the chaining operator.
//!
//! A `Promise<T, E>` is a shared handle onto a single state cell. It starts
//! `Pending` with two observer queues and moves exactly once to `Fulfilled`
//! or `Rejected`; the transition itself is a deferred task, so the first
//! settle attempt to *run* wins and every later one is a no-op. Settled
//! outcomes are shared (`Rc<T>` / `Rc<Rejection<E>>`) because any number of
//! observers may read them.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::queue;
use crate::resolution::{self, Resolution};
use crate::Rejection;

/// A fulfillment handler for [`Promise::then`].
///
/// Returning `Ok` routes the resolution into the derived promise; returning
/// `Err` rejects the derived promise, the Rust rendition of a handler that
/// throws.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(Rc<T>) -> Result<Resolution<T, E>, E>>;

/// A rejection handler for [`Promise::then`]. Same return contract as
/// [`OnFulfilled`].
pub type OnRejected<T, E> = Box<dyn FnOnce(Rc<Rejection<E>>) -> Result<Resolution<T, E>, E>>;

pub(crate) type ValueObserver<T> = Box<dyn FnOnce(Rc<T>)>;
pub(crate) type ReasonObserver<E> = Box<dyn FnOnce(Rc<Rejection<E>>)>;

enum State<T, E> {
    Pending {
        on_value: Vec<ValueObserver<T>>,
        on_reason: Vec<ReasonObserver<E>>,
    },
    Fulfilled(Rc<T>),
    Rejected(Rc<Rejection<E>>),
}

/// A one-shot settleable value: pending until fulfilled or rejected, settled
/// forever after.
///
/// Cloning is cheap and yields another handle onto the same state; this is
/// what lets `then` subscriptions, adoptions, and combinators all observe one
/// settlement.
///
/// # Examples
///
/// ```
/// use promise_aplus::{queue, Promise};
///
/// let greeting = Promise::<String, String>::new(|resolver| {
///     resolver.resolve("hi".to_string());
///     Ok(())
/// });
/// queue::drain();
/// assert_eq!(greeting.value().map(|v| v.to_string()), Some("hi".to_string()));
/// ```
pub struct Promise<T, E> {
    inner: Rc<RefCell<State<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The settle handle passed to a promise's setup callback.
///
/// Clonable; both methods take `&self`. Calls after the first settlement has
/// run are no-ops, which is what makes duplicate and racing settle attempts
/// safe.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Resolver<T, E> {
    /// Resolves the promise with `value`.
    ///
    /// A plain value schedules a fulfillment; a `Promise` is adopted (this
    /// promise mirrors its eventual outcome rather than fulfilling with the
    /// promise itself); a [`Thenable`](crate::Thenable) is subscribed.
    pub fn resolve(&self, value: impl Into<Resolution<T, E>>) {
        resolution::resolve(&self.promise, value.into());
    }

    /// Schedules a rejection with `reason`.
    pub fn reject(&self, reason: E) {
        self.promise.reject_with(Rc::new(Rejection::Reason(reason)));
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Creates a promise and immediately, synchronously runs `setup` with its
    /// [`Resolver`].
    ///
    /// An `Err` returned from `setup` rejects the promise, equivalent to
    /// calling [`Resolver::reject`] as the last thing before returning. It is
    /// a no-op if `setup` already settled the promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{queue, Promise, Rejection};
    ///
    /// let failed = Promise::<i32, String>::new(|_resolver| Err("boom".to_string()));
    /// queue::drain();
    /// assert_eq!(*failed.reason().unwrap(), Rejection::Reason("boom".to_string()));
    /// ```
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let promise = Self::unsettled();
        let resolver = Resolver {
            promise: promise.clone(),
        };
        if let Err(reason) = setup(resolver) {
            promise.reject_with(Rc::new(Rejection::Reason(reason)));
        }
        promise
    }

    /// A promise already on its way to fulfillment with `value`, through the
    /// standard resolution path. `Promise::resolve(other_promise)` therefore
    /// adopts `other_promise` instead of double-wrapping it.
    pub fn resolve(value: impl Into<Resolution<T, E>>) -> Self {
        Self::new(|resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// A promise already on its way to rejection with `reason`.
    pub fn reject(reason: E) -> Self {
        Self::new(|resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Derives a new promise from this one and an optional handler pair.
    ///
    /// The returned promise is always a new object. Handlers never run
    /// synchronously inside this call, even when the receiver is already
    /// settled. A `None` fulfillment handler passes the value through
    /// unchanged; a `None` rejection handler propagates the rejection
    /// unchanged. A handler's `Ok` result goes through the resolution
    /// procedure (so returning a promise chains it in); its `Err` rejects the
    /// derived promise and leaves the receiver untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{queue, Promise};
    ///
    /// let recovered = Promise::<i32, String>::reject("oops".to_string()).then(
    ///     None,
    ///     Some(Box::new(|_reason| Ok(0.into()))),
    /// );
    /// queue::drain();
    /// assert_eq!(recovered.value().map(|v| *v), Some(0));
    /// ```
    pub fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        let derived = Promise::unsettled();
        let value_arm: ValueObserver<T> = {
            let derived = derived.clone();
            Box::new(move |value| match on_fulfilled {
                Some(handler) => match handler(value) {
                    Ok(next) => resolution::resolve(&derived, next),
                    Err(raised) => derived.reject_with(Rc::new(Rejection::Reason(raised))),
                },
                None => derived.fulfill(value),
            })
        };
        let reason_arm: ReasonObserver<E> = {
            let derived = derived.clone();
            Box::new(move |reason| match on_rejected {
                Some(handler) => match handler(reason) {
                    Ok(next) => resolution::resolve(&derived, next),
                    Err(raised) => derived.reject_with(Rc::new(Rejection::Reason(raised))),
                },
                None => derived.reject_with(reason),
            })
        };
        self.observe(value_arm, reason_arm);
        derived
    }

    /// `then(None, Some(on_rejected))`.
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(Rc<Rejection<E>>) -> Result<Resolution<T, E>, E> + 'static,
    ) -> Promise<T, E> {
        self.then(None, Some(Box::new(on_rejected)))
    }

    /// Runs `callback` once when this promise settles, on either branch, and
    /// passes the outcome through to the derived promise unchanged.
    pub fn finally(&self, callback: impl FnOnce() + 'static) -> Promise<T, E> {
        let callback: Rc<Cell<Option<Box<dyn FnOnce()>>>> =
            Rc::new(Cell::new(Some(Box::new(callback))));
        let derived = Promise::unsettled();
        let value_arm: ValueObserver<T> = {
            let derived = derived.clone();
            let callback = callback.clone();
            Box::new(move |value| {
                if let Some(callback) = callback.take() {
                    callback();
                }
                derived.fulfill(value);
            })
        };
        let reason_arm: ReasonObserver<E> = {
            let derived = derived.clone();
            Box::new(move |reason| {
                if let Some(callback) = callback.take() {
                    callback();
                }
                derived.reject_with(reason);
            })
        };
        self.observe(value_arm, reason_arm);
        derived
    }

    /// True while neither settle task has run.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.inner.borrow(), State::Pending { .. })
    }

    /// The fulfillment value, if settled on that branch.
    pub fn value(&self) -> Option<Rc<T>> {
        match &*self.inner.borrow() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection, if settled on that branch.
    pub fn reason(&self) -> Option<Rc<Rejection<E>>> {
        match &*self.inner.borrow() {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub(crate) fn unsettled() -> Self {
        Self {
            inner: Rc::new(RefCell::new(State::Pending {
                on_value: Vec::new(),
                on_reason: Vec::new(),
            })),
        }
    }

    /// Whether two handles share one state cell. Used by the resolution
    /// procedure's self-adoption check.
    pub(crate) fn shares_state_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Schedules the transition to `Fulfilled`.
    ///
    /// The pending check happens when the deferred task runs, not here; that
    /// is what makes the first settle attempt in queue order win and every
    /// later one a no-op. Observers queued at that moment run inside the same
    /// task, in registration order, and the queues are discarded with the
    /// `Pending` variant.
    pub(crate) fn fulfill(&self, value: Rc<T>) {
        let inner = self.inner.clone();
        queue::defer(move || {
            let observers = {
                let mut state = inner.borrow_mut();
                match std::mem::replace(&mut *state, State::Fulfilled(value.clone())) {
                    State::Pending { on_value, .. } => on_value,
                    settled => {
                        *state = settled;
                        return;
                    }
                }
            };
            trace!(observers = observers.len(), "promise fulfilled");
            for observer in observers {
                observer(value.clone());
            }
        });
    }

    /// Schedules the transition to `Rejected`. Mirrors [`Promise::fulfill`].
    pub(crate) fn reject_with(&self, reason: Rc<Rejection<E>>) {
        let inner = self.inner.clone();
        queue::defer(move || {
            let observers = {
                let mut state = inner.borrow_mut();
                match std::mem::replace(&mut *state, State::Rejected(reason.clone())) {
                    State::Pending { on_reason, .. } => on_reason,
                    settled => {
                        *state = settled;
                        return;
                    }
                }
            };
            trace!(observers = observers.len(), "promise rejected");
            for observer in observers {
                observer(reason.clone());
            }
        });
    }

    /// Registers one observer per branch.
    ///
    /// While pending, both are queued and the relevant one runs inside the
    /// settle task. Once settled, the queues are gone; the one relevant
    /// observer is deferred directly instead, so late subscribers still never
    /// hear back synchronously.
    pub(crate) fn observe(&self, on_value: ValueObserver<T>, on_reason: ReasonObserver<E>) {
        let settled = {
            let mut state = self.inner.borrow_mut();
            match &mut *state {
                State::Pending {
                    on_value: value_queue,
                    on_reason: reason_queue,
                } => {
                    value_queue.push(on_value);
                    reason_queue.push(on_reason);
                    return;
                }
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
            }
        };
        match settled {
            Ok(value) => queue::defer(move || on_value(value)),
            Err(reason) => queue::defer(move || on_reason(reason)),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.borrow() {
            State::Pending {
                on_value,
                on_reason,
            } => f
                .debug_struct("Promise")
                .field("state", &"pending")
                .field("observers", &(on_value.len() + on_reason.len()))
                .finish(),
            State::Fulfilled(value) => f
                .debug_struct("Promise")
                .field("state", &"fulfilled")
                .field("value", value)
                .finish(),
            State::Rejected(reason) => f
                .debug_struct("Promise")
                .field("state", &"rejected")
                .field("reason", reason)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::{queue, Promise, Rejection, Resolution};

    #[test]
    fn settles_at_most_once() {
        let resolver_slot = Rc::new(RefCell::new(None));
        let promise = Promise::<i32, String>::new({
            let slot = resolver_slot.clone();
            move |resolver| {
                *slot.borrow_mut() = Some(resolver);
                Ok(())
            }
        });
        let resolver = resolver_slot.borrow_mut().take().unwrap();
        resolver.resolve(1);
        resolver.reject("late".to_string());
        resolver.resolve(2);
        queue::drain();
        assert_eq!(promise.value().map(|v| *v), Some(1));
        assert_eq!(promise.reason(), None);
    }

    #[test]
    fn observers_fire_in_registration_order_after_the_call_returns() {
        let promise = Promise::<i32, String>::resolve(5);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            promise.then(
                Some(Box::new(move |value| {
                    seen.borrow_mut().push(label);
                    Ok(Resolution::shared(value))
                })),
                None,
            );
        }
        assert!(seen.borrow().is_empty());
        queue::drain();
        assert_eq!(*seen.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn late_subscription_is_still_deferred() {
        let promise = Promise::<i32, String>::resolve(9);
        queue::drain();
        assert!(!promise.is_pending());
        let hit = Rc::new(Cell::new(false));
        let derived = promise.then(
            Some(Box::new({
                let hit = hit.clone();
                move |value| {
                    hit.set(true);
                    Ok(Resolution::shared(value))
                }
            })),
            None,
        );
        assert!(!hit.get());
        queue::drain();
        assert!(hit.get());
        assert_eq!(derived.value().map(|v| *v), Some(9));
    }

    #[test]
    fn setup_error_rejects_the_promise() {
        let promise = Promise::<i32, String>::new(|_resolver| Err("sync failure".to_string()));
        queue::drain();
        assert_eq!(
            *promise.reason().unwrap(),
            Rejection::Reason("sync failure".to_string())
        );
    }

    #[test]
    fn setup_error_after_settling_is_a_no_op() {
        let promise = Promise::<i32, String>::new(|resolver| {
            resolver.resolve(3);
            Err("too late".to_string())
        });
        queue::drain();
        assert_eq!(promise.value().map(|v| *v), Some(3));
    }

    #[test]
    fn then_returns_a_distinct_promise() {
        let promise = Promise::<i32, String>::resolve(1);
        let derived = promise.then(None, None);
        assert!(!promise.shares_state_with(&derived));
    }

    #[test]
    fn pass_through_defaults() {
        let fulfilled = Promise::<i32, String>::resolve(7).then(None, None);
        let rejected = Promise::<i32, String>::reject("e".to_string()).then(None, None);
        queue::drain();
        assert_eq!(fulfilled.value().map(|v| *v), Some(7));
        assert_eq!(
            *rejected.reason().unwrap(),
            Rejection::Reason("e".to_string())
        );
    }

    #[test]
    fn handler_failure_rejects_the_derived_promise_only() {
        let parent = Promise::<i32, String>::resolve(1);
        let derived = parent.then(
            Some(Box::new(|_value| Err("handler blew up".to_string()))),
            None,
        );
        queue::drain();
        assert_eq!(parent.value().map(|v| *v), Some(1));
        assert_eq!(
            *derived.reason().unwrap(),
            Rejection::Reason("handler blew up".to_string())
        );
    }

    #[test]
    fn handler_returning_a_promise_chains_it_in() {
        let inner_resolver = Rc::new(RefCell::new(None));
        let inner = Promise::<i32, String>::new({
            let slot = inner_resolver.clone();
            move |resolver| {
                *slot.borrow_mut() = Some(resolver);
                Ok(())
            }
        });
        let derived = Promise::<i32, String>::resolve(0).then(
            Some(Box::new(move |_value| Ok(inner.into()))),
            None,
        );
        queue::drain();
        assert!(derived.is_pending());
        inner_resolver.borrow().as_ref().unwrap().resolve(11);
        queue::drain();
        assert_eq!(derived.value().map(|v| *v), Some(11));
    }

    #[test]
    fn adoption_mirrors_a_pending_promise() {
        let inner_resolver = Rc::new(RefCell::new(None));
        let inner = Promise::<i32, String>::new({
            let slot = inner_resolver.clone();
            move |resolver| {
                *slot.borrow_mut() = Some(resolver);
                Ok(())
            }
        });
        let outer = Promise::<i32, String>::resolve(inner);
        queue::drain();
        assert!(outer.is_pending());
        inner_resolver
            .borrow()
            .as_ref()
            .unwrap()
            .reject("inner reason".to_string());
        queue::drain();
        assert_eq!(
            *outer.reason().unwrap(),
            Rejection::Reason("inner reason".to_string())
        );
    }

    #[test]
    fn adoption_of_an_already_settled_promise() {
        let inner = Promise::<i32, String>::resolve(4);
        queue::drain();
        let outer = Promise::<i32, String>::resolve(inner);
        queue::drain();
        assert_eq!(outer.value().map(|v| *v), Some(4));
    }

    #[test]
    fn resolving_a_promise_with_itself_rejects_with_cycle() {
        let resolver_slot = Rc::new(RefCell::new(None));
        let promise = Promise::<i32, String>::new({
            let slot = resolver_slot.clone();
            move |resolver| {
                *slot.borrow_mut() = Some(resolver);
                Ok(())
            }
        });
        resolver_slot
            .borrow()
            .as_ref()
            .unwrap()
            .resolve(promise.clone());
        queue::drain();
        assert_eq!(*promise.reason().unwrap(), Rejection::Cycle);
    }

    #[test]
    fn handler_returning_the_derived_promise_rejects_with_cycle() {
        let derived_slot: Rc<RefCell<Option<Promise<i32, String>>>> =
            Rc::new(RefCell::new(None));
        let derived = Promise::<i32, String>::resolve(1).then(
            Some(Box::new({
                let slot = derived_slot.clone();
                move |_value| {
                    let me = slot.borrow().clone().unwrap();
                    Ok(me.into())
                }
            })),
            None,
        );
        *derived_slot.borrow_mut() = Some(derived.clone());
        queue::drain();
        assert_eq!(*derived.reason().unwrap(), Rejection::Cycle);
    }

    #[test]
    fn catch_recovers_and_passes_fulfillment_through() {
        let recovered = Promise::<i32, String>::reject("broken".to_string())
            .catch(|reason| {
                assert_eq!(reason.reason().map(String::as_str), Some("broken"));
                Ok(42.into())
            });
        let untouched = Promise::<i32, String>::resolve(8).catch(|_reason| Ok(0.into()));
        queue::drain();
        assert_eq!(recovered.value().map(|v| *v), Some(42));
        assert_eq!(untouched.value().map(|v| *v), Some(8));
    }

    #[test]
    fn finally_runs_once_and_does_not_alter_the_outcome() {
        let runs = Rc::new(Cell::new(0));
        let fulfilled = Promise::<i32, String>::resolve(2).finally({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        });
        let rejected = Promise::<i32, String>::reject("e".to_string()).finally({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        });
        queue::drain();
        assert_eq!(runs.get(), 2);
        assert_eq!(fulfilled.value().map(|v| *v), Some(2));
        assert_eq!(
            *rejected.reason().unwrap(),
            Rejection::Reason("e".to_string())
        );
    }
}
