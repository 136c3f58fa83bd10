//! The resolution procedure: how a raw resolution value becomes a settlement.
//!
//! Everything a promise can be resolved with is one of three shapes, modeled
//! as the [`Resolution`] sum type instead of runtime duck-typing: a plain
//! value, another promise to adopt, or a foreign [`Thenable`] to subscribe
//! to. [`resolve`] pattern-matches the tag once and either settles the target
//! or wires the target up to the eventual outcome.
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::promise::Promise;
use crate::Rejection;

/// Resolution callback handed to a [`Thenable`]. Recurses the resolution
/// procedure on whatever it is called with.
pub type ForeignResolve<T, E> = Box<dyn FnOnce(Resolution<T, E>)>;

/// Rejection callback handed to a [`Thenable`].
pub type ForeignReject<E> = Box<dyn FnOnce(E)>;

/// A foreign object that knows how to report an eventual outcome.
///
/// This is the interop seam: any type implementing `Thenable` can be adopted
/// by a promise exactly like a native [`Promise`]. `subscribe` receives one
/// resolve and one reject callback sharing a one-shot latch: only the first
/// invocation of either takes effect, and an `Err` returned after a callback
/// has run is ignored. Misbehaving implementations therefore cannot settle
/// the adopting promise twice.
pub trait Thenable<T, E> {
    /// Wires the two callbacks to this object's eventual outcome.
    ///
    /// Returning `Err` is the rendition of "invoking the chaining member
    /// threw": it rejects the adopting promise unless a callback already ran.
    fn subscribe(
        self: Box<Self>,
        resolve: ForeignResolve<T, E>,
        reject: ForeignReject<E>,
    ) -> Result<(), E>;
}

/// Everything [`Resolver::resolve`](crate::Resolver::resolve) and `then`
/// handlers can produce.
pub enum Resolution<T, E> {
    /// A settled value; the target fulfills with it.
    Value(Rc<T>),
    /// Another promise; the target adopts its eventual outcome.
    Chain(Promise<T, E>),
    /// A foreign thenable; the target subscribes to it.
    Foreign(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    /// A `Value` resolution from an already-shared payload, as handed to
    /// fulfillment handlers.
    pub fn shared(value: Rc<T>) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(Rc::new(value))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Chain(promise)
    }
}

impl<T, E> From<Box<dyn Thenable<T, E>>> for Resolution<T, E> {
    fn from(thenable: Box<dyn Thenable<T, E>>) -> Self {
        Resolution::Foreign(thenable)
    }
}

impl<T, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Resolution::Value"),
            Resolution::Chain(_) => f.write_str("Resolution::Chain"),
            Resolution::Foreign(_) => f.write_str("Resolution::Foreign"),
        }
    }
}

/// Settles `target` according to `x`.
///
/// Order matters: the self-adoption check runs before anything else, so a
/// promise resolved with itself rejects with [`Rejection::Cycle`] instead of
/// waiting on its own settlement forever.
pub(crate) fn resolve<T: 'static, E: 'static>(target: &Promise<T, E>, x: Resolution<T, E>) {
    match x {
        Resolution::Chain(other) => {
            if target.shares_state_with(&other) {
                trace!("cyclic self-resolution");
                target.reject_with(Rc::new(Rejection::Cycle));
                return;
            }
            let on_value = {
                let target = target.clone();
                Box::new(move |value: Rc<T>| resolve(&target, Resolution::Value(value)))
            };
            let on_reason = {
                let target = target.clone();
                Box::new(move |reason: Rc<Rejection<E>>| target.reject_with(reason))
            };
            other.observe(on_value, on_reason);
        }
        Resolution::Foreign(thenable) => {
            // One-shot latch shared by both callbacks and the error path.
            let tripped = Rc::new(Cell::new(false));
            let resolve_cb: ForeignResolve<T, E> = {
                let target = target.clone();
                let tripped = tripped.clone();
                Box::new(move |y| {
                    if tripped.replace(true) {
                        return;
                    }
                    resolve(&target, y);
                })
            };
            let reject_cb: ForeignReject<E> = {
                let target = target.clone();
                let tripped = tripped.clone();
                Box::new(move |reason| {
                    if tripped.replace(true) {
                        return;
                    }
                    target.reject_with(Rc::new(Rejection::Reason(reason)));
                })
            };
            if let Err(reason) = thenable.subscribe(resolve_cb, reject_cb) {
                if !tripped.replace(true) {
                    target.reject_with(Rc::new(Rejection::Reason(reason)));
                }
            }
        }
        Resolution::Value(value) => target.fulfill(value),
    }
}
