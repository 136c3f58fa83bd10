//! Promise/A+ style chaining promises for single-threaded, cooperative code.
//!
//! A [`Promise`] starts out pending and settles exactly once, either fulfilled
//! with a value or rejected with a [`Rejection`]. Observers registered through
//! [`Promise::then`] are never invoked synchronously inside the registering
//! call; every notification goes through the [`queue`] module's deferred task
//! queue and runs on a later scheduling turn, in registration order.
//!
//! There is no executor and no thread: the caller drives time explicitly with
//! [`queue::drain`].
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{queue, Promise};
//!
//! let doubled = Promise::<i32, String>::resolve(21).then(
//!     Some(Box::new(|v| Ok((*v * 2).into()))),
//!     None,
//! );
//! assert!(doubled.is_pending());
//! queue::drain();
//! assert_eq!(doubled.value().map(|v| *v), Some(42));
//! ```
use thiserror::Error;

pub mod queue;

mod combinator;
mod promise;
mod resolution;

pub use promise::{OnFulfilled, OnRejected, Promise, Resolver};
pub use resolution::{ForeignReject, ForeignResolve, Resolution, Thenable};

/// Why a promise was rejected.
///
/// `Reason` carries whatever the producer passed to [`Resolver::reject`] or a
/// `then` handler raised; `Cycle` is generated by the engine when a promise is
/// asked to adopt itself as its own outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection<E> {
    /// The promise was resolved with itself.
    #[error("promise resolved with itself")]
    Cycle,
    /// A reason supplied by the producer or by a failing handler.
    #[error("{0}")]
    Reason(E),
}

impl<E> Rejection<E> {
    /// The caller-supplied reason, if this is not an engine-generated error.
    pub fn reason(&self) -> Option<&E> {
        match self {
            Rejection::Cycle => None,
            Rejection::Reason(reason) => Some(reason),
        }
    }
}
