//! Listeners and their delivery.
//!
//! A listener is a set of up to three callbacks, one per terminal state. A
//! [ListenableFuture] invokes exactly one of them, exactly once, either from
//! the thread that completes the future or, for a listener registered after
//! completion, from the registering thread. Supplying an executor at
//! registration moves the invocation onto that executor instead.
//!
//! A panicking listener is caught and reported through [log]. It never
//! reaches the completing thread and never stops the remaining listeners of
//! the same drain from running.
//!
//! # Example
//!
//! ```
//! use lwfuture::futures::{listenable::ListenableFuture, listener::Callbacks};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let future = ListenableFuture::<u32, String>::new();
//! {
//!     let seen = seen.clone();
//!     future.add_listener(Callbacks::new().on_success(move |v| seen.lock().unwrap().push(*v)));
//! }
//! future.set(7);
//! assert_eq!(*seen.lock().unwrap(), vec![7]);
//! ```
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::error;

use super::listenable::{ListenableFuture, Outcome};
use crate::executor::Executor;

/// Receiver of a future's terminal outcome.
///
/// Every method consumes the listener, so at most one of them is ever
/// called. Methods left at their default do nothing.
pub trait FutureListener<V, E>: Send {
    fn on_success(self: Box<Self>, value: &V) {
        let _ = value;
    }

    fn on_failure(self: Box<Self>, error: &E) {
        let _ = error;
    }

    fn on_cancelled(self: Box<Self>) {}
}

type SuccessFn<V> = Box<dyn FnOnce(&V) + Send>;
type FailureFn<E> = Box<dyn FnOnce(&E) + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;

/// A listener assembled from optional closures.
///
/// Slots that are never filled are no-ops, so `Callbacks::new()` on its own
/// is a valid (if useless) listener.
pub struct Callbacks<V, E> {
    success: Option<SuccessFn<V>>,
    failure: Option<FailureFn<E>>,
    cancelled: Option<CancelFn>,
}

impl<V, E> Callbacks<V, E> {
    pub fn new() -> Self {
        Self {
            success: None,
            failure: None,
            cancelled: None,
        }
    }

    pub fn on_success(mut self, f: impl FnOnce(&V) + Send + 'static) -> Self {
        self.success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(&E) + Send + 'static) -> Self {
        self.failure = Some(Box::new(f));
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cancelled = Some(Box::new(f));
        self
    }
}

impl<V, E> Default for Callbacks<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> FutureListener<V, E> for Callbacks<V, E> {
    fn on_success(self: Box<Self>, value: &V) {
        if let Some(f) = self.success {
            f(value)
        }
    }

    fn on_failure(self: Box<Self>, error: &E) {
        if let Some(f) = self.failure {
            f(error)
        }
    }

    fn on_cancelled(self: Box<Self>) {
        if let Some(f) = self.cancelled {
            f()
        }
    }
}

/// Runs a closure whatever the outcome.
pub(crate) struct Notify<F>(pub(crate) F);

impl<V, E, F: FnOnce() + Send> FutureListener<V, E> for Notify<F> {
    fn on_success(self: Box<Self>, _: &V) {
        (self.0)()
    }

    fn on_failure(self: Box<Self>, _: &E) {
        (self.0)()
    }

    fn on_cancelled(self: Box<Self>) {
        (self.0)()
    }
}

type FutureFn<V, E> = Box<dyn FnOnce(&ListenableFuture<V, E>) + Send>;

pub(crate) enum Callback<V, E> {
    Listener(Box<dyn FutureListener<V, E>>),
    /// Wants the completed future itself rather than its outcome.
    Future(FutureFn<V, E>),
}

/// A registered listener waiting for its future to complete.
pub(crate) struct Entry<V, E> {
    callback: Callback<V, E>,
    executor: Option<Box<dyn Executor>>,
}

impl<V, E> Entry<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(callback: Callback<V, E>, executor: Option<Box<dyn Executor>>) -> Self {
        Self { callback, executor }
    }

    /// Hand the outcome to the listener, inline or via its executor.
    pub(crate) fn dispatch(self, future: &ListenableFuture<V, E>, outcome: &Arc<Outcome<V, E>>) {
        let Some(executor) = self.executor else {
            deliver(self.callback, future, outcome);
            return;
        };

        let callback = self.callback;
        let future = future.clone();
        let outcome = outcome.clone();

        if let Err(e) = executor.execute(Box::new(move || deliver(callback, &future, &outcome))) {
            error!("Dropping future listener: {e}");
        }
    }
}

fn deliver<V, E>(callback: Callback<V, E>, future: &ListenableFuture<V, E>, outcome: &Outcome<V, E>)
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let result = panic::catch_unwind(AssertUnwindSafe(move || match callback {
        Callback::Listener(l) => match outcome {
            Outcome::Success(v) => l.on_success(v),
            Outcome::Failure(e) => l.on_failure(e),
            Outcome::Cancelled => l.on_cancelled(),
        },
        Callback::Future(f) => f(future),
    }));

    if let Err(payload) = result {
        error!("Future listener panicked: {}", panic_message(&*payload));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
