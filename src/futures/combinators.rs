//! Futures derived from other futures.
//!
//! [all_of] succeeds once every input has succeeded and fails (or is
//! cancelled) as soon as the first input does. [any_of] takes the first
//! success or failure among its inputs. In both cases the remaining inputs
//! are cancelled once the result is decided, and cancelling the derived
//! future cancels its inputs.
//!
//! The derived future only keeps weak handles to its inputs, so it never
//! prolongs their lifetime.
//!
//! ```
//! use lwfuture::futures::{combinators::all_of, listenable::{ListenableFuture, State}};
//!
//! let a = ListenableFuture::<u32, String>::new();
//! let b = ListenableFuture::new();
//! let all = all_of([&a, &b]);
//!
//! a.set(1);
//! b.set_exception("disk on fire".to_string());
//!
//! assert_eq!(all.state(), State::Failure);
//! ```
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

use log::trace;

use super::{
    listenable::{Cancel, ListenableFuture, State},
    listener::Callbacks,
};

/// The inputs of a derived future, cancelled at most once.
#[derive(Clone)]
struct Inputs(Arc<Mutex<Option<Vec<Weak<dyn Cancel>>>>>);

impl Inputs {
    fn new<V, E>(futures: &[&ListenableFuture<V, E>]) -> Self
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        Self(Arc::new(Mutex::new(Some(
            futures.iter().map(|f| f.downgrade()).collect(),
        ))))
    }

    fn cancel(&self) -> usize {
        let taken = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let cancelled = taken
            .into_iter()
            .flatten()
            .filter_map(|input| input.upgrade())
            .filter(|input| input.clone().cancel(true))
            .count();

        if cancelled > 0 {
            trace!("Cancelled {cancelled} remaining inputs");
        }

        cancelled
    }
}

/// A future that succeeds with `()` once every future in `futures` has
/// succeeded.
///
/// The first input to fail fails the result with a copy of its error and
/// the first input to be cancelled cancels it. Either way all other inputs
/// are cancelled. With no inputs the result succeeds immediately.
pub fn all_of<'a, V, E>(
    futures: impl IntoIterator<Item = &'a ListenableFuture<V, E>>,
) -> ListenableFuture<(), E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let futures: Vec<_> = futures.into_iter().collect();
    let inputs = Inputs::new(&futures);

    let output = {
        let inputs = inputs.clone();
        ListenableFuture::with_interrupt(State::Running, move || {
            inputs.cancel();
        })
    };

    // One extra count for the registration below, so inputs that are
    // already complete can't finish the result half way through.
    let remaining = Arc::new(AtomicUsize::new(futures.len() + 1));

    for future in futures {
        let succeeded = output.clone();
        let failed = output.clone();
        let cancelled = output.clone();
        let remaining = remaining.clone();
        let inputs = inputs.clone();

        future.add_listener(
            Callbacks::new()
                .on_success(move |_| {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        succeeded.set(());
                    }
                })
                .on_failure(move |e: &E| {
                    failed.set_exception(e.clone());
                    inputs.cancel();
                })
                .on_cancelled(move || {
                    cancelled.cancel(true);
                }),
        );
    }

    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        output.set(());
    }

    output
}

/// A future completed by the first input to succeed or fail, after which
/// all other inputs are cancelled.
///
/// Cancelled inputs are ignored: if every input is cancelled, or there are
/// none, the result stays incomplete until it is cancelled itself.
pub fn any_of<'a, V, E>(
    futures: impl IntoIterator<Item = &'a ListenableFuture<V, E>>,
) -> ListenableFuture<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let futures: Vec<_> = futures.into_iter().collect();
    let inputs = Inputs::new(&futures);

    let output = {
        let inputs = inputs.clone();
        ListenableFuture::with_interrupt(State::Running, move || {
            inputs.cancel();
        })
    };

    for future in futures {
        let (succeeded, failed) = (output.clone(), output.clone());
        let (on_success, on_failure) = (inputs.clone(), inputs.clone());

        future.add_listener(
            Callbacks::new()
                .on_success(move |v: &V| {
                    if succeeded.set(v.clone()) {
                        on_success.cancel();
                    }
                })
                .on_failure(move |e: &E| {
                    if failed.set_exception(e.clone()) {
                        on_failure.cancel();
                    }
                }),
        );
    }

    output
}

/// Cancel every future in `futures`, interrupting those that run. Returns
/// how many were actually cancelled.
pub fn cancel_all<'a, V, E>(futures: impl IntoIterator<Item = &'a ListenableFuture<V, E>>) -> usize
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    futures.into_iter().filter(|f| f.cancel(true)).count()
}

/// A future that has already succeeded with `value`.
pub fn successful<V, E>(value: V) -> ListenableFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let future = ListenableFuture::new();
    future.set(value);
    future
}

/// A future that has already failed with `error`.
pub fn failed<V, E>(error: E) -> ListenableFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let future = ListenableFuture::new();
    future.set_exception(error);
    future
}

/// A future that has already been cancelled.
pub fn cancelled<V, E>() -> ListenableFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let future = ListenableFuture::new();
    future.set_cancelled();
    future
}
