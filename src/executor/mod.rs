//! Executors.
//!
//! An [Executor] accepts boxed jobs and runs them somewhere, or refuses them
//! with [Rejected]. Everything else in this crate only relies on that single
//! capability:
//!
//! - [DirectExecutor] runs each job on the calling thread.
//! - [RejectingExecutor] refuses every job.
//! - [pool::ThreadPool] runs jobs on a fixed set of worker threads.
//! - [serializing::ResultSerializingExecutor] runs jobs on another executor
//!   and hands their results back in submission order.
//!
//! Any executor can also produce listenable futures through
//! [ListeningExecutor::submit]:
//!
//! ```
//! use lwfuture::executor::{pool::ThreadPool, ListeningExecutor};
//!
//! let pool = ThreadPool::new();
//! let future = pool.submit(|| Ok::<_, String>("Hello, world!")).unwrap();
//! assert_eq!(future.get(), Ok("Hello, world!"));
//! ```
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::error;

use crate::{
    error::Rejected,
    futures::{listenable::ListenableFuture, listener::panic_message},
    task::{FutureTask, TaskHooks},
};

pub mod pool;
pub mod serializing;

/// A unit of work handed to an [Executor].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs.
pub trait Executor: Send + Sync {
    /// Schedule `job`. Returns [Rejected] if the executor won't run it, in
    /// which case `job` is dropped without running.
    fn execute(&self, job: Job) -> Result<(), Rejected>;
}

impl<T: Executor + ?Sized> Executor for Arc<T> {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        (**self).execute(job)
    }
}

impl<T: Executor + ?Sized> Executor for Box<T> {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        (**self).execute(job)
    }
}

impl<T: Executor + ?Sized> Executor for &T {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        (**self).execute(job)
    }
}

/// Submission of computations whose outcome is reported through a
/// [ListenableFuture]. Implemented for every [Executor].
pub trait ListeningExecutor: Executor {
    /// Run `f` on this executor.
    ///
    /// The returned future completes with `f`'s result. Cancelling it with
    /// `cancel(true)` while `f` runs interrupts the worker thread, see
    /// [crate::task].
    fn submit<V, E, F>(&self, f: F) -> Result<ListenableFuture<V, E>, Rejected>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnMut() -> Result<V, E> + Send + 'static,
    {
        self.submit_task(FutureTask::new(f))
    }

    /// Run an already constructed task on this executor.
    fn submit_task<V, E, H>(
        &self,
        task: FutureTask<V, E, H>,
    ) -> Result<ListenableFuture<V, E>, Rejected>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        H: TaskHooks,
    {
        let future = task.future().clone();

        self.execute(Box::new(move || task.run()))?;

        Ok(future)
    }
}

impl<T: Executor + ?Sized> ListeningExecutor for T {}

/// Runs every job immediately on the calling thread.
///
/// A panicking job is logged and otherwise ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                "DirectExecutor: job panicked: {}",
                panic_message(&*payload)
            );
        }

        Ok(())
    }
}

/// Rejects everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingExecutor;

impl Executor for RejectingExecutor {
    fn execute(&self, _job: Job) -> Result<(), Rejected> {
        Err(Rejected::new("RejectingExecutor rejects everything"))
    }
}
