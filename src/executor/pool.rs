//! A fixed-size pool of worker threads.
//!
//! Jobs are queued and run by whichever worker is free, see the
//! [threadpool] crate. A job that panics is logged; the pool carries on
//! with the next job.
//!
//! ```
//! use lwfuture::executor::{pool::{PoolConfig, ThreadPool}, Executor};
//! use std::sync::mpsc::channel;
//!
//! let pool = ThreadPool::with_config(PoolConfig::default().threads(2).name("demo"));
//! let (tx, rx) = channel();
//! pool.execute(Box::new(move || {
//!     tx.send(std::thread::current().name().map(String::from)).unwrap()
//! }))
//! .unwrap();
//! assert_eq!(rx.recv().unwrap().as_deref(), Some("demo"));
//! pool.shutdown();
//! ```
use std::{
    cell::Cell,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    thread,
};

use log::{debug, error};

use super::{Executor, Job};
use crate::{error::Rejected, futures::listener::panic_message};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the pool whose job this thread is running, zero otherwise.
    static RUNNING_FOR: Cell<usize> = const { Cell::new(0) };
}

/// Settings for a [ThreadPool].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    threads: usize,
    name: String,
}

impl Default for PoolConfig {
    /// One worker per available CPU, named `lwfuture-worker`.
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            name: "lwfuture-worker".into(),
        }
    }
}

impl PoolConfig {
    /// Number of worker threads, at least one.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Name given to the worker threads.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }
}

/// A fixed set of worker threads that can be shut down.
///
/// See the [module-level documentation](self) for more information.
pub struct ThreadPool {
    pool: Mutex<Option<threadpool::ThreadPool>>,
    id: usize,
    name: String,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Start the workers described by `config`.
    pub fn with_config(config: PoolConfig) -> Self {
        let pool = threadpool::Builder::new()
            .num_threads(config.threads)
            .thread_name(config.name.clone())
            .build();

        debug!("{}: started {} workers", config.name, pool.max_count());

        Self {
            pool: Mutex::new(Some(pool)),
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: config.name,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<threadpool::ThreadPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting jobs and wait until everything already queued has
    /// run.
    ///
    /// Called from one of the pool's own jobs, this does not wait; the
    /// workers still finish the queue and exit. Subsequent calls do nothing.
    pub fn shutdown(&self) {
        let Some(pool) = self.lock().take() else {
            return;
        };

        if RUNNING_FOR.with(Cell::get) != self.id {
            pool.join();
        }

        debug!("{}: shut down", self.name);
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().is_none()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        let guard = self.lock();
        let Some(pool) = guard.as_ref() else {
            return Err(Rejected::new("thread pool is shut down"));
        };

        let id = self.id;
        pool.execute(move || {
            let previous = RUNNING_FOR.with(|r| r.replace(id));

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                error!("Worker job panicked: {}", panic_message(&*payload));
            }

            RUNNING_FOR.with(|r| r.set(previous));
        });

        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
