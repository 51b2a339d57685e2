//! Delivery of results in submission order.
//!
//! A [ResultSerializingExecutor] hands every computation to an underlying
//! executor, where they run as concurrently as that executor allows. Their
//! outcomes, however, are delivered to the returned futures strictly in the
//! order the computations were submitted: a computation that finishes early
//! parks its outcome in its slot until every earlier slot has been
//! delivered.
//!
//! Delivery is performed by whichever worker finds the head of the queue
//! ready, on that worker's thread. Only one thread delivers at a time.
//!
//! ```
//! use lwfuture::executor::serializing::ResultSerializingExecutor;
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let rse = ResultSerializingExecutor::new();
//!
//! for i in 0..8u64 {
//!     let seen = seen.clone();
//!     rse.submit(move || {
//!         std::thread::sleep(std::time::Duration::from_millis(8 - i));
//!         Ok::<_, ()>(i)
//!     })
//!     .unwrap()
//!     .on_done(move |f| seen.lock().unwrap().push(f.get().unwrap()));
//! }
//!
//! rse.close();
//! assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
//! ```
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use log::{debug, error, warn};
use slab::Slab;

use super::{
    pool::{PoolConfig, ThreadPool},
    Executor, Job,
};
use crate::{
    error::Rejected,
    futures::{listenable::ListenableFuture, listener::panic_message},
};

const CLOSED: Rejected = Rejected::new("result serializing executor is closed");

struct Queue {
    /// Per submission delivery closure, filled once the computation ends.
    slots: Slab<Option<Job>>,
    /// Slot keys in submission order. The front is the next to deliver.
    order: VecDeque<usize>,
    draining: bool,
    submitted: u64,
    delivered: u64,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    delivered: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome of slot `key` and deliver every ready slot at the
    /// head of the queue, unless another thread is already doing so.
    fn finish(&self, key: usize, deliver: Job) {
        let mut queue = self.lock();

        if let Some(slot) = queue.slots.get_mut(key) {
            *slot = Some(deliver);
        }

        if queue.draining {
            return;
        }

        queue.draining = true;

        loop {
            let head = match queue.order.front() {
                Some(&head) if matches!(queue.slots.get(head), Some(Some(_))) => head,
                _ => break,
            };

            queue.order.pop_front();
            let deliver = queue.slots.remove(head);
            drop(queue);

            if let Some(deliver) = deliver {
                deliver();
            }

            queue = self.lock();
            queue.delivered += 1;
            self.delivered.notify_all();
        }

        queue.draining = false;
    }
}

/// An executor wrapper that restores submission order on delivery.
///
/// See the [module-level documentation](self) for more information.
pub struct ResultSerializingExecutor {
    executor: Arc<dyn Executor>,
    owned: Option<Arc<ThreadPool>>,
    shared: Arc<Shared>,
}

impl ResultSerializingExecutor {
    /// Run computations on a new [ThreadPool] with the default
    /// configuration. The pool is shut down by [close](Self::close).
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Run computations on a new [ThreadPool] built from `config`.
    pub fn with_config(config: PoolConfig) -> Self {
        let pool = Arc::new(ThreadPool::with_config(config));

        Self::build(pool.clone(), Some(pool))
    }

    /// Run computations on `executor`. Closing leaves it running.
    pub fn with_executor(executor: impl Executor + 'static) -> Self {
        Self::build(Arc::new(executor), None)
    }

    fn build(executor: Arc<dyn Executor>, owned: Option<Arc<ThreadPool>>) -> Self {
        Self {
            executor,
            owned,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    slots: Slab::new(),
                    order: VecDeque::new(),
                    draining: false,
                    submitted: 0,
                    delivered: 0,
                    closed: false,
                }),
                delivered: Condvar::new(),
            }),
        }
    }

    /// Run `f` on the underlying executor.
    ///
    /// The returned future completes with `f`'s result once all earlier
    /// submissions have completed. If `f` panics, the future is cancelled.
    /// Cancelling the future before `f` starts skips `f`; its place in the
    /// queue is still honoured.
    ///
    /// Cancellation by the caller is not held back: the future completes as
    /// cancelled, and its listeners run, at the moment it is cancelled, even
    /// if earlier submissions have not been delivered yet.
    pub fn submit<V, E, F>(&self, f: F) -> Result<ListenableFuture<V, E>, Rejected>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
    {
        let key = {
            let mut queue = self.shared.lock();

            if queue.closed {
                return Err(CLOSED);
            }

            let key = queue.slots.insert(None);
            queue.order.push_back(key);
            queue.submitted += 1;
            key
        };

        let future = ListenableFuture::new();
        let out = future.clone();
        let shared = self.shared.clone();

        let job = Box::new(move || {
            let deliver: Job = if out.is_done() {
                Box::new(|| {})
            } else {
                match panic::catch_unwind(AssertUnwindSafe(f)) {
                    Ok(Ok(v)) => Box::new(move || {
                        out.set(v);
                    }),
                    Ok(Err(e)) => Box::new(move || {
                        out.set_exception(e);
                    }),
                    Err(payload) => {
                        error!(
                            "Serialized computation panicked: {}",
                            panic_message(&*payload)
                        );
                        Box::new(move || {
                            out.set_cancelled();
                        })
                    }
                }
            };

            shared.finish(key, deliver);
        });

        if let Err(e) = self.executor.execute(job) {
            warn!("Serialized submission rejected: {e}");
            self.shared.finish(key, Box::new(|| {}));
            return Err(e);
        }

        Ok(future)
    }

    /// Number of submissions not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.lock().order.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Refuse further submissions and block until everything submitted so
    /// far has been delivered. Shuts down the pool if this executor created
    /// it.
    ///
    /// Must not be called from a delivery callback of this executor.
    pub fn close(&self) {
        let mut queue = self.shared.lock();

        if queue.closed {
            return;
        }

        queue.closed = true;
        let target = queue.submitted;

        debug!(
            "Closing result serializing executor, {} outstanding",
            target - queue.delivered
        );

        while queue.delivered < target {
            queue = self
                .shared
                .delivered
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }

        drop(queue);

        if let Some(pool) = &self.owned {
            pool.shutdown();
        }
    }
}

impl Default for ResultSerializingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResultSerializingExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
