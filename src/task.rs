//! Runnable tasks backed by a listenable future.
//!
//! A [FutureTask] wraps a fallible computation together with the
//! [ListenableFuture] that reports its outcome. Whoever calls
//! [FutureTask::run], usually a worker thread of some
//! [Executor](crate::executor::Executor), drives the future from
//! [State::Pending] through [State::Running] to a terminal state. A task
//! cancelled before it starts never runs its computation.
//!
//! # Example
//!
//! ```
//! use lwfuture::task::FutureTask;
//! use std::{sync::Arc, thread};
//!
//! let task = Arc::new(FutureTask::new(|| Ok::<_, String>(2 + 8)));
//! let future = task.future().clone();
//!
//! thread::spawn(move || task.run());
//!
//! assert_eq!(future.get(), Ok(10));
//! ```
//!
//! # Interruption
//!
//! Threads can't be stopped from outside, so interruption is cooperative.
//! Cancelling a running task with `cancel(true)` raises an interrupt flag
//! and unparks the thread running the task. Code inside the computation can
//! poll [interrupted] or use [sleep], which returns early once the flag is
//! raised:
//!
//! ```
//! use lwfuture::{error::Interrupted, task::{self, FutureTask}};
//! use std::{sync::{mpsc, Arc}, thread, time::Duration};
//!
//! let (started_tx, started) = mpsc::channel();
//! let task = Arc::new(FutureTask::new(move || {
//!     started_tx.send(()).unwrap();
//!     task::sleep(Duration::from_secs(60))?;
//!     Ok::<_, Interrupted>(())
//! }));
//! let future = task.future().clone();
//! let worker = thread::spawn(move || task.run());
//!
//! started.recv().unwrap();
//! future.cancel(true);
//! worker.join().unwrap();
//! assert!(future.is_cancelled());
//! ```
//!
//! How a task reacts to interruption is chosen through [TaskHooks]:
//! [Interruptible] (the default), [Uninterruptible] for work that must run
//! to completion once started, and [CancelOnInterrupt] which reports
//! [State::Cancelled] whenever the interrupt flag was raised during the run.
use std::{
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

use log::{error, trace};

use crate::{
    error::Interrupted,
    futures::{
        listenable::{ListenableFuture, State},
        listener::panic_message,
    },
};

thread_local! {
    static CURRENT: RefCell<Option<Arc<InterruptFlag>>> = const { RefCell::new(None) };
}

/// Interrupt request for the thread currently running a task.
///
/// The recorded thread is only a handle used for unparking. It does not
/// own or join the thread.
#[derive(Debug, Default)]
pub struct InterruptFlag {
    raised: AtomicBool,
    thread: Mutex<Option<Thread>>,
}

impl InterruptFlag {
    fn thread(&self) -> std::sync::MutexGuard<'_, Option<Thread>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the flag and wake the running thread if it is parked.
    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::SeqCst);

        if let Some(thread) = self.thread().as_ref() {
            thread.unpark();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        *self.thread() = Some(thread::current());
        self.raised.store(false, Ordering::SeqCst);
    }

    fn leave(&self) {
        *self.thread() = None;
    }
}

/// Makes a task's interrupt flag visible to [interrupted] and [sleep] for
/// the duration of its computation.
struct CurrentGuard {
    previous: Option<Arc<InterruptFlag>>,
}

impl CurrentGuard {
    fn install(flag: Arc<InterruptFlag>) -> Self {
        let previous = CURRENT.with(|c| c.borrow_mut().replace(flag));
        Self { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Whether the task running on this thread has been interrupted. Always
/// `false` outside of a task.
pub fn interrupted() -> bool {
    CURRENT.with(|c| c.borrow().as_ref().is_some_and(|f| f.is_interrupted()))
}

/// Put the current thread to sleep for `d`.
///
/// Inside a task, returns [Interrupted] as soon as the task is interrupted.
/// Outside of one, this behaves like [std::thread::sleep]. A duration too
/// large to be represented as a deadline sleeps until interrupted.
pub fn sleep(d: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now().checked_add(d);

    loop {
        if interrupted() {
            return Err(Interrupted);
        }

        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }

                thread::park_timeout(deadline - now);
            }
            None => thread::park(),
        }
    }
}

/// Customises how a [FutureTask] reacts to interruption.
pub trait TaskHooks: Send + Sync + 'static {
    /// Called by `cancel(true)` on a running task, and by
    /// [FutureTask::interrupt].
    fn interrupt_task(&self, flag: &InterruptFlag) {
        flag.interrupt();
    }

    /// Decides, once the computation has returned, whether to report
    /// [State::Cancelled] instead of its result.
    fn enforced_cancel(&self, flag: &InterruptFlag) -> bool {
        let _ = flag;
        false
    }
}

/// Interrupts the running thread on `cancel(true)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interruptible;

impl TaskHooks for Interruptible {}

/// Ignores interruption. Once started, the computation runs to its end.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uninterruptible;

impl TaskHooks for Uninterruptible {
    fn interrupt_task(&self, _flag: &InterruptFlag) {}
}

/// Reports [State::Cancelled] if the task was interrupted while running,
/// even if the computation went on to produce a value.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelOnInterrupt;

impl TaskHooks for CancelOnInterrupt {
    fn enforced_cancel(&self, flag: &InterruptFlag) -> bool {
        flag.is_interrupted()
    }
}

type Work<V, E> = Box<dyn FnMut() -> Result<V, E> + Send>;

/// A computation paired with the future reporting its outcome.
///
/// See the [module-level documentation](self) for more information.
pub struct FutureTask<V, E, H = Interruptible> {
    future: ListenableFuture<V, E>,
    work: Mutex<Work<V, E>>,
    flag: Arc<InterruptFlag>,
    hooks: Arc<H>,
}

impl<V, E> FutureTask<V, E, Interruptible>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(f: impl FnMut() -> Result<V, E> + Send + 'static) -> Self {
        Self::with_hooks(f, Interruptible)
    }
}

impl<V, E, H> FutureTask<V, E, H>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    H: TaskHooks,
{
    pub fn with_hooks(f: impl FnMut() -> Result<V, E> + Send + 'static, hooks: H) -> Self {
        let flag = Arc::new(InterruptFlag::default());
        let hooks = Arc::new(hooks);

        let future = {
            let flag = flag.clone();
            let hooks = hooks.clone();
            ListenableFuture::with_interrupt(State::Pending, move || hooks.interrupt_task(&flag))
        };

        Self {
            future,
            work: Mutex::new(Box::new(f)),
            flag,
            hooks,
        }
    }

    /// The future reporting this task's outcome.
    pub fn future(&self) -> &ListenableFuture<V, E> {
        &self.future
    }

    /// Ask the running computation to stop, without cancelling the future.
    pub fn interrupt(&self) {
        self.hooks.interrupt_task(&self.flag);
    }

    /// Run the computation on the calling thread and complete the future.
    ///
    /// Does nothing unless the future is [State::Pending]; re-running a
    /// task requires [ListenableFuture::set_restart] first. If the
    /// computation panics the future is cancelled, so nobody waits forever,
    /// and the panic is resumed.
    pub fn run(&self) {
        let result = {
            let mut guard = self.work.lock().unwrap_or_else(PoisonError::into_inner);
            let work = &mut **guard;

            self.flag.enter();

            if !self.future.set_running() {
                trace!("Task no longer pending, skipping");
                self.flag.leave();
                return;
            }

            let _current = CurrentGuard::install(self.flag.clone());
            panic::catch_unwind(AssertUnwindSafe(work))
        };

        let enforced_cancel = self.hooks.enforced_cancel(&self.flag);
        self.flag.leave();

        match result {
            Ok(_) if enforced_cancel => {
                self.future.set_cancelled();
            }
            Ok(Ok(value)) => {
                self.future.set(value);
            }
            Ok(Err(e)) => {
                self.future.set_exception(e);
            }
            Err(payload) => {
                error!("Task panicked: {}", panic_message(&*payload));
                self.future.set_cancelled();
                panic::resume_unwind(payload);
            }
        }
    }
}
