//! The listenable future state machine.
//!
//! A [ListenableFuture] is a shared, settable result container. It starts
//! out either [State::Pending] or [State::Running] and moves to exactly one
//! terminal state ([State::Success], [State::Failure] or
//! [State::Cancelled]). Completion races are resolved by the first caller:
//! every transition reports whether it won via a `bool`, the losers change
//! nothing.
//!
//! Winning a transition freezes the listener registry and drains it on the
//! completing thread, in registration order. A listener registered after
//! that point never enters the registry and is invoked right away by the
//! registering thread, so every listener runs exactly once.
//!
//! # Example
//!
//! ```
//! use lwfuture::futures::listenable::{ListenableFuture, State};
//! use std::thread;
//!
//! let future = ListenableFuture::<u32, String>::new();
//! let setter = future.clone();
//!
//! let t = thread::spawn(move || setter.set(42));
//!
//! assert_eq!(future.get(), Ok(42));
//! assert!(t.join().unwrap());
//! assert_eq!(future.state(), State::Success);
//! assert!(!future.set(43));
//! ```
use std::{
    fmt, mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};

use log::trace;

use super::listener::{Callback, Callbacks, Entry, FutureListener, Notify};
use crate::{error::FutureError, executor::Executor};

/// Lifecycle state of a [ListenableFuture].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

/// The terminal outcome recorded by a [ListenableFuture].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<V, E> {
    Success(V),
    Failure(E),
    Cancelled,
}

impl<V, E> Outcome<V, E> {
    pub fn state(&self) -> State {
        match self {
            Self::Success(_) => State::Success,
            Self::Failure(_) => State::Failure,
            Self::Cancelled => State::Cancelled,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failure(e) => Some(e),
            _ => None,
        }
    }

    pub fn to_result(&self) -> Result<V, FutureError<E>>
    where
        V: Clone,
        E: Clone,
    {
        match self {
            Self::Success(v) => Ok(v.clone()),
            Self::Failure(e) => Err(FutureError::Failed(e.clone())),
            Self::Cancelled => Err(FutureError::Cancelled),
        }
    }
}

pub(crate) type Interrupt = Box<dyn Fn() + Send + Sync>;

struct Core<V, E> {
    state: State,
    outcome: Option<Arc<Outcome<V, E>>>,
    listeners: Vec<Entry<V, E>>,
}

pub(crate) struct Inner<V, E> {
    core: Mutex<Core<V, E>>,
    done: Condvar,
    interrupt: Option<Interrupt>,
}

/// A weak, type-erased handle that can only cancel.
///
/// Aggregating futures keep their inputs this way so they never hold an
/// input alive that nobody else can complete.
pub(crate) trait Cancel: Send + Sync {
    fn cancel(self: Arc<Self>, may_interrupt: bool) -> bool;
}

impl<V, E> Cancel for Inner<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn cancel(self: Arc<Self>, may_interrupt: bool) -> bool {
        ListenableFuture { inner: self }.cancel(may_interrupt)
    }
}

/// A settable, listenable, cancellable result.
///
/// Cloning yields another handle to the same future.
///
/// See the [module-level documentation](self) for more information.
pub struct ListenableFuture<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for ListenableFuture<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V, E> ListenableFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a future that is already [State::Running], ready to be set by
    /// whoever holds a handle.
    pub fn new() -> Self {
        Self::with_state(State::Running, None)
    }

    /// Create a [State::Pending] future. Use [ListenableFuture::set_running]
    /// to mark the start of the work it stands for.
    pub fn pending() -> Self {
        Self::with_state(State::Pending, None)
    }

    /// Create a future whose owner wants to hear about `cancel(true)` while
    /// it is running.
    pub(crate) fn with_interrupt(
        state: State,
        interrupt: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::with_state(state, Some(Box::new(interrupt)))
    }

    fn with_state(state: State, interrupt: Option<Interrupt>) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    state,
                    outcome: None,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                interrupt,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core<V, E>> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn Cancel> {
        let weak: Weak<Inner<V, E>> = Arc::downgrade(&self.inner);
        weak
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == State::Cancelled
    }

    /// The recorded outcome, or `None` while the future has not completed.
    pub fn outcome(&self) -> Option<Arc<Outcome<V, E>>> {
        self.lock().outcome.clone()
    }

    /// Move from [State::Pending] to [State::Running]. Fails from any other
    /// state, in particular once the future has been cancelled.
    pub fn set_running(&self) -> bool {
        let mut core = self.lock();

        if core.state != State::Pending {
            return false;
        }

        core.state = State::Running;
        true
    }

    /// Complete with `value`. Returns `false` if the future was already
    /// complete, in which case `value` is dropped.
    pub fn set(&self, value: V) -> bool {
        self.complete(Outcome::Success(value)).is_some()
    }

    /// Complete with `error`. Returns `false` if the future was already
    /// complete.
    pub fn set_exception(&self, error: E) -> bool {
        self.complete(Outcome::Failure(error)).is_some()
    }

    /// Complete as cancelled without notifying the owner.
    pub fn set_cancelled(&self) -> bool {
        self.complete(Outcome::Cancelled).is_some()
    }

    /// Cancel the future.
    ///
    /// The transition to [State::Cancelled] follows the same race as every
    /// other completion. If it wins while the future is running and
    /// `may_interrupt` is set, the owner is asked to interrupt the work.
    /// Interruption is advisory, the work may still run to its end.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        match self.complete(Outcome::Cancelled) {
            Some(State::Running) => {
                if may_interrupt {
                    if let Some(interrupt) = &self.inner.interrupt {
                        interrupt();
                    }
                }
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Re-arm the future for another completion cycle.
    ///
    /// Moves a running or completed future back to [State::Pending] and
    /// forgets its outcome. Listeners that were already delivered stay
    /// delivered, callers register again for the next cycle.
    pub fn set_restart(&self) -> bool {
        let mut core = self.lock();

        if core.state == State::Pending {
            return false;
        }

        core.state = State::Pending;
        core.outcome = None;
        true
    }

    /// Record `outcome` if still incomplete and drain the listeners.
    /// Returns the state the future was in before the transition.
    fn complete(&self, outcome: Outcome<V, E>) -> Option<State> {
        let outcome = Arc::new(outcome);

        let (previous, listeners) = {
            let mut core = self.lock();

            if core.state.is_terminal() {
                return None;
            }

            let previous = mem::replace(&mut core.state, outcome.state());
            core.outcome = Some(outcome.clone());

            (previous, mem::take(&mut core.listeners))
        };

        self.inner.done.notify_all();

        trace!(
            "Future {:?} -> {:?}, {} listeners",
            previous,
            outcome.state(),
            listeners.len()
        );

        for entry in listeners {
            entry.dispatch(self, &outcome);
        }

        Some(previous)
    }

    fn register(&self, entry: Entry<V, E>) {
        let outcome = {
            let mut core = self.lock();

            match &core.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    core.listeners.push(entry);
                    return;
                }
            }
        };

        entry.dispatch(self, &outcome);
    }

    /// Register a listener invoked on the completing thread.
    pub fn add_listener(&self, listener: impl FutureListener<V, E> + 'static) {
        self.register(Entry::new(Callback::Listener(Box::new(listener)), None));
    }

    /// Register a listener whose invocation is handed to `executor`.
    ///
    /// If the executor rejects the invocation, the rejection is logged and
    /// the listener dropped; completing the future never fails because of
    /// it.
    pub fn add_async_listener(
        &self,
        listener: impl FutureListener<V, E> + 'static,
        executor: impl Executor + 'static,
    ) {
        self.register(Entry::new(
            Callback::Listener(Box::new(listener)),
            Some(Box::new(executor)),
        ));
    }

    /// Register a set of optional closures; absent slots do nothing.
    pub fn add_callbacks(&self, callbacks: Callbacks<V, E>) {
        self.add_listener(callbacks);
    }

    /// Run `f` once the future completes, whatever the outcome.
    pub fn on_complete(&self, f: impl FnOnce() + Send + 'static) {
        self.add_listener(Notify(f));
    }

    pub fn on_complete_async(
        &self,
        f: impl FnOnce() + Send + 'static,
        executor: impl Executor + 'static,
    ) {
        self.add_async_listener(Notify(f), executor);
    }

    /// Run `f` with the completed future itself.
    pub fn on_done(&self, f: impl FnOnce(&ListenableFuture<V, E>) + Send + 'static) {
        self.register(Entry::new(Callback::Future(Box::new(f)), None));
    }

    pub fn on_done_async(
        &self,
        f: impl FnOnce(&ListenableFuture<V, E>) + Send + 'static,
        executor: impl Executor + 'static,
    ) {
        self.register(Entry::new(
            Callback::Future(Box::new(f)),
            Some(Box::new(executor)),
        ));
    }

    /// Block until the future completes.
    pub fn wait(&self) -> Arc<Outcome<V, E>> {
        let mut core = self.lock();

        loop {
            if let Some(outcome) = &core.outcome {
                return outcome.clone();
            }

            core = self
                .inner
                .done
                .wait(core)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the future completes or `timeout` elapses.
    ///
    /// A timeout too large to be represented as a deadline waits without
    /// one.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Outcome<V, E>>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut core = self.lock();

        loop {
            if let Some(outcome) = &core.outcome {
                return Some(outcome.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            core = self
                .inner
                .done
                .wait_timeout(core, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until the future completes and return a copy of its value.
    pub fn get(&self) -> Result<V, FutureError<E>>
    where
        V: Clone,
        E: Clone,
    {
        self.wait().to_result()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<V, FutureError<E>>
    where
        V: Clone,
        E: Clone,
    {
        match self.wait_timeout(timeout) {
            Some(outcome) => outcome.to_result(),
            None => Err(FutureError::Timeout(timeout)),
        }
    }
}

impl<V, E> Default for ListenableFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> fmt::Debug for ListenableFuture<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .inner
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state;

        f.debug_struct("ListenableFuture")
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ListenableFuture, Outcome, State};
    use crate::{
        error::FutureError,
        executor::{DirectExecutor, RejectingExecutor},
        futures::listener::Callbacks,
    };
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Barrier, Mutex,
        },
        thread,
        time::Duration,
    };

    type Log = Arc<Mutex<Vec<u32>>>;

    fn push(log: &Log, v: u32) -> impl FnOnce() + Send + 'static {
        let log = log.clone();
        move || log.lock().unwrap().push(v)
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Registers one listener of every shape, sync and via a direct
    /// executor. Each one records its tag when it sees `expected`.
    fn add_all_shapes(future: &ListenableFuture<(), u32>, log: &Log, expected: State) {
        future.add_listener(Callbacks::new());
        future.on_complete(push(log, 1));
        {
            let p = push(log, 2);
            future.on_done(move |f| {
                assert!(f.is_done());
                p()
            });
        }
        future.add_listener(shape_listener(log, 3, expected));

        future.add_async_listener(Callbacks::new(), DirectExecutor);
        future.on_complete_async(push(log, 11), DirectExecutor);
        {
            let p = push(log, 12);
            future.on_done_async(move |_| p(), DirectExecutor);
        }
        future.add_async_listener(shape_listener(log, 13, expected), DirectExecutor);
    }

    fn shape_listener(log: &Log, tag: u32, expected: State) -> Callbacks<(), u32> {
        let (s, f, c) = (push(log, tag), push(log, tag), push(log, tag));
        match expected {
            State::Success => Callbacks::new().on_success(move |_| s()),
            State::Failure => Callbacks::new().on_failure(move |_| f()),
            _ => Callbacks::new().on_cancelled(c),
        }
    }

    fn check_order(complete: impl FnOnce(&ListenableFuture<(), u32>), expected: State) {
        let log = Log::default();
        let future = ListenableFuture::new();
        add_all_shapes(&future, &log, expected);
        log.lock().unwrap().push(0);

        complete(&future);

        assert_eq!(future.state(), expected);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 11, 12, 13]);
    }

    #[test]
    fn listeners_in_order_on_success() {
        check_order(|f| assert!(f.set(())), State::Success);
    }

    #[test]
    fn listeners_in_order_on_failure() {
        check_order(|f| assert!(f.set_exception(5)), State::Failure);
    }

    #[test]
    fn listeners_in_order_on_cancel() {
        check_order(|f| assert!(f.cancel(true)), State::Cancelled);
    }

    #[test]
    fn late_listener_fires_immediately() {
        let future = ListenableFuture::<u32, ()>::new();
        future.set(3);

        let hit = Arc::new(AtomicBool::new(false));
        {
            let hit = hit.clone();
            future.add_listener(Callbacks::new().on_success(move |v| {
                assert_eq!(*v, 3);
                hit.store(true, Ordering::SeqCst);
            }));
        }

        assert!(hit.load(Ordering::SeqCst));
    }

    fn add_bad_listeners(future: &ListenableFuture<(), u32>) {
        future.on_complete(|| panic!("runnable"));
        future.on_done(|_| panic!("notifier"));
        future.add_listener(
            Callbacks::new()
                .on_success(|_| panic!("success"))
                .on_failure(|_| panic!("failure"))
                .on_cancelled(|| panic!("cancelled")),
        );
        future.on_complete_async(|| panic!("async runnable"), RejectingExecutor);
        future.on_done_async(|_| panic!("async notifier"), RejectingExecutor);
        future.on_complete_async(|| panic!("direct runnable"), DirectExecutor);
    }

    fn check_isolation(complete: impl FnOnce(&ListenableFuture<(), u32>) -> bool) {
        init_logging();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = || {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };

        let future = ListenableFuture::new();
        future.on_complete(counter());
        add_bad_listeners(&future);
        future.on_complete(counter());

        assert!(complete(&future));

        add_bad_listeners(&future);
        future.on_complete(counter());

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listeners_on_success() {
        check_isolation(|f| f.set(()));
    }

    #[test]
    fn panicking_listeners_on_failure() {
        check_isolation(|f| f.set_exception(1));
    }

    #[test]
    fn panicking_listeners_on_cancel() {
        check_isolation(|f| f.cancel(true));
    }

    #[test]
    fn only_first_transition_wins() {
        let future = ListenableFuture::<u32, u32>::new();

        assert!(future.set_exception(1));
        assert!(!future.set(2));
        assert!(!future.set_cancelled());
        assert!(!future.cancel(true));
        assert!(!future.set_running());

        assert_eq!(*future.outcome().unwrap(), Outcome::Failure(1));
        assert_eq!(future.get(), Err(FutureError::Failed(1)));
    }

    #[test]
    fn concurrent_completers_single_winner() {
        for _ in 0..100 {
            let future = ListenableFuture::<usize, usize>::new();
            let barrier = Arc::new(Barrier::new(6));

            let threads: Vec<_> = (0..6)
                .map(|i| {
                    let future = future.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        let won = match i % 3 {
                            0 => future.set(i),
                            1 => future.set_exception(i),
                            _ => future.set_cancelled(),
                        };
                        (i, won)
                    })
                })
                .collect();

            let winners: Vec<_> = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|(_, won)| *won)
                .collect();

            assert_eq!(winners.len(), 1);
            let (i, _) = winners[0];
            let expected = match i % 3 {
                0 => Outcome::Success(i),
                1 => Outcome::Failure(i),
                _ => Outcome::Cancelled,
            };
            assert_eq!(*future.outcome().unwrap(), expected);
        }
    }

    fn race_listeners_against_completion(threads: usize) {
        const LISTENERS: usize = 20;

        for _ in 0..100 {
            let future = ListenableFuture::<(), ()>::new();
            let hits: Arc<Vec<AtomicUsize>> =
                Arc::new((0..threads * LISTENERS).map(|_| AtomicUsize::new(0)).collect());
            let completer_hits = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
            let barrier = Arc::new(Barrier::new(threads + 1));

            let mut handles: Vec<_> = (0..threads)
                .map(|id| {
                    let (future, hits, barrier) = (future.clone(), hits.clone(), barrier.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..LISTENERS {
                            let hits = hits.clone();
                            future.on_complete(move || {
                                hits[id * LISTENERS + i].fetch_add(1, Ordering::SeqCst);
                            });
                        }
                    })
                })
                .collect();

            {
                let (future, hits, barrier) =
                    (future.clone(), completer_hits.clone(), barrier.clone());
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    let before = hits.clone();
                    future.on_complete(move || {
                        before[0].fetch_add(1, Ordering::SeqCst);
                    });
                    future.set(());
                    future.on_complete(move || {
                        hits[1].fetch_add(1, Ordering::SeqCst);
                    });
                }));
            }

            for h in handles {
                h.join().unwrap();
            }

            assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
            assert!(completer_hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        }
    }

    #[test]
    fn exactly_once_delivery_matched_threads() {
        let cpus = thread::available_parallelism().map_or(2, |n| n.get());
        race_listeners_against_completion(cpus.saturating_sub(1).max(1));
    }

    #[test]
    fn exactly_once_delivery_overloaded_threads() {
        let cpus = thread::available_parallelism().map_or(2, |n| n.get());
        race_listeners_against_completion((cpus * 4).min(64));
    }

    #[test]
    fn running_and_restart() {
        let future = ListenableFuture::<u32, ()>::pending();
        assert_eq!(future.state(), State::Pending);
        assert!(!future.set_restart());
        assert!(future.set_running());
        assert!(!future.set_running());

        let first = Arc::new(AtomicUsize::new(0));
        {
            let first = first.clone();
            future.on_complete(move || {
                first.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(future.set(1));
        assert!(future.set_restart());
        assert_eq!(future.state(), State::Pending);
        assert!(future.outcome().is_none());

        let second = Arc::new(AtomicUsize::new(0));
        {
            let second = second.clone();
            future.on_complete(move || {
                second.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(future.set_running());
        assert!(future.set(2));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(future.get(), Ok(2));
    }

    #[test]
    fn restart_from_running_keeps_pending_listeners() {
        let future = ListenableFuture::<u32, ()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            future.on_complete(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(future.set_restart());
        assert!(future.set_running());
        assert!(future.set(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_interrupts_only_running() {
        let interrupted = Arc::new(AtomicUsize::new(0));
        let hook = || {
            let interrupted = interrupted.clone();
            move || {
                interrupted.fetch_add(1, Ordering::SeqCst);
            }
        };

        let pending = ListenableFuture::<(), ()>::with_interrupt(State::Pending, hook());
        assert!(pending.cancel(true));
        assert_eq!(interrupted.load(Ordering::SeqCst), 0);

        let running = ListenableFuture::<(), ()>::with_interrupt(State::Running, hook());
        assert!(running.cancel(false));
        assert_eq!(interrupted.load(Ordering::SeqCst), 0);

        let running = ListenableFuture::<(), ()>::with_interrupt(State::Running, hook());
        assert!(running.cancel(true));
        assert!(!running.cancel(true));
        assert_eq!(interrupted.load(Ordering::SeqCst), 1);
        assert!(running.is_cancelled());
    }

    #[test]
    fn wait_blocks_until_set() -> anyhow::Result<()> {
        let future = ListenableFuture::<String, String>::new();
        assert_eq!(
            future.get_timeout(Duration::from_millis(10)),
            Err(FutureError::Timeout(Duration::from_millis(10)))
        );

        let setter = future.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            setter.set("done".into())
        });

        assert_eq!(future.get()?, "done");
        assert!(t.join().unwrap());
        assert_eq!(
            future.wait_timeout(Duration::ZERO).as_deref(),
            Some(&Outcome::Success("done".to_string()))
        );

        Ok(())
    }

    #[test]
    fn unbounded_timeout_waits_without_deadline() {
        let done = ListenableFuture::<u32, ()>::new();
        done.set(1);
        assert_eq!(done.get_timeout(Duration::MAX), Ok(1));

        let later = ListenableFuture::<u32, ()>::new();
        let setter = later.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(2)
        });

        assert_eq!(later.get_timeout(Duration::MAX), Ok(2));
        assert!(t.join().unwrap());
    }
}
