//! Futures with a deadline.
//!
//! A [ScheduledFuture] is a [ListenableFuture] that stands for work due at
//! a fixed [Instant]. Scheduled futures order by deadline, earliest first,
//! so a `BinaryHeap<Reverse<ScheduledFuture<_, _>>>` pops the next one due.
//! Firing them is up to whoever owns the heap.
//!
//! ```
//! use lwfuture::timer::{Delayed, ScheduledFuture};
//! use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};
//!
//! let mut heap = BinaryHeap::new();
//! heap.push(Reverse(ScheduledFuture::<&str, ()>::new(Duration::from_secs(2))));
//! heap.push(Reverse(ScheduledFuture::new(Duration::from_secs(1))));
//!
//! let Reverse(next) = heap.pop().unwrap();
//! assert!(next.delay() <= Duration::from_secs(1));
//! ```
use std::{
    cmp::Ordering,
    fmt,
    ops::Deref,
    time::{Duration, Instant},
};

use crate::futures::listenable::ListenableFuture;

/// Stand-in deadline for delays too long to be represented, about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Something due at a deadline.
pub trait Delayed {
    fn deadline(&self) -> Instant;

    /// Time left until the deadline, zero once it has passed.
    fn delay(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Order by remaining delay against any other delayed item. Items due
    /// at the same instant compare equal.
    fn compare_delay(&self, other: &dyn Delayed) -> Ordering {
        self.deadline().cmp(&other.deadline())
    }
}

/// A [ListenableFuture] with a deadline.
///
/// Dereferences to the underlying future. Equality and ordering only look at
/// the deadline.
pub struct ScheduledFuture<V, E> {
    future: ListenableFuture<V, E>,
    expiration: Instant,
}

impl<V, E> ScheduledFuture<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// A pending future due `delay` from now. Delays beyond what an
    /// [Instant] can hold are clamped to a deadline decades away.
    pub fn new(delay: Duration) -> Self {
        let now = Instant::now();
        let expiration = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);

        Self::at(expiration)
    }

    /// A pending future due at `expiration`.
    pub fn at(expiration: Instant) -> Self {
        Self::with_future(ListenableFuture::pending(), expiration)
    }

    pub fn with_future(future: ListenableFuture<V, E>, expiration: Instant) -> Self {
        Self { future, expiration }
    }

    pub fn future(&self) -> &ListenableFuture<V, E> {
        &self.future
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiration
    }
}

impl<V, E> Delayed for ScheduledFuture<V, E> {
    fn deadline(&self) -> Instant {
        self.expiration
    }
}

impl<V, E> Deref for ScheduledFuture<V, E> {
    type Target = ListenableFuture<V, E>;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<V, E> Clone for ScheduledFuture<V, E> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            expiration: self.expiration,
        }
    }
}

impl<V, E> PartialEq for ScheduledFuture<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.expiration == other.expiration
    }
}

impl<V, E> Eq for ScheduledFuture<V, E> {}

impl<V, E> PartialOrd for ScheduledFuture<V, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V, E> Ord for ScheduledFuture<V, E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expiration.cmp(&other.expiration)
    }
}

impl<V, E> fmt::Debug for ScheduledFuture<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledFuture")
            .field("future", &self.future)
            .field("expiration", &self.expiration)
            .finish()
    }
}
