//! # `lwfuture`: Lightweight listenable futures
//!
//! This crate implements thread based futures that notify listeners when
//! they complete. A [ListenableFuture](futures::listenable::ListenableFuture)
//! is a settable result that moves exactly once from pending or running to
//! success, failure or cancellation. Everybody racing to complete it learns
//! whether they won, and every listener registered on it runs exactly once,
//! in registration order, no matter when it was registered.
//!
//! On top of that core the crate provides:
//!
//! - computations wrapped in a future with cooperative interruption, see
//!   [task];
//! - futures derived from others, see [futures::combinators];
//! - executors, including one that delivers results in submission order,
//!   see [executor];
//! - futures with a deadline, see [timer].
//!
//! There is no `async`/`await` here. Work runs on plain OS threads and
//! callers either block on a future or listen to it.
//!
//! ## Example
//!
//! Run two computations on a pool and wait for both:
//!
//! ```
//! use lwfuture::executor::{pool::ThreadPool, ListeningExecutor};
//! use lwfuture::futures::combinators::all_of;
//!
//! let pool = ThreadPool::new();
//! let hello = pool.submit(|| Ok::<_, String>("Hello, ")).unwrap();
//! let world = pool.submit(|| Ok::<_, String>("World!")).unwrap();
//!
//! all_of([&hello, &world]).get().unwrap();
//! println!("{}{}", hello.get().unwrap(), world.get().unwrap());
//! ```
pub mod error;
pub mod executor;
pub mod futures;
pub mod task;
pub mod timer;
