//! Listenable futures and the pieces built around them.
//!
//! - `listenable`: the [listenable::ListenableFuture] state machine.
//! - `listener`: the [listener::FutureListener] trait, closure based
//!   listeners and their delivery.
//! - `combinators`: futures derived from a set of other futures, such as
//!   [combinators::all_of] and [combinators::any_of].
//!
//! A future that wraps a computation lives in [crate::task], one with a
//! deadline in [crate::timer].
pub mod combinators;
pub mod listenable;
pub mod listener;
