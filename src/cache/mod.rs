//! Client-facing cache facades.
//!
//! [`AsynchronousImageCache`] serves fresh entries straight from storage
//! and falls back to background generation on a miss.
//! [`ExplicitImageCache`] serves only pre-populated entries and never
//! generates. Both dispatch requests from their own FIFO queue thread and
//! guarantee exactly one callback (capture or abort) per request.

mod asynchronous;
mod explicit;
mod queue;
mod stats;

pub use asynchronous::AsynchronousImageCache;
pub use explicit::ExplicitImageCache;
pub use stats::CacheStats;

pub(crate) use queue::TaskQueue;
