pub mod cache;
pub mod limiter;
pub mod reconciler;

pub use cache::{RoomCache, RoomKey, run_sweeper};
pub use limiter::RateLimiter;
pub use reconciler::Reconciler;
