//! Fixed-window rate limiting over a shared store.

mod bucket;
mod keys;
mod limiter;

pub use bucket::{BucketState, LimitResult};
pub use keys::{BucketKeys, KeyPurpose};
pub use limiter::{LimitSettings, RateLimiter, MAX_WINDOW};
