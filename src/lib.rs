//! Ratewarden - Distributed Fixed-Window Rate Limiter
//!
//! This crate counts requests per caller-chosen identifier within a fixed
//! time window. Bucket state lives entirely in a shared key-value store
//! (Redis), so any number of stateless instances enforce one global limit.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{LimiterError, Result};
pub use ratelimit::{LimitResult, LimitSettings, RateLimiter};
