//! Execution controls on the dispatch path: the worker pool and the rate limiter.

pub mod pool;
pub mod rate_limit;

pub use pool::{Backpressure, WorkerPool};
pub use rate_limit::RateLimiter;
