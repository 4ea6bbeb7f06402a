//! Rate limiting module
//!
//! Per-key admission control with three interchangeable algorithms:
//!
//! - **Fixed Window**: counter per aligned window, kept in a [`CounterStore`]
//!   (in process or Redis); fails open if the store is unreachable
//! - **Sliding Window**: exact log of admissions over the trailing window
//! - **Token Bucket**: continuous refill at `limit / window` tokens per second
//!
//! The algorithm is chosen once, at construction. Sliding window and token
//! bucket keep per-key state in process and evict idle keys in the background.
//!
//! # Example
//!
//! ```rust,no_run
//! use quotaguard::rate_limit::{LimitConfig, Quotas, RateLimiter, SlidingWindowLimiter, SystemClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let quotas = Quotas::new(LimitConfig::new(100, Duration::from_secs(60)).unwrap());
//!     let limiter = SlidingWindowLimiter::new(Arc::new(SystemClock), quotas);
//!
//!     let result = limiter.allow("api-key").await;
//!     println!("allowed={} remaining={}", result.allowed, result.remaining);
//! }
//! ```
//!
//! [`CounterStore`]: crate::store::CounterStore

pub mod clock;
pub mod fixed_window;
pub mod middleware;
pub mod reaper;
pub mod service;
pub mod sliding_window;
pub mod token_bucket;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, FakeClock, SystemClock};
pub use fixed_window::FixedWindowLimiter;
pub use middleware::{add_rate_limit_headers, mask_api_key, rate_limit_middleware, API_KEY_HEADER};
pub use service::RateLimiterService;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;
pub use types::{Algorithm, LimitConfig, Quotas, RateLimitResult, RateLimiter};
