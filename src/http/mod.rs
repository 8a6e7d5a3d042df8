//! HTTP client module
//!
//! Shared transport for the REST and bulk query clients.
//!
//! # Features
//!
//! - **Bearer Authorization**: access token attached to every request
//! - **Automatic Retries**: Configurable retry logic with backoff
//! - **Rate Limiting**: Token bucket rate limiter using governor

mod client;
mod rate_limit;

pub use client::{HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
