//! Core abstractions
//!
//! - Invocation, its request arguments and header access
//! - Response and the invocation error type
//! - Protocol status mapping
//! - Circuit breaker, token buckets and the rate limiter registry
//! - Retry backoff

pub mod circuit_breaker;
pub mod error;
pub mod invocation;
pub mod rate_limiter;
pub mod response;
pub mod retry;
pub mod status;
pub mod token_bucket;

pub use circuit_breaker::{
    BreakerError, CircuitBreakerConfig, CircuitRegistry, CircuitState, CommandBreaker,
};
pub use error::{InvocationError, InvocationResult};
pub use invocation::{
    Args, HEADER_TRAFFIC_MARK, HeaderCarrier, Headers, HttpRequest, Invocation,
    InvocationContext, RouteTags, RpcRequest,
};
pub use rate_limiter::{RateLimitPolicies, RateLimitPolicy, RateLimiterRegistry};
pub use response::Response;
pub use retry::RetryBackoff;
pub use status::{StatusKind, StatusRegistry};
pub use token_bucket::TokenBucket;
