//! Built-in handlers.

pub mod bizkeeper;
pub mod fault_inject;
pub mod loadbalance;
pub mod marker;
pub mod ratelimiter;
pub mod router;
pub mod tracing;
pub mod transport;
