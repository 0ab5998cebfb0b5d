//! Handler abstraction, chains and the handler registry.

pub mod chain;
pub mod registry;

pub use chain::{Chain, ChainManager, ServiceType};
pub use registry::{HandlerError, HandlerFactory, HandlerRegistry};

use crate::core::{InvocationError, Invocation, Response};

pub const TRANSPORT: &str = "transport";
pub const LOADBALANCE: &str = "loadbalance";
pub const BIZKEEPER_CONSUMER: &str = "bizkeeper-consumer";
pub const BIZKEEPER_PROVIDER: &str = "bizkeeper-provider";
pub const TRACING_CONSUMER: &str = "tracing-consumer";
pub const TRACING_PROVIDER: &str = "tracing-provider";
pub const RATELIMITER_CONSUMER: &str = "ratelimiter-consumer";
pub const RATELIMITER_PROVIDER: &str = "ratelimiter-provider";
pub const ROUTER: &str = "router";
pub const FAULT_INJECT: &str = "fault-inject";
pub const TRAFFIC_MARKER: &str = "traffic-marker";

/// Names only the framework may register.
pub const BUILTIN_HANDLERS: [&str; 10] = [
    TRANSPORT,
    LOADBALANCE,
    BIZKEEPER_CONSUMER,
    BIZKEEPER_PROVIDER,
    TRACING_CONSUMER,
    TRACING_PROVIDER,
    RATELIMITER_CONSUMER,
    RATELIMITER_PROVIDER,
    ROUTER,
    FAULT_INJECT,
];

pub type ResponseCallback<'a> = Box<dyn FnOnce(Response) + 'a>;

/// A unit of middleware.
///
/// `handle` must deliver exactly one response to `cb`, either directly or by
/// passing a (possibly wrapped) callback to `chain.next`.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>);
}

/// Deliver an error response.
pub fn write_back_err(err: impl Into<InvocationError>, status: u16, cb: ResponseCallback<'_>) {
    cb(Response::error(status, err));
}
