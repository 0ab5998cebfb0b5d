//! Handler-chain RPC framework.
//!
//! Every consumer or provider call is carried by an [`core::Invocation`] through an
//! ordered [`handler::Chain`] of middleware. Built-in handlers provide traffic marking,
//! rule-based routing, rate limiting, circuit breaking, load balancing with retries,
//! fault injection, tracing hooks and the terminal transport call.

pub mod app_context;
pub mod bizkeeper;
pub mod config;
pub mod core;
pub mod discovery;
pub mod fault;
pub mod handler;
pub mod handlers;
pub mod invoker;
pub mod marker;
pub mod observability;
pub mod policies;
pub mod router;
pub mod transport;

pub use app_context::{AppContext, AppContextBuilder};
pub use core::{Invocation, InvocationError, Response};
pub use handler::{Chain, ChainManager, Handler, HandlerRegistry, ServiceType};
pub use invoker::Invoker;
