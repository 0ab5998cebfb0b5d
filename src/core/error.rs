use thiserror::Error;

use crate::{
    core::circuit_breaker::BreakerError, fault::FaultError, handler::HandlerError,
    handlers::loadbalance::LoadBalanceError, router::RouteError, transport::TransportError,
};

/// Error carried by a [`Response`](super::Response).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    LoadBalance(#[from] LoadBalanceError),

    #[error(transparent)]
    Breaker(#[from] BreakerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fault(#[from] FaultError),

    #[error("rate limit exceeded: {name}")]
    RateLimited { name: String },

    /// Error reported by the remote application.
    #[error("{0}")]
    Application(String),
}

pub type InvocationResult<T> = Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let err = InvocationError::RateLimited {
            name: "svc.schema.op".to_string(),
        };
        assert_eq!(err.to_string(), "rate limit exceeded: svc.schema.op");
    }

    #[test]
    fn test_transparent_display() {
        let err: InvocationError = FaultError::Abort { status: 421 }.into();
        assert_eq!(err.to_string(), "injecting abort");
        assert!(matches!(err, InvocationError::Fault(_)));
    }

    #[test]
    fn test_handler_error_converts() {
        let err: InvocationError = HandlerError::NoResponse.into();
        assert!(matches!(err, InvocationError::Handler(HandlerError::NoResponse)));
    }
}
