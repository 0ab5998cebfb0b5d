use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use super::{BUILTIN_HANDLERS, Handler, ServiceType};
use crate::{
    app_context::AppContext,
    handlers::{
        bizkeeper::{BizkeeperConsumerHandler, BizkeeperProviderHandler},
        fault_inject::FaultInjectHandler,
        loadbalance::LoadBalanceHandler,
        marker::MarkHandler,
        ratelimiter::RateLimiterHandler,
        router::RouterHandler,
        tracing::{TracingConsumerHandler, TracingProviderHandler},
        transport::TransportHandler,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handler {name} is duplicated")]
    Duplicated { name: String },

    #[error("handler name {name} violates built-in handler name")]
    ViolatesBuiltin { name: String },

    #[error("unknown handler: {name}")]
    UnknownHandler { name: String },

    #[error("{service_type} chain {name} not found")]
    ChainNotFound {
        service_type: ServiceType,
        name: String,
    },

    #[error("next chain returned no response")]
    NoResponse,
}

/// Builds a fresh handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// Name to factory mapping.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: RwLock<HashMap<String, HandlerFactory>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry; built-in names stay reserved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler wired to `ctx`.
    pub fn with_builtins(ctx: Arc<AppContext>) -> Self {
        let registry = Self::new();

        registry.builtin(super::TRANSPORT, &ctx, TransportHandler::new);
        registry.builtin(super::LOADBALANCE, &ctx, LoadBalanceHandler::new);
        registry.builtin(super::BIZKEEPER_CONSUMER, &ctx, BizkeeperConsumerHandler::new);
        registry.builtin(super::BIZKEEPER_PROVIDER, &ctx, BizkeeperProviderHandler::new);
        registry.builtin(super::TRACING_CONSUMER, &ctx, TracingConsumerHandler::new);
        registry.builtin(super::TRACING_PROVIDER, &ctx, TracingProviderHandler::new);
        registry.builtin(super::RATELIMITER_CONSUMER, &ctx, |c| {
            RateLimiterHandler::new(c, ServiceType::Consumer)
        });
        registry.builtin(super::RATELIMITER_PROVIDER, &ctx, |c| {
            RateLimiterHandler::new(c, ServiceType::Provider)
        });
        registry.builtin(super::ROUTER, &ctx, RouterHandler::new);
        registry.builtin(super::FAULT_INJECT, &ctx, FaultInjectHandler::new);
        registry.builtin(super::TRAFFIC_MARKER, &ctx, MarkHandler::new);

        info!(count = registry.len(), "Registered built-in handlers");
        registry
    }

    fn builtin<H: Handler + 'static>(
        &self,
        name: &str,
        ctx: &Arc<AppContext>,
        ctor: fn(Arc<AppContext>) -> H,
    ) {
        let ctx = Arc::clone(ctx);
        self.insert(
            name,
            Arc::new(move || Arc::new(ctor(Arc::clone(&ctx))) as Arc<dyn Handler>),
        );
    }

    fn insert(&self, name: &str, factory: HandlerFactory) {
        self.factories.write().insert(name.to_string(), factory);
    }

    /// Register a user handler. Built-in names and duplicates are rejected.
    pub fn register_handler(&self, name: &str, factory: HandlerFactory) -> Result<(), HandlerError> {
        if BUILTIN_HANDLERS.contains(&name) {
            return Err(HandlerError::ViolatesBuiltin {
                name: name.to_string(),
            });
        }
        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(HandlerError::Duplicated {
                name: name.to_string(),
            });
        }
        factories.insert(name.to_string(), factory);
        debug!(handler = %name, "Registered handler");
        Ok(())
    }

    pub fn create_handler(&self, name: &str) -> Result<Arc<dyn Handler>, HandlerError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HandlerError::UnknownHandler {
                name: name.to_string(),
            })?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}
