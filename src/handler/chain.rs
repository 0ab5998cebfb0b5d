use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Handler, HandlerError, HandlerRegistry, ResponseCallback};
use crate::core::{Invocation, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Consumer,
    Provider,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Consumer => "Consumer",
            ServiceType::Provider => "Provider",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered handler list. Holds no per-call state; the cursor lives on the invocation.
pub struct Chain {
    name: String,
    service_type: ServiceType,
    handlers: Vec<Arc<dyn Handler>>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("service_type", &self.service_type)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl Chain {
    pub fn new(service_type: ServiceType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type,
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// Run the handler at `inv.handler_index`, or answer OK when the chain is exhausted.
    pub fn next(&self, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let Some(handler) = self.handlers.get(inv.handler_index) else {
            cb(Response::ok(None));
            return;
        };
        inv.handler_index += 1;
        handler.handle(self, inv, cb);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// Split a comma-separated handler list, trimming blanks.
pub fn parse_handler_names(csv: &str) -> Vec<&str> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Cache of built chains keyed by service type and chain name.
pub struct ChainManager {
    registry: Arc<HandlerRegistry>,
    chains: RwLock<HashMap<(ServiceType, String), Arc<Chain>>>,
}

impl fmt::Debug for ChainManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainManager")
            .field("chains", &self.chains.read().len())
            .finish()
    }
}

impl ChainManager {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Build and cache a chain. Nothing is cached if any handler name is unknown.
    pub fn create_chain(
        &self,
        service_type: ServiceType,
        name: &str,
        handler_names: &[&str],
    ) -> Result<Arc<Chain>, HandlerError> {
        let mut chain = Chain::new(service_type, name);
        for handler_name in handler_names {
            chain.add_handler(self.registry.create_handler(handler_name)?);
        }
        let chain = Arc::new(chain);
        info!(
            service_type = %service_type,
            chain = %name,
            handlers = ?handler_names,
            "Created handler chain"
        );
        self.chains
            .write()
            .insert((service_type, name.to_string()), Arc::clone(&chain));
        Ok(chain)
    }

    /// Build chains from `name -> "h1,h2,..."` definitions.
    pub fn create_chains(
        &self,
        service_type: ServiceType,
        definitions: &HashMap<String, String>,
    ) -> Result<(), HandlerError> {
        for (name, csv) in definitions {
            self.create_chain(service_type, name, &parse_handler_names(csv))?;
        }
        Ok(())
    }

    pub fn get_chain(&self, service_type: ServiceType, name: &str) -> Result<Arc<Chain>, HandlerError> {
        self.chains
            .read()
            .get(&(service_type, name.to_string()))
            .cloned()
            .ok_or_else(|| {
                debug!(service_type = %service_type, chain = %name, "Chain lookup miss");
                HandlerError::ChainNotFound {
                    service_type,
                    name: name.to_string(),
                }
            })
    }
}
