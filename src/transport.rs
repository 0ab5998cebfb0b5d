//! Pluggable protocol clients used by the terminal transport handler.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use crate::core::{Invocation, InvocationContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no transport client for protocol {protocol}")]
    UnknownProtocol { protocol: String },

    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("remote returned status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("call to {endpoint} exceeded its deadline")]
    Timeout { endpoint: String },
}

impl TransportError {
    /// Status reported by the remote side, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends an invocation to a resolved endpoint.
pub trait TransportClient: Send + Sync {
    fn call(
        &self,
        ctx: &InvocationContext,
        endpoint: &str,
        inv: &Invocation,
    ) -> Result<Bytes, TransportError>;
}

#[derive(Default)]
pub struct TransportRegistry {
    clients: RwLock<HashMap<String, Arc<dyn TransportClient>>>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.clients.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("TransportRegistry")
            .field("protocols", &names)
            .finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, protocol: &str, client: Arc<dyn TransportClient>) {
        info!(protocol = %protocol, "Installed transport client");
        self.clients.write().insert(protocol.to_string(), client);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn TransportClient>> {
        self.clients.read().get(protocol).cloned()
    }
}
