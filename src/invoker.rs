//! Consumer entry point: runs an invocation through a named consumer chain.

use std::{sync::Arc, time::Instant};

use tracing::debug;

use crate::{
    core::{Invocation, InvocationError, Response},
    handler::{ChainManager, ServiceType},
    observability::metrics::Metrics,
};

/// Chain used when no name is given.
pub const DEFAULT_CHAIN: &str = "default";

#[derive(Debug, Clone)]
pub struct Invoker {
    chains: Arc<ChainManager>,
    chain_name: String,
}

impl Invoker {
    pub fn new(chains: Arc<ChainManager>, chain_name: impl Into<String>) -> Self {
        Self {
            chains,
            chain_name: chain_name.into(),
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Run `inv` from the first handler. An error response becomes `Err`; the
    /// reply body, if any, is also left on `inv.reply`.
    pub fn invoke(&self, inv: &mut Invocation) -> Result<Response, InvocationError> {
        let chain = self.chains.get_chain(ServiceType::Consumer, &self.chain_name)?;
        inv.reset();

        let started = Instant::now();
        let mut delivered: Option<Response> = None;
        chain.next(inv, Box::new(|r| delivered = Some(r)));
        let resp = delivered.unwrap_or_else(|| Response::ok(None));
        Metrics::record_invocation(&inv.microservice_name, resp.status, started.elapsed());

        debug!(
            chain = %self.chain_name,
            service = %inv.microservice_name,
            status = resp.status,
            "Invocation finished"
        );
        match resp.err {
            Some(err) => Err(err),
            None => Ok(resp),
        }
    }
}
