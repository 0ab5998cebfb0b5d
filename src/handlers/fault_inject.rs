use std::sync::Arc;

use tracing::warn;

use crate::{
    app_context::AppContext,
    core::{Invocation, StatusKind},
    fault::{FaultConfig, FaultError},
    handler::{self, Chain, Handler, ResponseCallback, ServiceType, write_back_err},
};

/// Delays or aborts a configured share of consumer calls.
#[derive(Debug)]
pub struct FaultInjectHandler {
    ctx: Arc<AppContext>,
}

impl FaultInjectHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for FaultInjectHandler {
    fn name(&self) -> &str {
        handler::FAULT_INJECT
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let Some(cfg) = FaultConfig::from_source(
            self.ctx.config.as_ref(),
            ServiceType::Consumer,
            &inv.microservice_name,
            &inv.protocol,
        ) else {
            chain.next(inv, cb);
            return;
        };

        match self.ctx.fault_injector.validate_and_apply(&cfg, inv) {
            Ok(()) => chain.next(inv, cb),
            Err(FaultError::Abort { status }) => write_back_err(FaultError::Abort { status }, status, cb),
            Err(e) => {
                warn!(service = %inv.microservice_name, error = %e, "Invalid fault config");
                write_back_err(e, StatusKind::BadRequest.http_code(), cb);
            }
        }
    }
}
