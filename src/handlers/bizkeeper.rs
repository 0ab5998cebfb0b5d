use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    app_context::AppContext,
    bizkeeper::{CommandConfig, command_name},
    core::{BreakerError, Invocation, Response, StatusKind},
    handler::{self, Chain, Handler, HandlerError, ResponseCallback, ServiceType, write_back_err},
};

/// Runs the rest of the chain under a per-command circuit breaker.
///
/// A failed response counts against the breaker. When the breaker rejects the
/// call the configured fallback answers instead, if fallback is enabled.
#[derive(Debug)]
pub struct BizkeeperConsumerHandler {
    ctx: Arc<AppContext>,
}

/// Provider-side breaker. Same accounting, no fallback.
#[derive(Debug)]
pub struct BizkeeperProviderHandler {
    ctx: Arc<AppContext>,
}

impl BizkeeperConsumerHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl BizkeeperProviderHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for BizkeeperConsumerHandler {
    fn name(&self) -> &str {
        handler::BIZKEEPER_CONSUMER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let source = inv.source_service_name.clone();
        protect(&self.ctx, ServiceType::Consumer, &source, true, chain, inv, cb);
    }
}

impl Handler for BizkeeperProviderHandler {
    fn name(&self) -> &str {
        handler::BIZKEEPER_PROVIDER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        protect(&self.ctx, ServiceType::Provider, "", false, chain, inv, cb);
    }
}

fn protect(
    ctx: &AppContext,
    service_type: ServiceType,
    source: &str,
    with_fallback: bool,
    chain: &Chain,
    inv: &mut Invocation,
    cb: ResponseCallback<'_>,
) {
    let command = command_name(
        source,
        service_type,
        &inv.microservice_name,
        &inv.schema_id,
        &inv.operation_id,
    );
    let cfg = CommandConfig::from_source(ctx.config.as_ref(), service_type, &inv.microservice_name);
    let fallback = with_fallback.then(|| ctx.fallbacks.resolve(&cfg)).flatten();

    if with_fallback && cfg.force_fallback {
        let err = BreakerError::ForceFallback { command };
        match fallback {
            Some(f) => cb(f(inv, &err)),
            None => write_back_err(err, unavailable(ctx, inv), cb),
        }
        return;
    }

    let breaker = ctx.circuits.configure(&command, cfg.breaker.clone());
    let outcome = breaker.execute(|| {
        let mut delivered: Option<Response> = None;
        chain.next(inv, Box::new(|r| delivered = Some(r)));
        match delivered {
            Some(r) if r.is_ok() => Ok(r),
            Some(r) => Err(Some(r)),
            None => Err(None),
        }
    });

    match outcome {
        Ok(Ok(resp)) | Ok(Err(Some(resp))) => cb(resp),
        Ok(Err(None)) => {
            warn!(command = %command, "Chain returned without a response");
            write_back_err(
                HandlerError::NoResponse,
                StatusKind::InternalServerError.http_code(),
                cb,
            );
        }
        Err(err) => {
            debug!(command = %command, error = %err, "Breaker rejected call");
            match fallback {
                Some(f) => cb(f(inv, &err)),
                None => write_back_err(err, unavailable(ctx, inv), cb),
            }
        }
    }
}

fn unavailable(ctx: &AppContext, inv: &Invocation) -> u16 {
    ctx.status.status(&inv.protocol, StatusKind::ServiceUnavailable)
}
