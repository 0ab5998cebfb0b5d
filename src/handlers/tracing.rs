use std::sync::Arc;

use tracing::warn;

use crate::{
    app_context::AppContext,
    core::Invocation,
    handler::{self, Chain, Handler, ResponseCallback},
    observability::tracer::Span,
};

/// Opens an exit span and propagates its context through outgoing headers.
#[derive(Debug)]
pub struct TracingConsumerHandler {
    ctx: Arc<AppContext>,
}

/// Opens an entry span from the propagated context on incoming headers.
#[derive(Debug)]
pub struct TracingProviderHandler {
    ctx: Arc<AppContext>,
}

impl TracingConsumerHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl TracingProviderHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

fn run_in_span(
    ctx: &AppContext,
    span: Option<Span>,
    chain: &Chain,
    inv: &mut Invocation,
    cb: ResponseCallback<'_>,
) {
    let Some(span) = span else {
        chain.next(inv, cb);
        return;
    };
    let tracer = Arc::clone(&ctx.tracer);
    chain.next(
        inv,
        Box::new(move |resp| {
            if let Err(e) = tracer.end_span(span, resp.status) {
                warn!(error = %e, "Failed to end span");
            }
            cb(resp);
        }),
    );
}

impl Handler for TracingConsumerHandler {
    fn name(&self) -> &str {
        handler::TRACING_CONSUMER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let operation = inv.operation_key();
        let span = self
            .ctx
            .tracer
            .create_exit_span(&operation, &mut inv.ctx.headers, &inv.endpoint)
            .inspect_err(|e| warn!(operation = %operation, error = %e, "Failed to create exit span"))
            .ok();
        run_in_span(&self.ctx, span, chain, inv, cb);
    }
}

impl Handler for TracingProviderHandler {
    fn name(&self) -> &str {
        handler::TRACING_PROVIDER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let operation = inv.operation_key();
        let span = self
            .ctx
            .tracer
            .create_entry_span(&operation, &inv.ctx.headers)
            .inspect_err(|e| warn!(operation = %operation, error = %e, "Failed to create entry span"))
            .ok();
        run_in_span(&self.ctx, span, chain, inv, cb);
    }
}
