use std::sync::Arc;

use crate::{
    app_context::AppContext,
    core::Invocation,
    handler::{self, Chain, Handler, ResponseCallback},
};

/// Tags the invocation with the name of the first matching traffic policy.
#[derive(Debug)]
pub struct MarkHandler {
    ctx: Arc<AppContext>,
}

impl MarkHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for MarkHandler {
    fn name(&self) -> &str {
        handler::TRAFFIC_MARKER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        self.ctx.marker.mark(inv);
        chain.next(inv, cb);
    }
}
