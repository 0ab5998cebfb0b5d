use std::sync::Arc;

use tracing::debug;

use crate::{
    app_context::AppContext,
    core::{Invocation, Response, StatusKind},
    handler::{self, Chain, Handler, ResponseCallback, write_back_err},
    transport::TransportError,
};

/// Terminal handler: sends the invocation to `inv.endpoint` with the client
/// registered for `inv.protocol`.
#[derive(Debug)]
pub struct TransportHandler {
    ctx: Arc<AppContext>,
}

impl TransportHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for TransportHandler {
    fn name(&self) -> &str {
        handler::TRANSPORT
    }

    fn handle(&self, _chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let unavailable = self.ctx.status.status(&inv.protocol, StatusKind::ServiceUnavailable);
        let Some(client) = self.ctx.transports.get(&inv.protocol) else {
            let err = TransportError::UnknownProtocol {
                protocol: inv.protocol.clone(),
            };
            write_back_err(err, unavailable, cb);
            return;
        };

        if inv.ctx.is_expired() {
            let err = TransportError::Timeout {
                endpoint: inv.endpoint.clone(),
            };
            let status = self.ctx.status.status(&inv.protocol, StatusKind::GatewayTimeout);
            write_back_err(err, status, cb);
            return;
        }

        match client.call(&inv.ctx, &inv.endpoint, inv) {
            Ok(body) => {
                inv.reply = Some(body.clone());
                cb(Response::ok(Some(body)));
            }
            Err(e) => {
                debug!(endpoint = %inv.endpoint, protocol = %inv.protocol, error = %e, "Transport call failed");
                let status = e.status().unwrap_or(unavailable);
                write_back_err(e, status, cb);
            }
        }
    }
}
