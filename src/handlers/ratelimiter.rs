use std::sync::Arc;

use tracing::debug;

use crate::{
    app_context::AppContext,
    config::ConfigSourceExt,
    core::{Invocation, InvocationError, StatusKind},
    handler::{self, Chain, Handler, ResponseCallback, ServiceType, write_back_err},
    observability::metrics::Metrics,
};

/// Rejects invocations once their limiter runs out of tokens.
///
/// Marked traffic is checked against the rate-limiting policy for its mark.
/// Every invocation is then checked against the most specific
/// `servicecomb.flowcontrol.<type>.qps.limit.*` entry, falling back to the
/// global limit.
#[derive(Debug)]
pub struct RateLimiterHandler {
    ctx: Arc<AppContext>,
    service_type: ServiceType,
}

impl RateLimiterHandler {
    pub fn new(ctx: Arc<AppContext>, service_type: ServiceType) -> Self {
        Self { ctx, service_type }
    }

    /// Limiter key and qps for the invocation, if any limit is configured.
    fn qps_limit(&self, inv: &Invocation) -> Option<(String, i64)> {
        let prefix = format!("servicecomb.flowcontrol.{}.qps", self.service_type);
        let config = self.ctx.config.as_ref();
        if !config.get_bool(&format!("{prefix}.enabled"), true) {
            return None;
        }

        let svc = &inv.microservice_name;
        let candidates = [
            format!("{svc}.{}.{}", inv.schema_id, inv.operation_id),
            format!("{svc}.{}", inv.schema_id),
            svc.clone(),
        ];
        for key in candidates {
            if let Some(rate) = config.get_parsed::<i64>(&format!("{prefix}.limit.{key}")) {
                return Some((format!("{prefix}.limit.{key}"), rate));
            }
        }
        let global = format!("{prefix}.global.limit");
        config.get_parsed::<i64>(&global).map(|rate| (global, rate))
    }

    fn reject(&self, name: String, inv: &Invocation, cb: ResponseCallback<'_>) {
        debug!(limiter = %name, service = %inv.microservice_name, "Rate limited");
        Metrics::record_rate_limited(&name);
        let status = self.ctx.status.status(&inv.protocol, StatusKind::TooManyRequests);
        write_back_err(InvocationError::RateLimited { name }, status, cb);
    }
}

impl Handler for RateLimiterHandler {
    fn name(&self) -> &str {
        match self.service_type {
            ServiceType::Consumer => handler::RATELIMITER_CONSUMER,
            ServiceType::Provider => handler::RATELIMITER_PROVIDER,
        }
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let mark = inv.get_mark().to_string();
        if !mark.is_empty() {
            if let Some(policy) = self.ctx.rate_limit_policies.get(&mark) {
                if !self.ctx.rate_limiters.try_accept(&mark, policy.rate, policy.burst) {
                    self.reject(mark, inv, cb);
                    return;
                }
            }
        }

        if let Some((key, rate)) = self.qps_limit(inv) {
            if !self.ctx.rate_limiters.try_accept(&key, rate, None) {
                self.reject(key, inv, cb);
                return;
            }
        }

        chain.next(inv, cb);
    }
}
