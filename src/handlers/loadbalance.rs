use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    app_context::AppContext,
    config::{ConfigSourceExt, LoadBalancingConfig},
    core::{InvocationError, Invocation, Response, RetryBackoff, StatusKind},
    discovery::{DiscoveryError, InstanceQuery},
    handler::{self, Chain, Handler, ResponseCallback, write_back_err},
    observability::metrics::Metrics,
    policies::{PickInfo, SESSION_STICKINESS},
};

/// Cookie holding the load-balancer session id.
pub const SESSION_COOKIE: &str = "ServiceCombLB";
pub const SESSION_HEADER: &str = "x-session-id";
/// Invocation metadata key the session id is stored under.
pub const SESSION_ID_KEY: &str = "session-id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadBalanceError {
    #[error("unknown load balance strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("no available instance for {service}")]
    NoInstance { service: String },

    #[error("No available instance support [{protocol}] protocol, msName: {service}")]
    ProtocolNotSupported { protocol: String, service: String },

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("retry times expires")]
    RetryExhausted,
}

/// `protocol` or `protocol-port`.
pub fn protocol_endpoint_key(protocol: &str, port: &str) -> String {
    if port.is_empty() {
        protocol.to_string()
    } else {
        format!("{protocol}-{port}")
    }
}

struct Selected {
    endpoint: String,
    instance_id: String,
}

/// Picks an endpoint for the invocation and, when enabled, retries failed calls
/// on the same endpoint and then on newly selected ones.
pub struct LoadBalanceHandler {
    ctx: Arc<AppContext>,
}

impl LoadBalanceHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Session id the caller sent back through the cookie or header.
    fn caller_session(inv: &Invocation) -> Option<String> {
        inv.http_request()
            .and_then(|r| r.cookie(SESSION_COOKIE))
            .or_else(|| inv.header(SESSION_HEADER))
            .map(str::to_string)
    }

    fn select(&self, inv: &mut Invocation, cfg: &LoadBalancingConfig) -> Result<Selected, LoadBalanceError> {
        if inv.strategy.is_empty() {
            inv.strategy = cfg.strategy.clone();
        }
        let strategy = self
            .ctx
            .strategies
            .get(&inv.strategy)
            .ok_or_else(|| LoadBalanceError::UnknownStrategy {
                name: inv.strategy.clone(),
            })?;

        // Only ids the caller sent are bound; a fresh id is handed back in
        // the metadata for the caller to resend.
        let session = Self::caller_session(inv);
        if strategy.name() == SESSION_STICKINESS {
            let id = session
                .clone()
                .or_else(|| inv.metadata.get(SESSION_ID_KEY).cloned())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            inv.metadata.insert(SESSION_ID_KEY.to_string(), id);
        }
        if inv.filters.is_empty() {
            inv.filters = cfg.filters.clone();
        }

        let tags = inv
            .route_tags
            .kv()
            .iter()
            .filter(|(k, _)| k.as_str() != "version" && k.as_str() != "app")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let query = InstanceQuery {
            consumer_id: &inv.source_service_name,
            app_id: &inv.app_id,
            service_name: &inv.microservice_name,
            version: &inv.version,
            tags,
        };
        let mut instances = self.ctx.discovery.find_instances(&query)?;

        for name in &inv.filters {
            match self.ctx.filters.get(name) {
                Some(filter) => instances = filter.filter(instances, inv),
                None => warn!(filter = %name, "Unknown instance filter, skipping"),
            }
        }
        let no_instance = || LoadBalanceError::NoInstance {
            service: inv.microservice_name.clone(),
        };
        if instances.is_empty() {
            return Err(no_instance());
        }

        let info = PickInfo {
            service: &inv.microservice_name,
            session_id: session.as_deref(),
            latency: &self.ctx.latency,
        };
        let idx = strategy.pick(&instances, &info).ok_or_else(no_instance)?;
        let instance = Arc::clone(&instances[idx]);
        Metrics::record_lb_selection(strategy.name(), &inv.microservice_name);

        if inv.protocol.is_empty() {
            let key = format!("servicecomb.references.{}.transport", inv.microservice_name);
            inv.protocol = self.ctx.config.get_string(&key, &instance.default_protocol);
        }
        if inv.protocol.is_empty() {
            if let Some(first) = instance.endpoints.keys().next() {
                inv.protocol = first.clone();
            }
        }

        let key = protocol_endpoint_key(&inv.protocol, &inv.port);
        let endpoint = instance
            .endpoints
            .get(&key)
            .cloned()
            .ok_or_else(|| LoadBalanceError::ProtocolNotSupported {
                protocol: key,
                service: inv.microservice_name.clone(),
            })?;

        debug!(
            service = %inv.microservice_name,
            instance = %instance.instance_id,
            endpoint = %endpoint,
            "Selected endpoint"
        );
        Ok(Selected {
            endpoint,
            instance_id: instance.instance_id.clone(),
        })
    }

    fn complete(&self, inv: &Invocation, instance_id: &str, started: Instant, success: bool) {
        self.ctx
            .latency
            .record(&inv.microservice_name, instance_id, started.elapsed());
        if let Some(strategy) = self.ctx.strategies.get(&inv.strategy) {
            let session = Self::caller_session(inv);
            let info = PickInfo {
                service: &inv.microservice_name,
                session_id: session.as_deref(),
                latency: &self.ctx.latency,
            };
            strategy.on_request_complete(&info, instance_id, success);
        }
    }

    fn unavailable(&self, inv: &Invocation) -> u16 {
        self.ctx.status.status(&inv.protocol, StatusKind::ServiceUnavailable)
    }

    fn handle_once(&self, chain: &Chain, inv: &mut Invocation, cfg: &LoadBalancingConfig, cb: ResponseCallback<'_>) {
        let selected = match self.select(inv, cfg) {
            Ok(s) => s,
            Err(e) => {
                let status = self.unavailable(inv);
                write_back_err(e, status, cb);
                return;
            }
        };
        inv.endpoint = selected.endpoint;

        let started = Instant::now();
        let mut outcome: Option<Response> = None;
        chain.next(inv, Box::new(|r| outcome = Some(r)));
        let resp = outcome.unwrap_or_else(|| Response::ok(None));
        self.complete(inv, &selected.instance_id, started, resp.is_ok());
        cb(resp);
    }

    fn handle_with_retry(
        &self,
        chain: &Chain,
        inv: &mut Invocation,
        cfg: &LoadBalancingConfig,
        cb: ResponseCallback<'_>,
    ) {
        let handler_index = inv.handler_index;
        let mut last: Option<Response> = None;

        for attempt in 0..=cfg.retry_on_next {
            if attempt > 0 {
                Metrics::record_lb_retry(&inv.microservice_name);
            }
            let selected = match self.select(inv, cfg) {
                Ok(s) => s,
                Err(e) => {
                    let status = self.unavailable(inv);
                    write_back_err(e, status, cb);
                    return;
                }
            };

            let mut call_times = 0u32;
            let operation = || -> Result<(), backoff::Error<InvocationError>> {
                if call_times > cfg.retry_on_same {
                    return Err(backoff::Error::permanent(LoadBalanceError::RetryExhausted.into()));
                }
                call_times += 1;
                inv.endpoint = selected.endpoint.clone();
                inv.handler_index = handler_index;

                let started = Instant::now();
                let mut failure: Option<InvocationError> = None;
                chain.next(
                    inv,
                    Box::new(|r| {
                        failure = r.err.clone();
                        last = Some(r);
                    }),
                );
                self.complete(inv, &selected.instance_id, started, failure.is_none());

                match failure {
                    Some(e) => {
                        debug!(
                            service = %inv.microservice_name,
                            endpoint = %selected.endpoint,
                            call = call_times,
                            error = %e,
                            "Call failed"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    None => Ok(()),
                }
            };

            if backoff::retry(RetryBackoff::from_config(&cfg.backoff), operation).is_ok() {
                break;
            }
        }

        cb(last.unwrap_or_else(|| Response::ok(None)));
    }
}

impl Handler for LoadBalanceHandler {
    fn name(&self) -> &str {
        handler::LOADBALANCE
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let cfg = LoadBalancingConfig::from_source(self.ctx.config.as_ref(), &inv.microservice_name);
        if cfg.retry_enabled {
            self.handle_with_retry(chain, inv, &cfg, cb);
        } else {
            self.handle_once(chain, inv, &cfg, cb);
        }
    }
}
