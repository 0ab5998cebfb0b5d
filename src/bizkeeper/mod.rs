//! Circuit-breaker command naming, per-command configuration and fallbacks.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    config::{ConfigSource, ConfigSourceExt},
    core::{BreakerError, CircuitBreakerConfig, Invocation, Response, StatusKind},
    handler::ServiceType,
};

pub const FALLBACK_THROW_EXCEPTION: &str = "throwexception";
pub const FALLBACK_RETURN_NULL: &str = "returnnull";

/// `[source.]<Consumer|Provider>.<service>[.<schema>[.<operation>]]`
pub fn command_name(
    source: &str,
    service_type: ServiceType,
    service: &str,
    schema: &str,
    operation: &str,
) -> String {
    let mut name = String::new();
    if !source.is_empty() {
        name.push_str(source);
        name.push('.');
    }
    name.push_str(service_type.as_str());
    name.push('.');
    name.push_str(service);
    if !schema.is_empty() {
        name.push('.');
        name.push_str(schema);
        if !operation.is_empty() {
            name.push('.');
            name.push_str(operation);
        }
    }
    name
}

/// Breaker settings plus fallback selection for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConfig {
    pub breaker: CircuitBreakerConfig,
    pub fallback_enabled: bool,
    pub force_fallback: bool,
    pub fallback_policy: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            fallback_enabled: false,
            force_fallback: false,
            fallback_policy: FALLBACK_THROW_EXCEPTION.to_string(),
        }
    }
}

impl CommandConfig {
    /// Read isolation, circuitBreaker, fallback and fallbackpolicy keys; service keys win.
    pub fn from_source(source: &dyn ConfigSource, service_type: ServiceType, service: &str) -> Self {
        let defaults = Self::default();
        let get = |section: &str, suffix: &str| {
            source.get_scoped(&format!("servicecomb.{section}.{service_type}"), service, suffix)
        };
        let flag = |section: &str, suffix: &str, default: bool| {
            get(section, suffix)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };
        let num = |section: &str, suffix: &str, default: u64| {
            get(section, suffix)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let d = &defaults.breaker;
        let timeout_enabled = flag("isolation", "timeout.enabled", false);
        let mut max_concurrent_requests = num(
            "isolation",
            "maxConcurrentRequests",
            d.max_concurrent_requests as u64,
        )
        .min(u32::MAX as u64) as u32;
        if max_concurrent_requests == 0 {
            warn!(service = %service, "maxConcurrentRequests of 0 would reject every call, using 1");
            max_concurrent_requests = 1;
        }
        let breaker = CircuitBreakerConfig {
            timeout: timeout_enabled
                .then(|| Duration::from_millis(num("isolation", "timeoutInMilliseconds", 30_000))),
            max_concurrent_requests,
            enabled: flag("circuitBreaker", "enabled", d.enabled),
            force_open: flag("circuitBreaker", "forceOpen", d.force_open),
            force_close: flag("circuitBreaker", "forceClose", d.force_close),
            sleep_window: Duration::from_millis(num(
                "circuitBreaker",
                "sleepWindowInMilliseconds",
                d.sleep_window.as_millis() as u64,
            )),
            request_volume_threshold: num(
                "circuitBreaker",
                "requestVolumeThreshold",
                d.request_volume_threshold as u64,
            ) as u32,
            error_threshold_percentage: num(
                "circuitBreaker",
                "errorThresholdPercentage",
                d.error_threshold_percentage as u64,
            ) as u32,
            metrics_window: d.metrics_window,
        };

        Self {
            breaker,
            fallback_enabled: flag("fallback", "enabled", defaults.fallback_enabled),
            force_fallback: flag("fallback", "force", defaults.force_fallback),
            fallback_policy: get("fallbackpolicy", "policy")
                .map(|p| p.trim().to_ascii_lowercase())
                .unwrap_or(defaults.fallback_policy),
        }
    }
}

/// Produces the response delivered instead of a breaker error.
pub type FallbackFn = Arc<dyn Fn(&Invocation, &BreakerError) -> Response + Send + Sync>;

/// Named fallback policies.
pub struct FallbackRegistry {
    policies: RwLock<HashMap<String, FallbackFn>>,
}

impl fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.policies.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("FallbackRegistry")
            .field("policies", &names)
            .finish()
    }
}

impl FallbackRegistry {
    pub fn new() -> Self {
        let registry = Self {
            policies: RwLock::new(HashMap::new()),
        };
        registry.install(
            FALLBACK_THROW_EXCEPTION,
            Arc::new(|_inv: &Invocation, err: &BreakerError| {
                Response::error(StatusKind::ServiceUnavailable.http_code(), err.clone())
            }),
        );
        registry.install(
            FALLBACK_RETURN_NULL,
            Arc::new(|_inv: &Invocation, _err: &BreakerError| Response::ok(None)),
        );
        registry
    }

    pub fn install(&self, name: &str, fallback: FallbackFn) {
        debug!(policy = %name, "Installed fallback policy");
        self.policies
            .write()
            .insert(name.to_ascii_lowercase(), fallback);
    }

    /// Fallback for `config`, or `None` when fallback is disabled.
    pub fn resolve(&self, config: &CommandConfig) -> Option<FallbackFn> {
        if !config.fallback_enabled && !config.force_fallback {
            return None;
        }
        let policies = self.policies.read();
        policies
            .get(&config.fallback_policy)
            .or_else(|| policies.get(FALLBACK_THROW_EXCEPTION))
            .cloned()
    }
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
