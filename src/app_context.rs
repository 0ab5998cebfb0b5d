use std::{path::Path, sync::Arc};

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    bizkeeper::FallbackRegistry,
    config::{ConfigSource, GovernanceReport, MemoryConfigSource, reload_governance},
    core::{CircuitRegistry, RateLimitPolicies, RateLimiterRegistry, StatusRegistry},
    discovery::{ServiceDiscovery, StaticDiscovery},
    fault::FaultInjector,
    marker::{Marker, OperatorRegistry},
    observability::{
        metrics::init_metrics,
        tracer::{NoopTracer, TracingBackend},
    },
    policies::{FilterRegistry, LatencyStats, StrategyRegistry},
    router::Router,
    transport::TransportRegistry,
};

/// Error type for AppContext builder
#[derive(Debug)]
pub struct AppContextBuildError(&'static str);

impl std::fmt::Display for AppContextBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing required field: {}", self.0)
    }
}

impl std::error::Error for AppContextBuildError {}

/// Shared services handed to every built-in handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<dyn ConfigSource>,
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub transports: Arc<TransportRegistry>,
    pub operators: Arc<OperatorRegistry>,
    pub marker: Arc<Marker>,
    pub router: Arc<Router>,
    pub rate_limiters: Arc<RateLimiterRegistry>,
    pub rate_limit_policies: Arc<RateLimitPolicies>,
    pub circuits: Arc<CircuitRegistry>,
    pub fallbacks: Arc<FallbackRegistry>,
    pub status: Arc<StatusRegistry>,
    pub tracer: Arc<dyn TracingBackend>,
    pub fault_injector: Arc<FaultInjector>,
    pub strategies: Arc<StrategyRegistry>,
    pub filters: Arc<FilterRegistry>,
    pub latency: Arc<LatencyStats>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("transports", &self.transports)
            .field("marker", &self.marker)
            .field("circuits", &self.circuits.len())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Build a context from a YAML file. A top-level `routeRule`/`sourceTemplate`
    /// section in the same file is loaded into the router.
    pub fn from_config_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        init_metrics();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let source = MemoryConfigSource::from_yaml_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let ctx = Self::builder()
            .config(Arc::new(source))
            .discovery(Arc::new(StaticDiscovery::new()))
            .build()?;

        let doc: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        if doc.get("routeRule").is_some() || doc.get("sourceTemplate").is_some() {
            ctx.router
                .store()
                .load_yaml(&contents)
                .context("loading route rules")?;
        }

        let report = ctx.reload_governance();
        info!(
            path = %path.display(),
            governance_errors = report.errors.len(),
            "Loaded configuration file"
        );
        Ok(ctx)
    }

    /// Re-read match policies and rate limiting policies from the config source.
    pub fn reload_governance(&self) -> GovernanceReport {
        reload_governance(
            self.config.as_ref(),
            &self.marker,
            &self.rate_limit_policies,
            &self.rate_limiters,
        )
    }
}

#[derive(Default)]
pub struct AppContextBuilder {
    config: Option<Arc<dyn ConfigSource>>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    transports: Option<Arc<TransportRegistry>>,
    operators: Option<Arc<OperatorRegistry>>,
    tracer: Option<Arc<dyn TracingBackend>>,
    strategies: Option<Arc<StrategyRegistry>>,
    filters: Option<Arc<FilterRegistry>>,
    fallbacks: Option<Arc<FallbackRegistry>>,
    status: Option<Arc<StatusRegistry>>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn transports(mut self, transports: Arc<TransportRegistry>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn operators(mut self, operators: Arc<OperatorRegistry>) -> Self {
        self.operators = Some(operators);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn TracingBackend>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn strategies(mut self, strategies: Arc<StrategyRegistry>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn fallbacks(mut self, fallbacks: Arc<FallbackRegistry>) -> Self {
        self.fallbacks = Some(fallbacks);
        self
    }

    pub fn status(mut self, status: Arc<StatusRegistry>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> Result<AppContext, AppContextBuildError> {
        let operators = self
            .operators
            .unwrap_or_else(|| Arc::new(OperatorRegistry::new()));
        debug!("Building application context");

        Ok(AppContext {
            config: self.config.ok_or(AppContextBuildError("config"))?,
            discovery: self.discovery.ok_or(AppContextBuildError("discovery"))?,
            transports: self.transports.unwrap_or_default(),
            marker: Arc::new(Marker::new(Arc::clone(&operators))),
            router: Arc::new(Router::new(Arc::clone(&operators))),
            operators,
            rate_limiters: Arc::new(RateLimiterRegistry::new()),
            rate_limit_policies: Arc::new(RateLimitPolicies::new()),
            circuits: Arc::new(CircuitRegistry::new()),
            fallbacks: self.fallbacks.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            tracer: self.tracer.unwrap_or_else(|| Arc::new(NoopTracer)),
            fault_injector: Arc::new(FaultInjector::new()),
            strategies: self.strategies.unwrap_or_default(),
            filters: self.filters.unwrap_or_default(),
            latency: Arc::new(LatencyStats::new()),
        })
    }
}
