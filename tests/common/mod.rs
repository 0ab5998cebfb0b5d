// Shared fixtures for the integration suites
#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use parking_lot::Mutex;
use svc_chassis::{
    AppContext, ChainManager, HandlerRegistry, Invocation, Invoker, ServiceType,
    config::MemoryConfigSource,
    core::InvocationContext,
    discovery::{Instance, StaticDiscovery},
    transport::{TransportClient, TransportError, TransportRegistry},
};

/// Transport that fails the first `failures` calls, then answers with the endpoint.
#[derive(Default)]
pub struct MockTransport {
    failures: AtomicUsize,
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }
}

impl TransportClient for MockTransport {
    fn call(
        &self,
        _ctx: &InvocationContext,
        endpoint: &str,
        _inv: &Invocation,
    ) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.to_string());
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connection {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Bytes::from(format!("reply from {endpoint}")))
    }
}

pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub config: Arc<MemoryConfigSource>,
    pub discovery: Arc<StaticDiscovery>,
    pub chains: Arc<ChainManager>,
}

impl TestApp {
    /// Context over `yaml` with `transport` installed for the `rest` protocol.
    pub fn new(yaml: &str, transport: Arc<MockTransport>) -> Self {
        let config = Arc::new(MemoryConfigSource::from_yaml_str(yaml).expect("valid test yaml"));
        let discovery = Arc::new(StaticDiscovery::new());
        let transports = Arc::new(TransportRegistry::new());
        transports.install("rest", transport);

        let ctx = Arc::new(
            AppContext::builder()
                .config(config.clone())
                .discovery(discovery.clone())
                .transports(transports)
                .build()
                .expect("Failed to create AppContext in test"),
        );
        let report = ctx.reload_governance();
        assert!(report.is_clean(), "governance errors: {:?}", report.errors);

        let chains = Arc::new(ChainManager::new(Arc::new(HandlerRegistry::with_builtins(
            Arc::clone(&ctx),
        ))));
        Self {
            ctx,
            config,
            discovery,
            chains,
        }
    }

    pub fn register(&self, service: &str, id: &str, version: &str, address: &str) {
        self.discovery.register(
            Instance::new(id, service)
                .with_version(version)
                .with_endpoint("rest", address),
        );
    }

    pub fn invoker(&self, handlers: &[&str]) -> Invoker {
        self.chains
            .create_chain(ServiceType::Consumer, "default", handlers)
            .expect("chain builds");
        Invoker::new(Arc::clone(&self.chains), "default")
    }
}

pub fn rest_invocation(service: &str) -> Invocation {
    Invocation::new(service, "schema", "op").with_protocol("rest")
}
