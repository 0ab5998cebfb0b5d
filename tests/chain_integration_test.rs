//! Chain construction, ordering and registry rules.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use svc_chassis::{
    Chain, ChainManager, Handler, HandlerRegistry, Invocation, InvocationError, Invoker,
    ServiceType,
    core::Response,
    handler::{self, HandlerError, ResponseCallback},
};

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Handler for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        self.log.lock().push(self.name);
        chain.next(inv, cb);
    }
}

struct ShortCircuit;

impl Handler for ShortCircuit {
    fn name(&self) -> &str {
        "short"
    }

    fn handle(&self, _chain: &Chain, _inv: &mut Invocation, cb: ResponseCallback<'_>) {
        cb(Response::error(
            418,
            InvocationError::Application("teapot".to_string()),
        ));
    }
}

fn registry_with(log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::new();
    for name in ["first", "second", "third"] {
        let log = Arc::clone(log);
        registry
            .register_handler(
                name,
                Arc::new(move || {
                    Arc::new(Recorder {
                        name,
                        log: Arc::clone(&log),
                    }) as Arc<dyn Handler>
                }),
            )
            .unwrap();
    }
    registry
        .register_handler("short", Arc::new(|| Arc::new(ShortCircuit) as Arc<dyn Handler>))
        .unwrap();
    Arc::new(registry)
}

#[test]
fn test_handlers_run_in_configured_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chains = Arc::new(ChainManager::new(registry_with(&log)));
    chains
        .create_chain(ServiceType::Consumer, "default", &["third", "first", "second"])
        .unwrap();

    let invoker = Invoker::new(Arc::clone(&chains), "default");
    let mut inv = Invocation::new("orders", "schema", "op");
    let resp = invoker.invoke(&mut inv).unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(*log.lock(), vec!["third", "first", "second"]);
}

#[test]
fn test_chain_reused_across_invocations() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chains = Arc::new(ChainManager::new(registry_with(&log)));
    let created = chains
        .create_chain(ServiceType::Consumer, "default", &["first", "second"])
        .unwrap();

    let invoker = Invoker::new(Arc::clone(&chains), "default");
    for _ in 0..3 {
        let mut inv = Invocation::new("orders", "schema", "op");
        invoker.invoke(&mut inv).unwrap();
    }

    let cached = chains.get_chain(ServiceType::Consumer, "default").unwrap();
    assert!(Arc::ptr_eq(&created, &cached));
    assert_eq!(log.lock().len(), 6);
}

#[test]
fn test_short_circuit_skips_later_handlers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chains = Arc::new(ChainManager::new(registry_with(&log)));
    chains
        .create_chain(ServiceType::Consumer, "default", &["first", "short", "second"])
        .unwrap();

    let invoker = Invoker::new(Arc::clone(&chains), "default");
    let mut inv = Invocation::new("orders", "schema", "op");
    let err = invoker.invoke(&mut inv).unwrap_err();

    assert_eq!(err, InvocationError::Application("teapot".to_string()));
    assert_eq!(*log.lock(), vec!["first"]);
}

#[test]
fn test_unknown_handler_fails_chain_creation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chains = ChainManager::new(registry_with(&log));
    let err = chains
        .create_chain(ServiceType::Consumer, "broken", &["first", "missing"])
        .unwrap_err();

    assert_eq!(
        err,
        HandlerError::UnknownHandler {
            name: "missing".to_string()
        }
    );
    assert!(chains.get_chain(ServiceType::Consumer, "broken").is_err());
}

#[test]
fn test_missing_chain_is_an_invocation_error() {
    let chains = Arc::new(ChainManager::new(Arc::new(HandlerRegistry::new())));
    let invoker = Invoker::new(chains, "nope");
    let mut inv = Invocation::new("orders", "schema", "op");

    let err = invoker.invoke(&mut inv).unwrap_err();
    assert!(matches!(
        err,
        InvocationError::Handler(HandlerError::ChainNotFound { .. })
    ));
}

#[test]
fn test_builtin_names_are_reserved() {
    let registry = HandlerRegistry::new();
    for name in handler::BUILTIN_HANDLERS {
        let err = registry
            .register_handler(name, Arc::new(|| Arc::new(ShortCircuit) as Arc<dyn Handler>))
            .unwrap_err();
        assert!(matches!(err, HandlerError::ViolatesBuiltin { .. }));
    }
}

#[test]
fn test_duplicate_registration_rejected() {
    let registry = HandlerRegistry::new();
    let factory = || Arc::new(ShortCircuit) as Arc<dyn Handler>;
    registry.register_handler("custom", Arc::new(factory)).unwrap();

    let err = registry
        .register_handler("custom", Arc::new(factory))
        .unwrap_err();
    assert_eq!(
        err,
        HandlerError::Duplicated {
            name: "custom".to_string()
        }
    );
}

#[test]
fn test_chains_are_separated_by_service_type() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chains = ChainManager::new(registry_with(&log));
    chains
        .create_chain(ServiceType::Provider, "default", &["first"])
        .unwrap();

    assert!(chains.get_chain(ServiceType::Provider, "default").is_ok());
    assert!(chains.get_chain(ServiceType::Consumer, "default").is_err());
}
