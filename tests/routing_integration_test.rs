//! Rule-based routing ahead of load balancing.

mod common;

use std::collections::HashMap;

use common::{MockTransport, TestApp, rest_invocation};
use svc_chassis::{
    InvocationError,
    router::{RouteError, rule::RouteRule},
};

const RULES: &str = r#"
routeRule:
  orders:
    - precedence: 1
      route:
        - tags: {version: "1.0"}
          weight: 80
        - tags: {version: "2.0"}
          weight: 20
    - precedence: 2
      match:
        headers:
          user:
            exact: beta
      route:
        - tags: {version: "2.0"}
          weight: 100
"#;

fn app() -> (TestApp, std::sync::Arc<MockTransport>) {
    let transport = MockTransport::healthy();
    let app = TestApp::new("servicecomb: {}", transport.clone());
    app.register("orders", "v1", "1.0", "10.0.0.1:8080");
    app.register("orders", "v2", "2.0", "10.0.0.2:8080");
    app.ctx.router.store().load_yaml(RULES).unwrap();
    (app, transport)
}

#[test]
fn test_weighted_split() {
    let (app, transport) = app();
    let invoker = app.invoker(&["router", "loadbalance", "transport"]);

    for _ in 0..100 {
        let mut inv = rest_invocation("orders");
        invoker.invoke(&mut inv).unwrap();
    }

    let mut hits: HashMap<String, usize> = HashMap::new();
    for endpoint in transport.endpoints() {
        *hits.entry(endpoint).or_default() += 1;
    }
    assert_eq!(hits.get("10.0.0.1:8080"), Some(&80));
    assert_eq!(hits.get("10.0.0.2:8080"), Some(&20));
}

#[test]
fn test_higher_precedence_rule_wins() {
    let (app, transport) = app();
    let invoker = app.invoker(&["router", "loadbalance", "transport"]);

    for _ in 0..5 {
        let mut inv = rest_invocation("orders");
        inv.set_header("user", "beta");
        invoker.invoke(&mut inv).unwrap();
        assert_eq!(inv.version, "2.0");
    }
    assert!(transport.endpoints().iter().all(|e| e == "10.0.0.2:8080"));
}

#[test]
fn test_rules_sorted_on_load() {
    let (app, _transport) = app();
    let rules: Vec<RouteRule> = app.ctx.router.store().rules("orders");
    let precedences: Vec<i32> = rules.iter().map(|r| r.precedence).collect();
    assert_eq!(precedences, vec![2, 1]);
}

#[test]
fn test_no_rules_routes_to_latest() {
    let transport = MockTransport::healthy();
    let app = TestApp::new("servicecomb: {}", transport.clone());
    app.register("orders", "v1", "1.0", "10.0.0.1:8080");
    app.register("orders", "v2", "2.0", "10.0.0.2:8080");
    let invoker = app.invoker(&["router", "loadbalance", "transport"]);

    let mut inv = rest_invocation("orders");
    invoker.invoke(&mut inv).unwrap();
    assert_eq!(inv.version, "latest");
    assert_eq!(transport.endpoints(), vec!["10.0.0.2:8080".to_string()]);
}

#[test]
fn test_unmatched_rules_fail_with_route_error() {
    let transport = MockTransport::healthy();
    let app = TestApp::new("servicecomb: {}", transport.clone());
    app.register("orders", "v1", "1.0", "10.0.0.1:8080");
    app.ctx
        .router
        .store()
        .load_yaml(
            r#"
routeRule:
  orders:
    - match:
        source: billing
      route:
        - tags: {version: "1.0"}
          weight: 100
"#,
        )
        .unwrap();
    let invoker = app.invoker(&["router", "loadbalance", "transport"]);

    let mut inv = rest_invocation("orders").with_source("web", "shop");
    let err = invoker.invoke(&mut inv).unwrap_err();
    assert_eq!(
        err,
        InvocationError::Route(RouteError::NoMatchedRule {
            service: "orders".to_string()
        })
    );
}
