//! Rule-based routing: picks version/app tags for the target service.

pub mod rule;
pub mod weight;

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;
use tracing::{debug, warn};

pub use rule::{Match, RouteRule, RouteRuleStore, RouteTag, sort_rules};
pub use weight::WeightPool;

use crate::{
    core::{Invocation, RouteTags},
    marker::{OperatorRegistry, policy::Predicate},
    observability::metrics::Metrics,
};

pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_APP: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no matched route rule for {service}")]
    NoMatchedRule { service: String },
}

/// Identity of the calling service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub app: String,
    pub tags: BTreeMap<String, String>,
}

impl SourceInfo {
    pub fn from_invocation(inv: &Invocation) -> Self {
        Self {
            name: inv.source_service_name.clone(),
            app: inv.source_app.clone(),
            tags: inv.source_tags.clone(),
        }
    }

    fn app_or_default(&self) -> &str {
        if self.app.is_empty() {
            DEFAULT_APP
        } else {
            &self.app
        }
    }
}

#[derive(Debug)]
pub struct Router {
    store: RouteRuleStore,
    pool: WeightPool,
    operators: Arc<OperatorRegistry>,
}

impl Router {
    pub fn new(operators: Arc<OperatorRegistry>) -> Self {
        Self {
            store: RouteRuleStore::new(),
            pool: WeightPool::new(),
            operators,
        }
    }

    pub fn store(&self) -> &RouteRuleStore {
        &self.store
    }

    pub fn pool(&self) -> &WeightPool {
        &self.pool
    }

    /// Choose route tags for `inv`.
    ///
    /// Without rules the default version and app apply. With rules, the first
    /// matching rule (highest precedence first) decides; no match is an error.
    pub fn route(
        &self,
        headers: &BTreeMap<String, String>,
        source: &SourceInfo,
        inv: &mut Invocation,
    ) -> Result<(), RouteError> {
        let service = inv.microservice_name.clone();
        let rules = self.store.rules(&service);
        if rules.is_empty() {
            apply_defaults(inv, source);
            return Ok(());
        }

        for rule in &rules {
            if !self.is_match(&rule.matcher, headers, source, inv) {
                continue;
            }
            let Some(idx) = self.pool.fit_rate(&rule.route, &service) else {
                continue;
            };
            let tag = &rule.route[idx];
            apply_tag(inv, tag, source);
            debug!(service = %service, tags = %inv.route_tags.label(), "Routed invocation");
            Metrics::record_route_decision(&service, inv.route_tags.label());
            return Ok(());
        }

        Err(RouteError::NoMatchedRule { service })
    }

    /// Source name, then source tags, then header predicates.
    pub fn is_match(
        &self,
        matcher: &Match,
        headers: &BTreeMap<String, String>,
        source: &SourceInfo,
        inv: &Invocation,
    ) -> bool {
        let referred;
        let matcher = if matcher.refer.is_empty() {
            matcher
        } else {
            match self.store.template(&matcher.refer) {
                Some(t) => {
                    referred = t;
                    &referred
                }
                None => {
                    warn!(template = %matcher.refer, "Route rule refers to unknown source template");
                    return false;
                }
            }
        };

        if !matcher.source.is_empty() && matcher.source != source.name {
            return false;
        }
        if matcher
            .source_tags
            .iter()
            .any(|(k, v)| source.tags.get(k) != Some(v))
        {
            return false;
        }

        if !self.headers_hold(&matcher.headers, |key| {
            headers.get(&key.to_ascii_lowercase()).map(String::as_str)
        }) {
            return false;
        }

        if !matcher.http_headers.is_empty() {
            let Some(req) = inv.http_request() else {
                return false;
            };
            if !self.headers_hold(&matcher.http_headers, |k| req.headers.get(k)) {
                return false;
            }
        }
        true
    }

    fn headers_hold<'a>(
        &self,
        predicates: &BTreeMap<String, Predicate>,
        lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> bool {
        predicates.iter().all(|(name, predicate)| {
            let Some(value) = lookup(name) else {
                return false;
            };
            predicate
                .iter()
                .all(|(op, expr)| self.operators.matches(op, value, expr).unwrap_or(false))
        })
    }
}

fn apply_defaults(inv: &mut Invocation, source: &SourceInfo) {
    if inv.version.is_empty() {
        inv.version = DEFAULT_VERSION.to_string();
    }
    if inv.app_id.is_empty() {
        inv.app_id = source.app_or_default().to_string();
    }
    inv.route_tags = RouteTags::new(BTreeMap::from([
        ("version".to_string(), inv.version.clone()),
        ("app".to_string(), inv.app_id.clone()),
    ]));
}

fn apply_tag(inv: &mut Invocation, tag: &RouteTag, source: &SourceInfo) {
    let mut kv = tag.tags.clone();
    let version = kv
        .entry("version".to_string())
        .or_insert_with(|| DEFAULT_VERSION.to_string())
        .clone();
    let app = kv
        .entry("app".to_string())
        .or_insert_with(|| source.app_or_default().to_string())
        .clone();
    inv.version = version;
    inv.app_id = app;
    inv.route_tags = RouteTags::new(kv);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(Arc::new(OperatorRegistry::new()))
    }

    fn source(name: &str) -> SourceInfo {
        SourceInfo {
            name: name.to_string(),
            app: "shop".to_string(),
            tags: BTreeMap::from([("env".to_string(), "prod".to_string())]),
        }
    }

    #[test]
    fn test_defaults_without_rules() {
        let r = router();
        let mut inv = Invocation::new("orders", "", "");
        r.route(&BTreeMap::new(), &source("web"), &mut inv).unwrap();
        assert_eq!(inv.version, DEFAULT_VERSION);
        assert_eq!(inv.app_id, "shop");
        assert_eq!(inv.route_tags.get("version"), Some("latest"));

        let mut inv = Invocation::new("orders", "", "");
        r.route(&BTreeMap::new(), &SourceInfo::default(), &mut inv).unwrap();
        assert_eq!(inv.app_id, DEFAULT_APP);
    }

    #[test]
    fn test_no_matching_rule_is_error() {
        let r = router();
        r.store()
            .load_yaml(
                r#"
routeRule:
  orders:
    - match:
        source: admin
      route:
        - tags: {version: "2.0"}
          weight: 100
"#,
            )
            .unwrap();
        let mut inv = Invocation::new("orders", "", "");
        assert_eq!(
            r.route(&BTreeMap::new(), &source("web"), &mut inv),
            Err(RouteError::NoMatchedRule {
                service: "orders".to_string()
            })
        );
    }

    #[test]
    fn test_header_and_source_tag_match() {
        let r = router();
        r.store()
            .load_yaml(
                r#"
routeRule:
  orders:
    - precedence: 2
      match:
        source: web
        sourceTags: {env: prod}
        headers:
          user:
            exact: jason
      route:
        - tags: {version: "2.0"}
          weight: 100
    - precedence: 1
      route:
        - tags: {version: "1.0", app: legacy}
          weight: 100
"#,
            )
            .unwrap();

        let headers = BTreeMap::from([("user".to_string(), "jason".to_string())]);
        let mut inv = Invocation::new("orders", "", "");
        r.route(&headers, &source("web"), &mut inv).unwrap();
        assert_eq!(inv.version, "2.0");
        assert_eq!(inv.app_id, "shop");

        let mut inv = Invocation::new("orders", "", "");
        r.route(&BTreeMap::new(), &source("web"), &mut inv).unwrap();
        assert_eq!(inv.version, "1.0");
        assert_eq!(inv.app_id, "legacy");
        assert_eq!(inv.route_tags.label(), "app:legacy|version:1.0");
    }

    #[test]
    fn test_refer_uses_template() {
        let r = router();
        r.store()
            .load_yaml(
                r#"
routeRule:
  orders:
    - match:
        refer: beta
      route:
        - tags: {version: "3.0"}
          weight: 100
sourceTemplate:
  beta:
    headers:
      user:
        regex: "^beta-"
"#,
            )
            .unwrap();

        let headers = BTreeMap::from([("user".to_string(), "beta-42".to_string())]);
        let mut inv = Invocation::new("orders", "", "");
        r.route(&headers, &source("web"), &mut inv).unwrap();
        assert_eq!(inv.version, "3.0");

        let mut inv = Invocation::new("orders", "", "");
        assert!(r.route(&BTreeMap::new(), &source("web"), &mut inv).is_err());
    }
}
