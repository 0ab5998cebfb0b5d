use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{config::ConfigError, core::invocation::tags_label, marker::policy::Predicate};

/// One weighted destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTag {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub weight: u32,
}

impl RouteTag {
    pub fn new(tags: &[(&str, &str)], weight: u32) -> Self {
        Self {
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            weight,
        }
    }

    pub fn label(&self) -> String {
        tags_label(&self.tags)
    }
}

/// Conditions on the caller. `refer` points to a named source template instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    #[serde(default)]
    pub refer: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Predicate>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, Predicate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub precedence: i32,
    #[serde(default)]
    pub route: Vec<RouteTag>,
    #[serde(default, rename = "match")]
    pub matcher: Match,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouterDocument {
    #[serde(default)]
    route_rule: HashMap<String, Vec<RouteRule>>,
    #[serde(default)]
    source_template: HashMap<String, Match>,
}

/// Descending precedence; equal precedences keep their configured order.
pub fn sort_rules(rules: &mut [RouteRule]) {
    rules.sort_by(|a, b| b.precedence.cmp(&a.precedence));
}

pub fn validate_rules(service: &str, rules: &[RouteRule]) -> Result<(), ConfigError> {
    for rule in rules {
        if rule.route.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: format!("route rule for {service} has no destination"),
            });
        }
        let total: u32 = rule.route.iter().map(|t| t.weight).sum();
        if rule.route.iter().any(|t| t.weight > 100) || total > 100 {
            return Err(ConfigError::InvalidValue {
                field: format!("routeRule.{service}.route.weight"),
                value: total.to_string(),
                reason: "weights must be within 0..=100 and sum to at most 100".to_string(),
            });
        }
    }
    Ok(())
}

/// Route rules per destination service plus shared source templates.
#[derive(Debug, Default)]
pub struct RouteRuleStore {
    rules: RwLock<HashMap<String, Vec<RouteRule>>>,
    templates: RwLock<HashMap<String, Match>>,
}

impl RouteRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rules and templates from a `routeRule`/`sourceTemplate` document.
    pub fn load_yaml(&self, yaml: &str) -> Result<(), ConfigError> {
        let doc: RouterDocument = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            what: "route rules".to_string(),
            reason: e.to_string(),
        })?;

        let mut rules = doc.route_rule;
        for (service, list) in rules.iter_mut() {
            validate_rules(service, list)?;
            sort_rules(list);
        }

        info!(
            services = rules.len(),
            templates = doc.source_template.len(),
            "Loaded route rules"
        );
        *self.rules.write() = rules;
        *self.templates.write() = doc.source_template;
        Ok(())
    }

    pub fn set_rules(&self, service: &str, mut rules: Vec<RouteRule>) -> Result<(), ConfigError> {
        validate_rules(service, &rules)?;
        sort_rules(&mut rules);
        self.rules.write().insert(service.to_string(), rules);
        Ok(())
    }

    pub fn remove_rules(&self, service: &str) -> Option<Vec<RouteRule>> {
        self.rules.write().remove(service)
    }

    /// Rules for `service`, highest precedence first.
    pub fn rules(&self, service: &str) -> Vec<RouteRule> {
        self.rules.read().get(service).cloned().unwrap_or_default()
    }

    pub fn set_template(&self, name: &str, template: Match) {
        self.templates.write().insert(name.to_string(), template);
    }

    pub fn template(&self, name: &str) -> Option<Match> {
        self.templates.read().get(name).cloned()
    }
}
