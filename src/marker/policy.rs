use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{MatchError, operators::OperatorRegistry};
use crate::core::Invocation;

/// How far a mark travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrafficMarkPolicy {
    /// Propagate the mark downstream in the `x-traffic-mark` header.
    Once,
    /// Re-evaluate at every service.
    #[default]
    PerService,
}

/// `operator -> expression`; every entry must hold.
pub type Predicate = BTreeMap<String, String>;

/// Conjunction of header, query, path and method predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPolicy {
    #[serde(default)]
    pub traffic_mark_policy: TrafficMarkPolicy,
    #[serde(default)]
    pub headers: BTreeMap<String, Predicate>,
    #[serde(default)]
    pub query: BTreeMap<String, Predicate>,
    #[serde(default)]
    pub api_path: Predicate,
    #[serde(default)]
    pub method: Vec<String>,
}

fn all_hold(ops: &OperatorRegistry, predicate: &Predicate, value: &str) -> bool {
    predicate
        .iter()
        .all(|(op, expr)| ops.matches(op, value, expr).unwrap_or(false))
}

impl MatchPolicy {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let mut policy: MatchPolicy = serde_yaml::from_str(yaml)?;
        policy.headers = std::mem::take(&mut policy.headers)
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Ok(policy)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.query.is_empty()
            && self.api_path.is_empty()
            && self.method.is_empty()
    }

    /// Every operator must be known and every regex must compile.
    pub fn validate(&self, name: &str, ops: &OperatorRegistry) -> Result<(), MatchError> {
        let predicates = self
            .headers
            .values()
            .chain(self.query.values())
            .chain(std::iter::once(&self.api_path));
        for predicate in predicates {
            for (op, expr) in predicate {
                ops.validate(op, expr)?;
            }
        }
        if self.method.iter().any(|m| m.trim().is_empty()) {
            return Err(MatchError::InvalidPolicy {
                name: name.to_string(),
                reason: "empty method".to_string(),
            });
        }
        Ok(())
    }

    /// A policy without predicates never matches.
    pub fn matches(&self, inv: &Invocation, ops: &OperatorRegistry) -> bool {
        if self.is_empty() {
            return false;
        }

        for (name, predicate) in &self.headers {
            match inv.header(name) {
                Some(value) if all_hold(ops, predicate, value) => {}
                _ => return false,
            }
        }

        if !self.query.is_empty() {
            let Some(req) = inv.http_request() else {
                return false;
            };
            for (name, predicate) in &self.query {
                match req.query.get(name) {
                    Some(value) if all_hold(ops, predicate, value) => {}
                    _ => return false,
                }
            }
        }

        if !self.api_path.is_empty() {
            match inv.http_path() {
                Some(path) if all_hold(ops, &self.api_path, path) => {}
                _ => return false,
            }
        }

        if !self.method.is_empty() {
            let Some(method) = inv.http_method() else {
                return false;
            };
            let method = method.to_ascii_uppercase();
            if !self
                .method
                .iter()
                .any(|m| m.trim().to_ascii_uppercase() == method)
            {
                return false;
            }
        }

        true
    }
}
