//! Traffic marking: named match policies evaluated against each invocation.
//!
//! The first policy that matches (in lexicographic order of policy name) marks the
//! invocation with its name. Policies using `trafficMarkPolicy: once` also write the
//! mark into the `x-traffic-mark` header so downstream services adopt it.

pub mod operators;
pub mod policy;

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

pub use operators::{OperatorFn, OperatorRegistry};
pub use policy::{MatchPolicy, TrafficMarkPolicy};

use crate::{
    core::{HEADER_TRAFFIC_MARK, Invocation},
    observability::metrics::Metrics,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("unknown match operator: {operator}")]
    UnknownOperator { operator: String },

    #[error("invalid regex {expression}: {reason}")]
    InvalidRegex { expression: String, reason: String },

    #[error("invalid match policy {name}: {reason}")]
    InvalidPolicy { name: String, reason: String },
}

#[derive(Debug)]
pub struct Marker {
    policies: RwLock<BTreeMap<String, MatchPolicy>>,
    operators: Arc<OperatorRegistry>,
}

impl Marker {
    pub fn new(operators: Arc<OperatorRegistry>) -> Self {
        Self {
            policies: RwLock::new(BTreeMap::new()),
            operators,
        }
    }

    pub fn operators(&self) -> &Arc<OperatorRegistry> {
        &self.operators
    }

    pub fn add_policy(&self, name: &str, policy: MatchPolicy) -> Result<(), MatchError> {
        policy.validate(name, &self.operators)?;
        debug!(policy = %name, "Added match policy");
        self.policies.write().insert(name.to_string(), policy);
        Ok(())
    }

    pub fn add_policy_yaml(&self, name: &str, yaml: &str) -> Result<(), MatchError> {
        let policy = MatchPolicy::from_yaml(yaml).map_err(|e| MatchError::InvalidPolicy {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.add_policy(name, policy)
    }

    pub fn remove_policy(&self, name: &str) -> Option<MatchPolicy> {
        self.policies.write().remove(name)
    }

    /// Swap in a complete policy set.
    pub fn replace_policies(&self, policies: BTreeMap<String, MatchPolicy>) {
        info!(count = policies.len(), "Replaced match policies");
        *self.policies.write() = policies;
    }

    pub fn policy(&self, name: &str) -> Option<MatchPolicy> {
        self.policies.read().get(name).cloned()
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.read().keys().cloned().collect()
    }

    /// Name of the first matching policy.
    pub fn evaluate(&self, inv: &Invocation) -> Option<(String, TrafficMarkPolicy)> {
        self.policies
            .read()
            .iter()
            .find(|(_, policy)| policy.matches(inv, &self.operators))
            .map(|(name, policy)| (name.clone(), policy.traffic_mark_policy))
    }

    /// Set the invocation's mark from an upstream header or from policy evaluation.
    pub fn mark(&self, inv: &mut Invocation) {
        if let Some(upstream) = inv.header(HEADER_TRAFFIC_MARK).map(str::to_string) {
            if !upstream.is_empty() {
                inv.mark(upstream);
                return;
            }
        }

        let Some((name, scope)) = self.evaluate(inv) else {
            return;
        };
        if scope == TrafficMarkPolicy::Once {
            inv.set_header(HEADER_TRAFFIC_MARK, name.clone());
        }
        debug!(service = %inv.microservice_name, mark = %name, "Marked invocation");
        Metrics::record_traffic_mark(&name);
        inv.mark(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Args, HttpRequest};

    fn marker() -> Marker {
        Marker::new(Arc::new(OperatorRegistry::new()))
    }

    fn inv_with_user(user: &str) -> Invocation {
        Invocation::new("svc", "", "").with_args(Args::Http(
            HttpRequest::new("GET", "/").with_header("user", user),
        ))
    }

    #[test]
    fn test_mark_first_match_in_name_order() {
        let m = marker();
        m.add_policy_yaml("b-policy", "headers:\n  user:\n    contains: ja\n").unwrap();
        m.add_policy_yaml("a-policy", "headers:\n  user:\n    exact: jason\n").unwrap();

        let mut inv = inv_with_user("jason");
        m.mark(&mut inv);
        assert_eq!(inv.get_mark(), "a-policy");

        let mut inv = inv_with_user("jack");
        m.mark(&mut inv);
        assert_eq!(inv.get_mark(), "b-policy");
    }

    #[test]
    fn test_no_match_leaves_unmarked() {
        let m = marker();
        m.add_policy_yaml("vip", "headers:\n  user:\n    exact: jason\n").unwrap();
        let mut inv = inv_with_user("bob");
        m.mark(&mut inv);
        assert_eq!(inv.get_mark(), "");
    }

    #[test]
    fn test_once_policy_propagates_header() {
        let m = marker();
        m.add_policy_yaml(
            "vip",
            "trafficMarkPolicy: once\nheaders:\n  user:\n    exact: jason\n",
        )
        .unwrap();
        let mut inv = inv_with_user("jason");
        m.mark(&mut inv);
        assert_eq!(inv.header(HEADER_TRAFFIC_MARK), Some("vip"));
    }

    #[test]
    fn test_upstream_mark_adopted() {
        let m = marker();
        m.add_policy_yaml("local", "headers:\n  user:\n    exact: jason\n").unwrap();
        let mut inv = inv_with_user("jason");
        inv.set_header(HEADER_TRAFFIC_MARK, "upstream");
        m.mark(&mut inv);
        assert_eq!(inv.get_mark(), "upstream");
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let m = marker();
        assert!(m.add_policy_yaml("bad", "headers:\n  user:\n    regex: \"[\"\n").is_err());
        assert!(m.add_policy_yaml("bad", "headers: [").is_err());
        assert!(m.policy("bad").is_none());
    }
}
