use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{ConfigError, ConfigSource};
use crate::{
    core::{RateLimitPolicies, RateLimitPolicy, RateLimiterRegistry},
    marker::{MatchPolicy, Marker},
};

pub const MATCH_PREFIX: &str = "servicecomb.match.";
pub const RATE_LIMITING_PREFIX: &str = "servicecomb.rateLimiting.";

/// Outcome of a governance reload; bad keys are reported, not fatal.
#[derive(Debug, Default)]
pub struct GovernanceReport {
    pub match_policies: usize,
    pub rate_limit_policies: usize,
    pub errors: Vec<(String, ConfigError)>,
}

impl GovernanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Policy names are the single key segment after the prefix.
fn policy_entries(source: &dyn ConfigSource, prefix: &str) -> Vec<(String, String, String)> {
    source
        .keys_with_prefix(prefix)
        .into_iter()
        .filter_map(|key| {
            let name = key.strip_prefix(prefix)?.to_string();
            if name.is_empty() || name.contains('.') {
                return None;
            }
            let value = source.get(&key)?;
            Some((key, name, value))
        })
        .collect()
}

/// Rebuild match policies and mark-scoped rate limits from the config source.
pub fn reload_governance(
    source: &dyn ConfigSource,
    marker: &Marker,
    policies: &RateLimitPolicies,
    limiters: &RateLimiterRegistry,
) -> GovernanceReport {
    let mut report = GovernanceReport::default();

    let mut match_policies = BTreeMap::new();
    for (key, name, yaml) in policy_entries(source, MATCH_PREFIX) {
        let parsed = MatchPolicy::from_yaml(&yaml)
            .map_err(|e| ConfigError::Parse {
                what: key.clone(),
                reason: e.to_string(),
            })
            .and_then(|p| {
                p.validate(&name, marker.operators())
                    .map(|_| p)
                    .map_err(|e| ConfigError::ValidationFailed {
                        reason: e.to_string(),
                    })
            });
        match parsed {
            Ok(policy) => {
                match_policies.insert(name, policy);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping match policy");
                report.errors.push((key, e));
            }
        }
    }
    report.match_policies = match_policies.len();
    marker.replace_policies(match_policies);

    policies.clear();
    for (key, name, yaml) in policy_entries(source, RATE_LIMITING_PREFIX) {
        match serde_yaml::from_str::<RateLimitPolicy>(&yaml) {
            Ok(policy) => {
                if limiters.get(&policy.match_policy).is_some() {
                    limiters.update_rate_limit(&policy.match_policy, policy.rate, policy.burst);
                }
                policies.insert(policy);
                report.rate_limit_policies += 1;
            }
            Err(e) => {
                warn!(key = %key, policy = %name, error = %e, "Skipping rate limiting policy");
                report.errors.push((
                    key.clone(),
                    ConfigError::Parse {
                        what: key,
                        reason: e.to_string(),
                    },
                ));
            }
        }
    }

    info!(
        match_policies = report.match_policies,
        rate_limit_policies = report.rate_limit_policies,
        errors = report.errors.len(),
        "Reloaded governance configuration"
    );
    report
}
