use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ConfigError, source::ConfigSource, source::ConfigSourceExt};

pub const LOADBALANCE_PREFIX: &str = "servicecomb.loadbalance";
pub const DEFAULT_STRATEGY: &str = "RoundRobin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Zero,
    Constant,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" | "" => Ok(BackoffKind::Zero),
            "constant" => Ok(BackoffKind::Constant),
            "exponential" | "jittered" => Ok(BackoffKind::Exponential),
            other => Err(ConfigError::InvalidValue {
                field: "backoff.kind".to_string(),
                value: other.to_string(),
                reason: "expected zero, constant or exponential".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub kind: BackoffKind,
    #[serde(default)]
    pub min_ms: u64,
    #[serde(default)]
    pub max_ms: u64,
}

/// Load balancing settings for one target service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    pub strategy: String,
    pub retry_enabled: bool,
    pub retry_on_next: u32,
    pub retry_on_same: u32,
    pub backoff: BackoffConfig,
    pub filters: Vec<String>,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: DEFAULT_STRATEGY.to_string(),
            retry_enabled: false,
            retry_on_next: 0,
            retry_on_same: 0,
            backoff: BackoffConfig::default(),
            filters: Vec::new(),
        }
    }
}

impl LoadBalancingConfig {
    /// Read `servicecomb.loadbalance[.<service>].*`, service keys first.
    pub fn from_source(source: &dyn ConfigSource, service: &str) -> Self {
        let defaults = Self::default();
        let get = |suffix: &str| source.get_scoped(LOADBALANCE_PREFIX, service, suffix);
        let parse_u32 = |suffix: &str, default: u32| {
            get(suffix)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let backoff = BackoffConfig {
            kind: get("backoff.kind")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            min_ms: get("backoff.minMs")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            max_ms: get("backoff.maxMs")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
        };

        Self {
            strategy: get("strategy.name").unwrap_or(defaults.strategy),
            retry_enabled: get("retryEnabled")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.retry_enabled),
            retry_on_next: parse_u32("retryOnNext", defaults.retry_on_next),
            retry_on_same: parse_u32("retryOnSame", defaults.retry_on_same),
            backoff,
            filters: get("filters")
                .map(|csv| {
                    csv.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigSource;

    #[test]
    fn test_defaults_without_config() {
        let source = MemoryConfigSource::new();
        let cfg = LoadBalancingConfig::from_source(&source, "orders");
        assert_eq!(cfg, LoadBalancingConfig::default());
        assert_eq!(cfg.strategy, "RoundRobin");
    }

    #[test]
    fn test_service_override() {
        let source = MemoryConfigSource::from_yaml_str(
            r#"
servicecomb:
  loadbalance:
    retryEnabled: false
    strategy:
      name: Random
    orders:
      retryEnabled: true
      retryOnNext: 2
      retryOnSame: 3
      backoff:
        kind: constant
        minMs: 5
      filters: zoneaware
"#,
        )
        .unwrap();

        let cfg = LoadBalancingConfig::from_source(&source, "orders");
        assert!(cfg.retry_enabled);
        assert_eq!(cfg.strategy, "Random");
        assert_eq!((cfg.retry_on_next, cfg.retry_on_same), (2, 3));
        assert_eq!(cfg.backoff.kind, BackoffKind::Constant);
        assert_eq!(cfg.backoff.min_ms, 5);
        assert_eq!(cfg.filters, vec!["zoneaware"]);

        assert!(!LoadBalancingConfig::from_source(&source, "users").retry_enabled);
    }

    #[test]
    fn test_backoff_kind_parse() {
        assert_eq!("Exponential".parse::<BackoffKind>().unwrap(), BackoffKind::Exponential);
        assert!("linear".parse::<BackoffKind>().is_err());
    }
}
