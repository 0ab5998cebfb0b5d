//! Fault injection: artificial delays and aborts for a percentage of requests.

use std::{collections::HashMap, thread, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{
    config::{ConfigSource, ConfigSourceExt},
    core::Invocation,
    handler::ServiceType,
    observability::metrics::Metrics,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultError {
    /// Carries the status to answer with.
    #[error("injecting abort")]
    Abort { status: u16 },

    #[error("fault percent must be within 0..=100, got {percent}")]
    InvalidPercent { percent: i64 },

    #[error("abort status must be within 100..=599, got {status}")]
    InvalidStatus { status: i64 },

    #[error("fixed delay must be positive")]
    InvalidDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Delay,
    Abort,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Delay => "delay",
            FaultKind::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    pub percent: i64,
    pub http_status: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delay {
    pub percent: i64,
    pub fixed_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultConfig {
    pub abort: Option<Abort>,
    pub delay: Option<Delay>,
}

impl FaultConfig {
    /// Read `servicecomb.governance.<type>.<service>.policy.fault.protocols.<protocol>.*`.
    pub fn from_source(
        source: &dyn ConfigSource,
        service_type: ServiceType,
        service: &str,
        protocol: &str,
    ) -> Option<Self> {
        let prefix = format!(
            "servicecomb.governance.{service_type}.{service}.policy.fault.protocols.{protocol}"
        );
        let get = |suffix: &str| source.get_parsed::<i64>(&format!("{prefix}.{suffix}"));

        let abort = get("abort.percent").map(|percent| Abort {
            percent,
            http_status: get("abort.httpStatus").unwrap_or(0),
        });
        let delay = get("delay.percent").map(|percent| Delay {
            percent,
            fixed_delay: Duration::from_millis(get("delay.fixedDelay").unwrap_or(0).max(0) as u64),
        });

        if abort.is_none() && delay.is_none() {
            return None;
        }
        Some(Self { abort, delay })
    }

    pub fn validate(&self) -> Result<(), FaultError> {
        if let Some(abort) = &self.abort {
            validate_percent(abort.percent)?;
            if !(100..=599).contains(&abort.http_status) {
                return Err(FaultError::InvalidStatus {
                    status: abort.http_status,
                });
            }
        }
        if let Some(delay) = &self.delay {
            validate_percent(delay.percent)?;
            if delay.fixed_delay.is_zero() {
                return Err(FaultError::InvalidDelay);
            }
        }
        Ok(())
    }
}

fn validate_percent(percent: i64) -> Result<(), FaultError> {
    if (0..=100).contains(&percent) {
        Ok(())
    } else {
        Err(FaultError::InvalidPercent { percent })
    }
}

/// Request counters per (service, schema, operation, kind).
#[derive(Debug, Default)]
pub struct FaultInjector {
    counters: Mutex<HashMap<String, u64>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next request should receive the fault: true exactly when
    /// `floor(n * percent / 100)` increases with this request.
    fn should_inject(&self, key: String, percent: i64) -> bool {
        if percent <= 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        let mut counters = self.counters.lock();
        let n = counters.entry(key).or_default();
        *n += 1;
        let p = percent as u64;
        (*n * p / 100) != ((*n - 1) * p / 100)
    }

    /// Apply one fault kind to `inv`. Delay sleeps and succeeds; abort fails.
    pub fn apply_fault_injection(
        &self,
        config: &FaultConfig,
        inv: &Invocation,
        percent: i64,
        kind: FaultKind,
    ) -> Result<(), FaultError> {
        let key = format!("{}.{}", inv.operation_key(), kind.as_str());
        if !self.should_inject(key, percent) {
            return Ok(());
        }

        Metrics::record_fault_injected(&inv.microservice_name, kind.as_str());
        match kind {
            FaultKind::Delay => {
                if let Some(delay) = &config.delay {
                    debug!(service = %inv.microservice_name, delay_ms = delay.fixed_delay.as_millis() as u64, "Injecting delay");
                    thread::sleep(delay.fixed_delay);
                }
                Ok(())
            }
            FaultKind::Abort => {
                let status = config
                    .abort
                    .as_ref()
                    .map_or(500, |a| a.http_status as u16);
                debug!(service = %inv.microservice_name, status, "Injecting abort");
                Err(FaultError::Abort { status })
            }
        }
    }

    /// Validate, then apply delay before abort.
    pub fn validate_and_apply(&self, config: &FaultConfig, inv: &Invocation) -> Result<(), FaultError> {
        config.validate()?;
        if let Some(delay) = &config.delay {
            self.apply_fault_injection(config, inv, delay.percent, FaultKind::Delay)?;
        }
        if let Some(abort) = &config.abort {
            self.apply_fault_injection(config, inv, abort.percent, FaultKind::Abort)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::MemoryConfigSource;

    fn inv() -> Invocation {
        Invocation::new("svc", "schema", "op")
    }

    #[test]
    fn test_delay_at_full_percent() {
        let injector = FaultInjector::new();
        let cfg = FaultConfig {
            delay: Some(Delay {
                percent: 100,
                fixed_delay: Duration::from_millis(20),
            }),
            ..Default::default()
        };
        let start = Instant::now();
        assert_eq!(injector.validate_and_apply(&cfg, &inv()), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_abort_at_full_percent() {
        let injector = FaultInjector::new();
        let cfg = FaultConfig {
            abort: Some(Abort {
                percent: 100,
                http_status: 421,
            }),
            ..Default::default()
        };
        let err = injector.validate_and_apply(&cfg, &inv()).unwrap_err();
        assert_eq!(err, FaultError::Abort { status: 421 });
        assert_eq!(err.to_string(), "injecting abort");
    }

    #[test]
    fn test_zero_percent_never_injects() {
        let injector = FaultInjector::new();
        let cfg = FaultConfig {
            abort: Some(Abort {
                percent: 0,
                http_status: 500,
            }),
            ..Default::default()
        };
        for _ in 0..50 {
            assert_eq!(injector.validate_and_apply(&cfg, &inv()), Ok(()));
        }
    }

    #[test]
    fn test_partial_percent_is_exact_over_window() {
        let injector = FaultInjector::new();
        let cfg = FaultConfig {
            abort: Some(Abort {
                percent: 30,
                http_status: 500,
            }),
            ..Default::default()
        };
        let aborted = (0..100)
            .filter(|_| injector.validate_and_apply(&cfg, &inv()).is_err())
            .count();
        assert_eq!(aborted, 30);
    }

    #[test]
    fn test_validation() {
        let bad_percent = FaultConfig {
            abort: Some(Abort {
                percent: 101,
                http_status: 500,
            }),
            ..Default::default()
        };
        assert_eq!(bad_percent.validate(), Err(FaultError::InvalidPercent { percent: 101 }));

        let bad_status = FaultConfig {
            abort: Some(Abort {
                percent: 10,
                http_status: 99,
            }),
            ..Default::default()
        };
        assert_eq!(bad_status.validate(), Err(FaultError::InvalidStatus { status: 99 }));

        let bad_delay = FaultConfig {
            delay: Some(Delay {
                percent: 10,
                fixed_delay: Duration::ZERO,
            }),
            ..Default::default()
        };
        assert_eq!(bad_delay.validate(), Err(FaultError::InvalidDelay));
    }

    #[test]
    fn test_from_source() {
        let source = MemoryConfigSource::new();
        let prefix = "servicecomb.governance.Consumer.orders.policy.fault.protocols.rest";
        source.set(format!("{prefix}.abort.percent"), "50");
        source.set(format!("{prefix}.abort.httpStatus"), "503");
        source.set(format!("{prefix}.delay.percent"), "10");
        source.set(format!("{prefix}.delay.fixedDelay"), "5");

        let cfg = FaultConfig::from_source(&source, ServiceType::Consumer, "orders", "rest").unwrap();
        assert_eq!(cfg.abort, Some(Abort { percent: 50, http_status: 503 }));
        assert_eq!(cfg.delay.unwrap().fixed_delay, Duration::from_millis(5));
        assert!(FaultConfig::from_source(&source, ServiceType::Consumer, "users", "rest").is_none());
    }
}
