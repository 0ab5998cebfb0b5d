use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::observability::metrics::Metrics;

/// Per-command breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Calls running longer than this are reported as timeouts. `None` disables the check.
    pub timeout: Option<Duration>,
    pub max_concurrent_requests: u32,
    pub enabled: bool,
    pub force_open: bool,
    pub force_close: bool,
    /// How long the circuit stays open before a probe is let through
    pub sleep_window: Duration,
    /// Minimum requests in the window before the error rate is considered
    pub request_volume_threshold: u32,
    pub error_threshold_percentage: u32,
    pub metrics_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_concurrent_requests: 1000,
            enabled: true,
            force_open: false,
            force_close: false,
            sleep_window: Duration::from_millis(15_000),
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            metrics_window: Duration::from_secs(10),
        }
    }
}

/// Errors produced by the breaker itself, never by the protected call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError {
    #[error("circuit open: {command}")]
    CircuitOpen { command: String },

    #[error("max concurrency reached: {command}")]
    MaxConcurrency { command: String },

    #[error("timeout: {command}")]
    Timeout { command: String },

    #[error("forced fallback: {command}")]
    ForceFallback { command: String },
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn to_int(&self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    fn from_int(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[inline]
fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    successes: u32,
    failures: u32,
}

/// Per-second outcome buckets covering the metrics window.
#[derive(Debug, Default)]
struct RollingWindow {
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn prune(&mut self, now_sec: u64, window_secs: u64) {
        while let Some(front) = self.buckets.front() {
            if now_sec.saturating_sub(front.second) >= window_secs {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, success: bool, window_secs: u64) {
        let now_sec = now_ms() / 1000;
        self.prune(now_sec, window_secs);
        if self.buckets.back().is_none_or(|b| b.second != now_sec) {
            self.buckets.push_back(Bucket {
                second: now_sec,
                ..Default::default()
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    /// (total requests, failures)
    fn totals(&mut self, window_secs: u64) -> (u32, u32) {
        self.prune(now_ms() / 1000, window_secs);
        self.buckets.iter().fold((0, 0), |(t, f), b| {
            (t + b.successes + b.failures, f + b.failures)
        })
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

struct InFlightGuard<'a>(&'a AtomicU32);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Breaker guarding one command.
#[derive(Debug)]
pub struct CommandBreaker {
    name: String,
    config: RwLock<CircuitBreakerConfig>,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    probe_in_flight: AtomicBool,
    in_flight: AtomicU32,
    window: Mutex<RollingWindow>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
}

impl CommandBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        Metrics::set_cb_state(&name, STATE_CLOSED);
        Self {
            name,
            config: RwLock::new(config),
            state: AtomicU8::new(STATE_CLOSED),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
            window: Mutex::new(RollingWindow::default()),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: CircuitBreakerConfig) {
        let mut current = self.config.write();
        if *current != config {
            debug!(command = %self.name, "Updating circuit breaker config");
            *current = config;
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_int(self.state.load(Ordering::Acquire))
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run `run` under breaker protection.
    ///
    /// The outer error is a breaker decision (short-circuit, concurrency gate, timeout);
    /// the inner result is what `run` returned.
    pub fn execute<T, E>(
        &self,
        run: impl FnOnce() -> Result<T, E>,
    ) -> Result<Result<T, E>, BreakerError> {
        let config = self.config();
        let is_probe = self.admit(&config)?;

        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(&self.in_flight);
        if previous >= config.max_concurrent_requests {
            drop(guard);
            if is_probe {
                self.probe_in_flight.store(false, Ordering::Release);
            }
            Metrics::record_cb_rejection(&self.name, "max_concurrency");
            return Err(BreakerError::MaxConcurrency {
                command: self.name.clone(),
            });
        }

        let started = Instant::now();
        let result = run();
        drop(guard);

        let timed_out = config.timeout.is_some_and(|t| started.elapsed() > t);
        let success = !timed_out && result.is_ok();
        self.record_outcome(success, is_probe, &config);

        if timed_out {
            warn!(command = %self.name, elapsed_ms = started.elapsed().as_millis() as u64, "Command timed out");
            return Err(BreakerError::Timeout {
                command: self.name.clone(),
            });
        }
        Ok(result)
    }

    /// Returns whether the admitted request is the half-open probe.
    fn admit(&self, config: &CircuitBreakerConfig) -> Result<bool, BreakerError> {
        let open = || BreakerError::CircuitOpen {
            command: self.name.clone(),
        };

        if config.force_open {
            Metrics::record_cb_rejection(&self.name, "force_open");
            return Err(open());
        }
        if !config.enabled || config.force_close {
            return Ok(false);
        }

        match self.state() {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = now_ms().saturating_sub(self.opened_at_ms.load(Ordering::Acquire));
                if elapsed >= config.sleep_window.as_millis() as u64
                    && self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.probe_in_flight.store(true, Ordering::Release);
                    self.transition(CircuitState::Open, CircuitState::HalfOpen);
                    return Ok(true);
                }
                Metrics::record_cb_rejection(&self.name, "open");
                Err(open())
            }
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Ok(true)
                } else {
                    Metrics::record_cb_rejection(&self.name, "half_open");
                    Err(open())
                }
            }
        }
    }

    fn record_outcome(&self, success: bool, is_probe: bool, config: &CircuitBreakerConfig) {
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
        Metrics::record_cb_outcome(&self.name, if success { "success" } else { "failure" });

        let window_secs = config.metrics_window.as_secs().max(1);
        let mut window = self.window.lock();
        window.record(success, window_secs);

        if is_probe {
            self.probe_in_flight.store(false, Ordering::Release);
            if success {
                window.clear();
                self.state.store(STATE_CLOSED, Ordering::Release);
                self.transition(CircuitState::HalfOpen, CircuitState::Closed);
            } else {
                self.opened_at_ms.store(now_ms(), Ordering::Release);
                self.state.store(STATE_OPEN, Ordering::Release);
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            return;
        }

        if success || !config.enabled || config.force_close {
            return;
        }

        let (total, failures) = window.totals(window_secs);
        if total >= config.request_volume_threshold
            && total > 0
            && failures * 100 / total >= config.error_threshold_percentage
            && self
                .state
                .compare_exchange(
                    STATE_CLOSED,
                    STATE_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.opened_at_ms.store(now_ms(), Ordering::Release);
            self.transition(CircuitState::Closed, CircuitState::Open);
        }
    }

    fn transition(&self, from: CircuitState, to: CircuitState) {
        info!(command = %self.name, "Circuit breaker state transition: {} -> {}", from, to);
        Metrics::record_cb_transition(&self.name, from.as_str(), to.as_str());
        Metrics::set_cb_state(&self.name, to.to_int());
    }

    pub fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        self.window.lock().clear();
        Metrics::set_cb_state(&self.name, STATE_CLOSED);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let window_secs = self.config.read().metrics_window.as_secs().max(1);
        let (window_requests, window_failures) = self.window.lock().totals(window_secs);
        CircuitBreakerStats {
            state: self.state(),
            window_requests,
            window_failures,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub window_requests: u32,
    pub window_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub in_flight: u32,
}

/// Breakers keyed by command name.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CommandBreaker>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the breaker for `command`, creating it or refreshing its config.
    pub fn configure(&self, command: &str, config: CircuitBreakerConfig) -> Arc<CommandBreaker> {
        if let Some(existing) = self.breakers.get(command) {
            existing.update_config(config);
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(command.to_string())
                .or_insert_with(|| {
                    debug!(command = %command, "Created circuit breaker");
                    Arc::new(CommandBreaker::new(command, config))
                })
                .value(),
        )
    }

    pub fn get(&self, command: &str) -> Option<Arc<CommandBreaker>> {
        self.breakers.get(command).map(|b| Arc::clone(b.value()))
    }

    pub fn remove(&self, command: &str) -> Option<Arc<CommandBreaker>> {
        self.breakers.remove(command).map(|(_, b)| b)
    }

    pub fn flush(&self) {
        self.breakers.clear();
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            request_volume_threshold: 4,
            error_threshold_percentage: 50,
            sleep_window: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn fail(cb: &CommandBreaker) -> Result<Result<(), &'static str>, BreakerError> {
        cb.execute(|| Err::<(), _>("boom"))
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CommandBreaker::new("cmd", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.execute(|| Ok::<_, ()>(7)), Ok(Ok(7)));
    }

    #[test]
    fn test_opens_after_volume_and_error_rate() {
        let cb = CommandBreaker::new("cmd", fast_config());
        for _ in 0..3 {
            assert_eq!(fail(&cb), Ok(Err("boom")));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert_eq!(fail(&cb), Ok(Err("boom")));
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.execute(|| Ok::<_, ()>(()));
        assert!(matches!(rejected, Err(BreakerError::CircuitOpen { .. })));
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let cb = CommandBreaker::new("cmd", fast_config());
        for _ in 0..4 {
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(cb.execute(|| Ok::<_, ()>(1)), Ok(Ok(1)));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_reopens_on_failure() {
        let cb = CommandBreaker::new("cmd", fast_config());
        for _ in 0..4 {
            let _ = fail(&cb);
        }
        thread::sleep(Duration::from_millis(150));
        assert_eq!(fail(&cb), Ok(Err("boom")));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_open_and_force_close() {
        let cb = CommandBreaker::new(
            "cmd",
            CircuitBreakerConfig {
                force_open: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            cb.execute(|| Ok::<_, ()>(())),
            Err(BreakerError::CircuitOpen { .. })
        ));

        let cb = CommandBreaker::new(
            "cmd",
            CircuitBreakerConfig {
                force_close: true,
                ..fast_config()
            },
        );
        for _ in 0..10 {
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_timeout_is_reported_and_counted() {
        let cb = CommandBreaker::new(
            "cmd",
            CircuitBreakerConfig {
                timeout: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );
        let result = cb.execute(|| {
            thread::sleep(Duration::from_millis(30));
            Ok::<_, ()>(())
        });
        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(cb.stats().total_failures, 1);
    }

    #[test]
    fn test_max_concurrency_gate() {
        let cb = Arc::new(CommandBreaker::new(
            "cmd",
            CircuitBreakerConfig {
                max_concurrent_requests: 1,
                ..Default::default()
            },
        ));
        let cb2 = Arc::clone(&cb);
        let inner = cb.execute(|| Ok::<_, ()>(cb2.execute(|| Ok::<_, ()>(()))));
        assert!(matches!(
            inner,
            Ok(Ok(Err(BreakerError::MaxConcurrency { .. })))
        ));
        assert_eq!(cb.in_flight(), 0);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = CircuitRegistry::new();
        let a = registry.configure("cmd", CircuitBreakerConfig::default());
        let b = registry.configure(
            "cmd",
            CircuitBreakerConfig {
                force_open: true,
                ..Default::default()
            },
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.config().force_open);
        registry.flush();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_circuit_breaker_thread_safety() {
        let cb = Arc::new(CommandBreaker::new(
            "cmd",
            CircuitBreakerConfig {
                force_close: true,
                ..Default::default()
            },
        ));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _ = cb.execute(|| if i % 2 == 0 { Ok(()) } else { Err(()) });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = cb.stats();
        assert_eq!(stats.total_successes + stats.total_failures, 1000);
    }
}
