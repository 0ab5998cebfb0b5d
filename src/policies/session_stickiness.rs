use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tracing::debug;

use super::{PickInfo, SESSION_STICKINESS, Strategy, round_robin::RoundRobinStrategy};
use crate::discovery::Instance;

/// Consecutive failures after which a session is re-balanced.
pub const SUCCESSIVE_FAILED_TIMES: u32 = 5;

/// Idle time after which a session binding is dropped.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// New bindings between sweeps of expired ones.
const SWEEP_INTERVAL: u64 = 64;

#[derive(Debug, Clone)]
struct Binding {
    instance_id: String,
    failures: u32,
    last_used: Instant,
}

/// Keeps a session on the instance it was first balanced to, until the
/// session has been idle for the timeout.
#[derive(Debug)]
pub struct SessionStickinessStrategy {
    sessions: DashMap<String, Binding>,
    fallback: RoundRobinStrategy,
    timeout: Duration,
    inserts: AtomicU64,
}

impl Default for SessionStickinessStrategy {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionStickinessStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            fallback: RoundRobinStrategy::default(),
            timeout,
            inserts: AtomicU64::new(0),
        }
    }

    pub fn bound_instance(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .filter(|b| b.last_used.elapsed() < self.timeout)
            .map(|b| b.instance_id.clone())
    }

    /// Number of live or not yet swept bindings.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every binding idle for longer than the timeout.
    pub fn evict_expired(&self) {
        let before = self.sessions.len();
        self.sessions.retain(|_, b| b.last_used.elapsed() < self.timeout);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle sessions");
        }
    }
}

impl Strategy for SessionStickinessStrategy {
    fn pick(&self, instances: &[Arc<Instance>], info: &PickInfo<'_>) -> Option<usize> {
        let Some(session) = info.session_id else {
            return self.fallback.next_index(info.service, instances.len());
        };

        if let Some(mut binding) = self.sessions.get_mut(session) {
            if binding.last_used.elapsed() < self.timeout {
                if let Some(idx) = instances.iter().position(|i| i.instance_id == binding.instance_id) {
                    binding.last_used = Instant::now();
                    return Some(idx);
                }
            }
        }

        let idx = self.fallback.next_index(info.service, instances.len())?;
        debug!(session = %session, instance = %instances[idx].instance_id, "Bound session");
        self.sessions.insert(
            session.to_string(),
            Binding {
                instance_id: instances[idx].instance_id.clone(),
                failures: 0,
                last_used: Instant::now(),
            },
        );
        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.evict_expired();
        }
        Some(idx)
    }

    fn name(&self) -> &'static str {
        SESSION_STICKINESS
    }

    fn on_request_complete(&self, info: &PickInfo<'_>, instance_id: &str, success: bool) {
        let Some(session) = info.session_id else {
            return;
        };
        let unbind = match self.sessions.get_mut(session) {
            Some(mut binding) if binding.instance_id == instance_id => {
                if success {
                    binding.failures = 0;
                    false
                } else {
                    binding.failures += 1;
                    binding.failures >= SUCCESSIVE_FAILED_TIMES
                }
            }
            _ => false,
        };
        if unbind {
            debug!(session = %session, instance = %instance_id, "Unbinding failing session");
            self.sessions.remove(session);
        }
    }

    fn reset(&self) {
        self.sessions.clear();
        self.fallback.reset();
    }
}
