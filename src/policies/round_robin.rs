use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;

use super::{PickInfo, ROUND_ROBIN, Strategy};
use crate::discovery::Instance;

/// Cycles through instances, one counter per service.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_index(&self, service: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let count = match self.counters.get(service) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(service.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        Some(count % len)
    }
}

impl Strategy for RoundRobinStrategy {
    fn pick(&self, instances: &[Arc<Instance>], info: &PickInfo<'_>) -> Option<usize> {
        self.next_index(info.service, instances.len())
    }

    fn name(&self) -> &'static str {
        ROUND_ROBIN
    }

    fn reset(&self) {
        self.counters.clear();
    }
}
