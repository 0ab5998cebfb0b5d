use std::sync::Arc;

use rand::Rng;

use super::{PickInfo, Strategy, WEIGHTED_RESPONSE, round_robin::RoundRobinStrategy};
use crate::discovery::Instance;

/// Favors instances with lower average latency.
///
/// Until every candidate has a latency sample, falls back to round robin so each
/// instance gets measured.
#[derive(Debug, Default)]
pub struct WeightedResponseStrategy {
    warmup: RoundRobinStrategy,
}

impl WeightedResponseStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedResponseStrategy {
    fn pick(&self, instances: &[Arc<Instance>], info: &PickInfo<'_>) -> Option<usize> {
        let averages: Option<Vec<f64>> = instances
            .iter()
            .map(|i| info.latency.average_ms(info.service, &i.instance_id))
            .collect();
        let Some(averages) = averages.filter(|a| !a.is_empty()) else {
            return self.warmup.next_index(info.service, instances.len());
        };

        let weights: Vec<f64> = averages.iter().map(|ms| 1.0 / ms.max(0.001)).collect();
        let total: f64 = weights.iter().sum();
        let mut point = rand::rng().random_range(0.0..total);
        for (i, w) in weights.iter().enumerate() {
            if point < *w {
                return Some(i);
            }
            point -= w;
        }
        Some(weights.len() - 1)
    }

    fn name(&self) -> &'static str {
        WEIGHTED_RESPONSE
    }

    fn reset(&self) {
        self.warmup.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::policies::LatencyStats;

    #[test]
    fn test_prefers_fast_instance() {
        let strategy = WeightedResponseStrategy::new();
        let stats = LatencyStats::new();
        stats.record("svc", "fast", Duration::from_millis(1));
        stats.record("svc", "slow", Duration::from_millis(100));
        let list = vec![
            Arc::new(Instance::new("fast", "svc")),
            Arc::new(Instance::new("slow", "svc")),
        ];
        let info = PickInfo {
            service: "svc",
            session_id: None,
            latency: &stats,
        };

        let fast = (0..1000)
            .filter(|_| strategy.pick(&list, &info) == Some(0))
            .count();
        assert!(fast > 900, "fast picked {fast} times");
    }

    #[test]
    fn test_round_robin_until_measured() {
        let strategy = WeightedResponseStrategy::new();
        let stats = LatencyStats::new();
        stats.record("svc", "a", Duration::from_millis(5));
        let list = vec![Arc::new(Instance::new("a", "svc")), Arc::new(Instance::new("b", "svc"))];
        let info = PickInfo {
            service: "svc",
            session_id: None,
            latency: &stats,
        };
        assert_eq!(strategy.pick(&list, &info), Some(0));
        assert_eq!(strategy.pick(&list, &info), Some(1));
    }
}
