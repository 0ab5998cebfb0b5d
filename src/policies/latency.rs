use std::time::Duration;

use dashmap::DashMap;

use crate::observability::metrics::Metrics;

/// Weight of the newest sample in the moving average.
const SMOOTHING: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
struct Sample {
    avg_ms: f64,
    count: u64,
}

/// Smoothed response latency per (service, instance).
#[derive(Debug, Default)]
pub struct LatencyStats {
    samples: DashMap<(String, String), Sample>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, service: &str, instance_id: &str, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        Metrics::record_instance_latency(service, latency);
        self.samples
            .entry((service.to_string(), instance_id.to_string()))
            .and_modify(|s| {
                s.avg_ms = s.avg_ms * (1.0 - SMOOTHING) + ms * SMOOTHING;
                s.count += 1;
            })
            .or_insert(Sample { avg_ms: ms, count: 1 });
    }

    /// Average latency in milliseconds, if any sample exists.
    pub fn average_ms(&self, service: &str, instance_id: &str) -> Option<f64> {
        self.samples
            .get(&(service.to_string(), instance_id.to_string()))
            .map(|s| s.avg_ms)
    }

    pub fn sample_count(&self, service: &str, instance_id: &str) -> u64 {
        self.samples
            .get(&(service.to_string(), instance_id.to_string()))
            .map_or(0, |s| s.count)
    }

    pub fn clear(&self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average() {
        let stats = LatencyStats::new();
        assert_eq!(stats.average_ms("svc", "a"), None);

        stats.record("svc", "a", Duration::from_millis(100));
        assert_eq!(stats.average_ms("svc", "a"), Some(100.0));

        stats.record("svc", "a", Duration::from_millis(200));
        let avg = stats.average_ms("svc", "a").unwrap();
        assert!((avg - 130.0).abs() < 1e-6);
        assert_eq!(stats.sample_count("svc", "a"), 2);
    }
}
