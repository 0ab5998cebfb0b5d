use std::collections::HashMap;

use parking_lot::Mutex;

use super::rule::RouteTag;

#[derive(Debug, Default)]
struct DestinationCounter {
    total: u64,
    per_tag: HashMap<String, u64>,
}

impl DestinationCounter {
    fn hit(&mut self, label: String) {
        *self.per_tag.entry(label).or_default() += 1;
    }
}

/// Tracks how many calls each weighted destination received so the observed
/// distribution converges on the configured weights.
#[derive(Debug, Default)]
pub struct WeightPool {
    counters: Mutex<HashMap<String, DestinationCounter>>,
}

impl WeightPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the tag that should take the next call for `destination`.
    pub fn fit_rate(&self, tags: &[RouteTag], destination: &str) -> Option<usize> {
        let first = tags.first()?;
        if first.weight >= 100 {
            return Some(0);
        }

        let mut counters = self.counters.lock();
        let counter = counters.entry(destination.to_string()).or_default();
        counter.total += 1;
        if counter.total == 1 {
            counter.hit(first.label());
            return Some(0);
        }

        let total = counter.total as f64;
        for (i, tag) in tags.iter().enumerate() {
            let label = tag.label();
            let served = counter.per_tag.get(&label).copied().unwrap_or(0) as f64;
            if served * 100.0 / total < tag.weight as f64 {
                counter.hit(label);
                return Some(i);
            }
        }

        counter.hit(first.label());
        Some(0)
    }

    pub fn reset(&self, destination: &str) {
        self.counters.lock().remove(destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_takes_first_tag() {
        let pool = WeightPool::new();
        let tags = vec![RouteTag::new(&[("version", "1")], 10), RouteTag::new(&[("version", "2")], 90)];
        assert_eq!(pool.fit_rate(&tags, "svc"), Some(0));
        assert_eq!(pool.fit_rate(&tags, "svc"), Some(1));
    }

    #[test]
    fn test_full_weight_short_circuits() {
        let pool = WeightPool::new();
        let tags = vec![RouteTag::new(&[("version", "1")], 100)];
        for _ in 0..10 {
            assert_eq!(pool.fit_rate(&tags, "svc"), Some(0));
        }
    }

    #[test]
    fn test_converges_to_weights() {
        let pool = WeightPool::new();
        let tags = vec![RouteTag::new(&[("version", "1")], 80), RouteTag::new(&[("version", "2")], 20)];
        let mut hits = [0u32; 2];
        for _ in 0..1000 {
            hits[pool.fit_rate(&tags, "svc").unwrap()] += 1;
        }
        assert!((790..=810).contains(&hits[0]), "hits {hits:?}");
        assert!((190..=210).contains(&hits[1]), "hits {hits:?}");
    }

    #[test]
    fn test_empty_tags() {
        assert_eq!(WeightPool::new().fit_rate(&[], "svc"), None);
    }

    #[test]
    fn test_destinations_are_independent() {
        let pool = WeightPool::new();
        let tags = vec![RouteTag::new(&[("v", "a")], 50), RouteTag::new(&[("v", "b")], 50)];
        assert_eq!(pool.fit_rate(&tags, "one"), Some(0));
        assert_eq!(pool.fit_rate(&tags, "two"), Some(0));
        pool.reset("one");
        assert_eq!(pool.fit_rate(&tags, "one"), Some(0));
    }
}
