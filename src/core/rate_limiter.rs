use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::token_bucket::TokenBucket;

/// Rate used for buckets configured with a rate below one per second.
pub const UNLIMITED_RATE: f64 = i32::MAX as f64;

/// Named token buckets, created lazily on first use.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

fn bucket_params(rate: i64, burst: Option<i64>) -> (f64, f64) {
    if rate < 1 {
        return (UNLIMITED_RATE, UNLIMITED_RATE);
    }
    let rate = rate as f64;
    let burst = match burst {
        Some(b) if b > 0 => b as f64,
        _ => rate,
    };
    (burst, rate)
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token from the bucket `name`, creating it with `rate`/`burst` if absent.
    /// An existing bucket is retuned first when `rate`/`burst` no longer match it.
    ///
    /// A rate below one means unlimited. A missing or non-positive burst defaults to the rate.
    pub fn try_accept(&self, name: &str, rate: i64, burst: Option<i64>) -> bool {
        if let Some(bucket) = self.limiters.read().get(name) {
            let (capacity, refill) = bucket_params(rate, burst);
            if bucket.capacity() != capacity || bucket.refill_rate() != refill {
                debug!(limiter = %name, rate = refill, burst = capacity, "Retuned rate limiter");
                bucket.update(capacity, refill);
            }
            return bucket.try_acquire(1.0);
        }

        let bucket = {
            let mut limiters = self.limiters.write();
            Arc::clone(limiters.entry(name.to_string()).or_insert_with(|| {
                let (capacity, refill) = bucket_params(rate, burst);
                info!(limiter = %name, rate = refill, burst = capacity, "Created rate limiter");
                Arc::new(TokenBucket::new(capacity, refill))
            }))
        };
        bucket.try_acquire(1.0)
    }

    /// Change the parameters of an existing bucket, or create it.
    pub fn update_rate_limit(&self, name: &str, rate: i64, burst: Option<i64>) {
        let (capacity, refill) = bucket_params(rate, burst);
        let mut limiters = self.limiters.write();
        match limiters.get(name) {
            Some(bucket) => bucket.update(capacity, refill),
            None => {
                limiters.insert(name.to_string(), Arc::new(TokenBucket::new(capacity, refill)));
            }
        }
        debug!(limiter = %name, rate = refill, burst = capacity, "Updated rate limiter");
    }

    pub fn delete(&self, name: &str) {
        if self.limiters.write().remove(name).is_some() {
            debug!(limiter = %name, "Deleted rate limiter");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<TokenBucket>> {
        self.limiters.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }
}

/// Mark-scoped rate limit loaded from `servicecomb.rateLimiting.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Name of the match policy whose mark this applies to.
    #[serde(rename = "match")]
    pub match_policy: String,
    pub rate: i64,
    #[serde(default)]
    pub burst: Option<i64>,
}

/// Rate limit policies indexed by traffic mark.
#[derive(Debug, Default)]
pub struct RateLimitPolicies {
    by_mark: RwLock<HashMap<String, RateLimitPolicy>>,
}

impl RateLimitPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: RateLimitPolicy) {
        self.by_mark
            .write()
            .insert(policy.match_policy.clone(), policy);
    }

    pub fn get(&self, mark: &str) -> Option<RateLimitPolicy> {
        self.by_mark.read().get(mark).cloned()
    }

    pub fn remove(&self, mark: &str) -> Option<RateLimitPolicy> {
        self.by_mark.write().remove(mark)
    }

    pub fn clear(&self) {
        self.by_mark.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_rate_one_burst_one() {
        let registry = RateLimiterRegistry::new();
        assert!(registry.try_accept("op", 1, Some(1)));
        assert!(!registry.try_accept("op", 1, Some(1)));
        thread::sleep(Duration::from_millis(1100));
        assert!(registry.try_accept("op", 1, Some(1)));
    }

    #[test]
    fn test_rate_below_one_is_unlimited() {
        let registry = RateLimiterRegistry::new();
        for _ in 0..1000 {
            assert!(registry.try_accept("free", 0, None));
        }
    }

    #[test]
    fn test_new_rate_applies_to_existing_bucket() {
        let registry = RateLimiterRegistry::new();
        assert!(registry.try_accept("qps", 1, None));
        assert!(!registry.try_accept("qps", 1, None));

        let accepted = (0..5).filter(|_| registry.try_accept("qps", 1000, None)).count();
        assert_eq!(accepted, 5);
        assert_eq!(registry.get("qps").unwrap().refill_rate(), 1000.0);

        registry.try_accept("qps", 2, None);
        assert_eq!(registry.get("qps").unwrap().capacity(), 2.0);
    }

    #[test]
    fn test_burst_defaults_to_rate() {
        let registry = RateLimiterRegistry::new();
        let accepted = (0..10).filter(|_| registry.try_accept("q", 3, None)).count();
        assert_eq!(accepted, 3);
    }

    #[test]
    fn test_update_and_delete() {
        let registry = RateLimiterRegistry::new();
        assert!(registry.try_accept("x", 1, Some(1)));
        assert!(!registry.try_accept("x", 1, Some(1)));

        registry.update_rate_limit("x", 0, None);
        assert!(registry.try_accept("x", 1, Some(1)));
        assert_eq!(registry.len(), 1);

        registry.delete("x");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_policy_yaml() {
        let policy: RateLimitPolicy = serde_yaml::from_str("match: vip\nrate: 10\nburst: 20\n").unwrap();
        assert_eq!(policy.match_policy, "vip");
        assert_eq!(policy.burst, Some(20));

        let policies = RateLimitPolicies::new();
        policies.insert(policy);
        assert_eq!(policies.get("vip").map(|p| p.rate), Some(10));
    }
}
