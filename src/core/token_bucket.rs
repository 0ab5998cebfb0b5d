use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

/// Token bucket refilled continuously at `refill_rate` tokens per second.
///
/// Starts full. Rate and burst can be changed in place without losing the
/// tokens already accumulated (capped to the new burst).
#[derive(Debug)]
pub struct TokenBucket {
    inner: Mutex<TokenBucketInner>,
}

#[derive(Debug)]
struct TokenBucketInner {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucketInner {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// # Arguments
    /// * `capacity` - Burst size
    /// * `refill_rate` - Tokens added per second
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            inner: Mutex::new(TokenBucketInner {
                tokens: capacity,
                capacity,
                refill_rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `tokens` if available, without waiting.
    pub fn try_acquire(&self, tokens: f64) -> bool {
        let mut inner = self.inner.lock();
        inner.refill();

        trace!(
            available = inner.tokens,
            requested = tokens,
            "Token bucket acquire"
        );

        if inner.tokens >= tokens {
            inner.tokens -= tokens;
            true
        } else {
            false
        }
    }

    pub fn update(&self, capacity: f64, refill_rate: f64) {
        let mut inner = self.inner.lock();
        inner.refill();
        // A larger burst is available immediately.
        let grown = (capacity - inner.capacity).max(0.0);
        inner.capacity = capacity;
        inner.refill_rate = refill_rate;
        inner.tokens = (inner.tokens + grown).min(capacity);
    }

    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.refill();
        inner.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.inner.lock().capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.inner.lock().refill_rate
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn test_token_bucket_basic() {
        let bucket = TokenBucket::new(10.0, 5.0);

        assert!(bucket.try_acquire(5.0));
        assert!(bucket.try_acquire(5.0));
        assert!(!bucket.try_acquire(1.0));
    }

    #[test]
    fn test_token_bucket_refill() {
        let bucket = TokenBucket::new(10.0, 100.0);

        assert!(bucket.try_acquire(10.0));
        thread::sleep(Duration::from_millis(60));
        assert!(bucket.try_acquire(5.0));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let bucket = TokenBucket::new(3.0, 1000.0);
        thread::sleep(Duration::from_millis(20));
        assert!(bucket.available_tokens() <= 3.0);
    }

    #[test]
    fn test_update_caps_tokens() {
        let bucket = TokenBucket::new(10.0, 1.0);
        bucket.update(2.0, 1.0);
        assert!(bucket.try_acquire(2.0));
        assert!(!bucket.try_acquire(1.0));
        assert_eq!(bucket.capacity(), 2.0);
    }

    #[test]
    fn test_concurrent_acquire_never_oversubscribes() {
        let bucket = Arc::new(TokenBucket::new(50.0, 0.0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let b = Arc::clone(&bucket);
                thread::spawn(move || (0..10).filter(|_| b.try_acquire(1.0)).count())
            })
            .collect();

        let acquired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(acquired, 50);
    }
}
