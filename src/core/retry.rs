use std::time::Duration;

use backoff::{
    ExponentialBackoff, ExponentialBackoffBuilder,
    backoff::{Backoff, Constant, Zero},
};
use tracing::debug;

use crate::config::types::{BackoffConfig, BackoffKind};

/// Backoff applied between retries on the same endpoint.
pub enum RetryBackoff {
    Zero(Zero),
    Constant(Constant),
    Exponential(ExponentialBackoff),
}

impl RetryBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        let min = Duration::from_millis(config.min_ms);
        match config.kind {
            BackoffKind::Zero => RetryBackoff::Zero(Zero {}),
            BackoffKind::Constant => RetryBackoff::Constant(Constant::new(min)),
            BackoffKind::Exponential => {
                let max = Duration::from_millis(config.max_ms.max(config.min_ms));
                RetryBackoff::Exponential(
                    ExponentialBackoffBuilder::new()
                        .with_initial_interval(min)
                        .with_max_interval(max)
                        // attempt budget, not elapsed time, ends the retry loop
                        .with_max_elapsed_time(None)
                        .build(),
                )
            }
        }
    }
}

impl Backoff for RetryBackoff {
    fn reset(&mut self) {
        match self {
            RetryBackoff::Zero(b) => b.reset(),
            RetryBackoff::Constant(b) => b.reset(),
            RetryBackoff::Exponential(b) => b.reset(),
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = match self {
            RetryBackoff::Zero(b) => b.next_backoff(),
            RetryBackoff::Constant(b) => b.next_backoff(),
            RetryBackoff::Exponential(b) => b.next_backoff(),
        };
        if let Some(d) = delay {
            debug!(delay_ms = d.as_millis() as u64, "Retry backoff");
        }
        delay
    }
}
