use std::sync::Arc;

use rand::Rng;

use super::{PickInfo, RANDOM, Strategy};
use crate::discovery::Instance;

#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for RandomStrategy {
    fn pick(&self, instances: &[Arc<Instance>], _info: &PickInfo<'_>) -> Option<usize> {
        if instances.is_empty() {
            return None;
        }
        Some(rand::rng().random_range(0..instances.len()))
    }

    fn name(&self) -> &'static str {
        RANDOM
    }
}
