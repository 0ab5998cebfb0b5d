use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::info;

use super::{
    RandomStrategy, RoundRobinStrategy, SessionStickinessStrategy, Strategy,
    WeightedResponseStrategy,
};

/// Lookup key: lower-cased with `_`/`-` removed, so `round_robin` finds `RoundRobin`.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

/// Shared strategy instances by name.
#[derive(Debug)]
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let registry = Self {
            strategies: RwLock::new(HashMap::new()),
        };
        registry.install(Arc::new(RoundRobinStrategy::new()));
        registry.install(Arc::new(RandomStrategy::new()));
        registry.install(Arc::new(SessionStickinessStrategy::new()));
        registry.install(Arc::new(WeightedResponseStrategy::new()));
        registry
    }

    /// Add or replace a strategy under its own name.
    pub fn install(&self, strategy: Arc<dyn Strategy>) {
        info!(strategy = strategy.name(), "Installed load balancing strategy");
        self.strategies
            .write()
            .insert(normalize(strategy.name()), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.read().get(&normalize(name)).cloned()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
