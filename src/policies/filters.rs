use std::{collections::HashMap, fmt::Debug, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{core::Invocation, discovery::Instance};

pub const ZONE_AWARE: &str = "zoneaware";
const ZONE_KEY: &str = "zone";

/// Narrows the candidate list before a strategy picks.
pub trait InstanceFilter: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn filter(&self, instances: Vec<Arc<Instance>>, inv: &Invocation) -> Vec<Arc<Instance>>;
}

/// Prefers instances in the caller's zone when any exist.
#[derive(Debug, Default)]
pub struct ZoneAwareFilter;

impl InstanceFilter for ZoneAwareFilter {
    fn name(&self) -> &'static str {
        ZONE_AWARE
    }

    fn filter(&self, instances: Vec<Arc<Instance>>, inv: &Invocation) -> Vec<Arc<Instance>> {
        let Some(zone) = inv
            .metadata
            .get(ZONE_KEY)
            .or_else(|| inv.source_tags.get(ZONE_KEY))
        else {
            return instances;
        };
        let local: Vec<Arc<Instance>> = instances
            .iter()
            .filter(|i| i.metadata.get(ZONE_KEY) == Some(zone))
            .cloned()
            .collect();
        if local.is_empty() { instances } else { local }
    }
}

#[derive(Debug)]
pub struct FilterRegistry {
    filters: RwLock<HashMap<String, Arc<dyn InstanceFilter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        let registry = Self {
            filters: RwLock::new(HashMap::new()),
        };
        registry.install(Arc::new(ZoneAwareFilter));
        registry
    }

    pub fn install(&self, filter: Arc<dyn InstanceFilter>) {
        debug!(filter = filter.name(), "Installed instance filter");
        self.filters
            .write()
            .insert(filter.name().to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InstanceFilter>> {
        self.filters.read().get(name).cloned()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
