//! Service instance lookup.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::router::DEFAULT_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("no instances found for {service}")]
    NotFound { service: String },

    #[error("discovery backend error: {0}")]
    Backend(String),
}

/// A registered instance of a microservice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
    pub service_name: String,
    pub version: String,
    pub app_id: String,
    /// Protocol key (`rest`, `rest-8080`, ...) to address.
    pub endpoints: BTreeMap<String, String>,
    pub default_protocol: String,
    pub metadata: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(instance_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app_id = app.into();
        self
    }

    pub fn with_endpoint(mut self, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        let protocol = protocol.into();
        if self.default_protocol.is_empty() {
            self.default_protocol = protocol.clone();
        }
        self.endpoints.insert(protocol, address.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceQuery<'a> {
    pub consumer_id: &'a str,
    pub app_id: &'a str,
    pub service_name: &'a str,
    /// Exact version, or `latest` for the highest registered version.
    pub version: &'a str,
    /// Metadata every returned instance must carry.
    pub tags: BTreeMap<String, String>,
}

pub trait ServiceDiscovery: Send + Sync {
    fn find_instances(&self, query: &InstanceQuery<'_>) -> Result<Vec<Arc<Instance>>, DiscoveryError>;
}

/// Numeric-aware comparison of dotted version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    instances: RwLock<HashMap<String, Vec<Arc<Instance>>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, instance: Instance) {
        debug!(
            service = %instance.service_name,
            instance = %instance.instance_id,
            "Registered instance"
        );
        let mut instances = self.instances.write();
        let list = instances.entry(instance.service_name.clone()).or_default();
        list.retain(|i| i.instance_id != instance.instance_id);
        list.push(Arc::new(instance));
    }

    pub fn deregister(&self, service: &str, instance_id: &str) -> bool {
        let mut instances = self.instances.write();
        let Some(list) = instances.get_mut(service) else {
            return false;
        };
        let before = list.len();
        list.retain(|i| i.instance_id != instance_id);
        before != list.len()
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn find_instances(&self, query: &InstanceQuery<'_>) -> Result<Vec<Arc<Instance>>, DiscoveryError> {
        let instances = self.instances.read();
        let not_found = || DiscoveryError::NotFound {
            service: query.service_name.to_string(),
        };
        let all = instances.get(query.service_name).ok_or_else(not_found)?;

        let mut candidates: Vec<Arc<Instance>> = all
            .iter()
            .filter(|i| query.app_id.is_empty() || i.app_id.is_empty() || i.app_id == query.app_id)
            .filter(|i| query.tags.iter().all(|(k, v)| i.metadata.get(k) == Some(v)))
            .cloned()
            .collect();

        if query.version.is_empty() || query.version == DEFAULT_VERSION {
            if let Some(latest) = candidates
                .iter()
                .map(|i| i.version.clone())
                .max_by(|a, b| compare_versions(a, b))
            {
                candidates.retain(|i| i.version == latest);
            }
        } else {
            candidates.retain(|i| i.version == query.version);
        }

        if candidates.is_empty() {
            return Err(not_found());
        }
        Ok(candidates)
    }
}
