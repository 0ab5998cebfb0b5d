use std::{collections::BTreeMap, path::Path, str::FromStr};

use parking_lot::RwLock;
use serde_yaml::Value;
use tracing::{debug, warn};

use super::{ConfigError, ConfigResult};

/// Flat dotted-key configuration.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// Typed getters with defaults.
pub trait ConfigSourceExt: ConfigSource {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parsed value; unparseable values are logged and treated as absent.
    fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key = %key, value = %raw, "Ignoring unparseable config value");
                None
            }
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => {
                    warn!(key = %key, value = %v, "Ignoring non-boolean config value");
                    None
                }
            })
            .unwrap_or(default)
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get_parsed(key).unwrap_or(default)
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get_parsed(key).unwrap_or(default)
    }

    /// `<prefix>.<scope>.<suffix>` falling back to `<prefix>.<suffix>`.
    fn get_scoped(&self, prefix: &str, scope: &str, suffix: &str) -> Option<String> {
        self.get(&format!("{prefix}.{scope}.{suffix}"))
            .or_else(|| self.get(&format!("{prefix}.{suffix}")))
    }
}

impl<S: ConfigSource + ?Sized> ConfigSourceExt for S {}

/// In-memory source; YAML documents are flattened to dotted keys.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let source = Self::new();
        source.merge_yaml_str(yaml)?;
        Ok(source)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn merge_yaml_str(&self, yaml: &str) -> ConfigResult<()> {
        let doc: Value = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            what: "configuration document".to_string(),
            reason: e.to_string(),
        })?;
        let mut flat = BTreeMap::new();
        flatten("", &doc, &mut flat);
        debug!(keys = flat.len(), "Merged configuration document");
        self.values.write().extend(flat);
        Ok(())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(k) = scalar_to_string(k) else {
                    continue;
                };
                let key = if prefix.is_empty() {
                    k
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        Value::Sequence(items) => {
            let scalars: Option<Vec<String>> = items.iter().map(scalar_to_string).collect();
            let rendered = match scalars {
                Some(list) => list.join(","),
                None => serde_yaml::to_string(value).unwrap_or_default(),
            };
            out.insert(prefix.to_string(), rendered);
        }
        Value::Null => {}
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out),
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.values
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
