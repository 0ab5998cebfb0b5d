use std::{collections::HashMap, fmt, sync::Arc};

use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use super::MatchError;

/// `(actual value, configured expression) -> matched`
pub type OperatorFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub const EXACT: &str = "exact";
pub const CONTAINS: &str = "contains";
pub const REGEX: &str = "regex";
pub const NO_EQU: &str = "noEqu";
pub const LESS: &str = "less";
pub const NO_LESS: &str = "noLess";
pub const GREATER: &str = "greater";
pub const NO_GREATER: &str = "noGreater";

/// Compiled expressions shared by the regex operator.
#[derive(Debug, Default)]
struct RegexCache {
    compiled: DashMap<String, Regex>,
}

impl RegexCache {
    fn compile(&self, expr: &str) -> Result<Regex, regex::Error> {
        if let Some(re) = self.compiled.get(expr) {
            return Ok(re.clone());
        }
        let re = Regex::new(expr)?;
        self.compiled.insert(expr.to_string(), re.clone());
        Ok(re)
    }

    fn is_match(&self, value: &str, expr: &str) -> bool {
        match self.compile(expr) {
            Ok(re) => re.is_match(value),
            Err(e) => {
                warn!(expression = %expr, error = %e, "Invalid regex in match policy");
                false
            }
        }
    }
}

fn compare_ints(value: &str, expr: &str, cmp: fn(i64, i64) -> bool) -> bool {
    match (value.trim().parse::<i64>(), expr.trim().parse::<i64>()) {
        (Ok(v), Ok(e)) => cmp(v, e),
        _ => false,
    }
}

/// Named string predicates used by match policies and routing rules.
pub struct OperatorRegistry {
    ops: RwLock<HashMap<String, OperatorFn>>,
    regex_cache: Arc<RegexCache>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.ops.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("OperatorRegistry")
            .field("operators", &names)
            .finish()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        let regex_cache = Arc::new(RegexCache::default());
        let mut ops: HashMap<String, OperatorFn> = HashMap::new();
        ops.insert(EXACT.into(), Arc::new(|v: &str, e: &str| v == e));
        ops.insert(CONTAINS.into(), Arc::new(|v: &str, e: &str| v.contains(e)));
        ops.insert(NO_EQU.into(), Arc::new(|v: &str, e: &str| v != e));
        ops.insert(LESS.into(), Arc::new(|v: &str, e: &str| compare_ints(v, e, |a, b| a < b)));
        ops.insert(NO_LESS.into(), Arc::new(|v: &str, e: &str| compare_ints(v, e, |a, b| a >= b)));
        ops.insert(GREATER.into(), Arc::new(|v: &str, e: &str| compare_ints(v, e, |a, b| a > b)));
        ops.insert(NO_GREATER.into(), Arc::new(|v: &str, e: &str| compare_ints(v, e, |a, b| a <= b)));
        let cache = Arc::clone(&regex_cache);
        ops.insert(REGEX.into(), Arc::new(move |v: &str, e: &str| cache.is_match(v, e)));

        Self {
            ops: RwLock::new(ops),
            regex_cache,
        }
    }

    /// Add or replace an operator.
    pub fn install(&self, name: &str, op: OperatorFn) {
        debug!(operator = %name, "Installed match operator");
        self.ops.write().insert(name.to_string(), op);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.read().contains_key(name)
    }

    pub fn matches(&self, operator: &str, value: &str, expr: &str) -> Result<bool, MatchError> {
        let op = self
            .ops
            .read()
            .get(operator)
            .cloned()
            .ok_or_else(|| MatchError::UnknownOperator {
                operator: operator.to_string(),
            })?;
        Ok(op(value, expr))
    }

    /// Load-time check of an operator/expression pair.
    pub fn validate(&self, operator: &str, expr: &str) -> Result<(), MatchError> {
        if !self.contains(operator) {
            return Err(MatchError::UnknownOperator {
                operator: operator.to_string(),
            });
        }
        if operator == REGEX {
            self.regex_cache
                .compile(expr)
                .map_err(|e| MatchError::InvalidRegex {
                    expression: expr.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
