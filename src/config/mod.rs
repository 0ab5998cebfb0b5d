pub mod governance;
pub mod source;
pub mod types;

pub use governance::{GovernanceReport, reload_governance};
pub use source::{ConfigSource, ConfigSourceExt, MemoryConfigSource};
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
