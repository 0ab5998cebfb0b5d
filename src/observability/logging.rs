//! Logging setup: stdout plus optional daily-rolling file output.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_LOG_TARGET: &str = "svc_chassis";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_format: bool,
    pub log_dir: Option<String>,
    pub colorize: bool,
    pub log_file_name: String,
    pub log_targets: Option<Vec<String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_dir: None,
            colorize: true,
            log_file_name: "svc-chassis".to_string(),
            log_targets: Some(vec![DEFAULT_LOG_TARGET.to_string()]),
        }
    }
}

/// Keeps the file writer thread alive; drop it last.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

fn build_filter_string(targets: &[String], level: &str) -> String {
    targets
        .iter()
        .map(|t| format!("{t}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides the configured targets.
/// Calling it again is harmless: later calls leave the first subscriber in place.
pub fn init_logging(config: LoggingConfig) -> LogGuard {
    let _ = LogTracer::init();

    let level = level_to_str(config.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter = match &config.log_targets {
            Some(targets) if !targets.is_empty() => build_filter_string(targets, level),
            _ => format!("{DEFAULT_LOG_TARGET}={level}"),
        };
        EnvFilter::new(filter)
    });

    let mut layers = Vec::with_capacity(2);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.colorize)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()));
    let stdout_layer = if config.json_format {
        stdout_layer.json().flatten_event(true).boxed()
    } else {
        stdout_layer.boxed()
    };
    layers.push(stdout_layer);

    let mut file_guard = None;
    if let Some(log_dir) = &config.log_dir {
        let log_dir = PathBuf::from(log_dir);
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, &config.log_file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);

                let file_layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
                    .with_writer(writer);
                let file_layer = if config.json_format {
                    file_layer.json().flatten_event(true).boxed()
                } else {
                    file_layer.boxed()
                };
                layers.push(file_layer);
            }
            Err(e) => eprintln!("Failed to create log directory: {e}"),
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_string() {
        let targets = vec!["svc_chassis".to_string(), "app".to_string()];
        assert_eq!(build_filter_string(&targets, "debug"), "svc_chassis=debug,app=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let _a = init_logging(LoggingConfig::default());
        let _b = init_logging(LoggingConfig {
            json_format: true,
            ..Default::default()
        });
    }
}
