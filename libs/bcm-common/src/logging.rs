//! Logging bootstrap
//!
//! Console output always uses the bracketed format
//! (`2025-12-02T00:50:44.809Z [INFO] message`). When a log directory is
//! configured, the same format is mirrored into a daily rolling file.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{CommonError, Result};

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "BCM_LOG";

// Keeps the non-blocking file writer alive for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `BCM_LOG` is not set (e.g. "info", "bcm_cases=debug")
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for the daily log file; console only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// File name prefix for the daily log file
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Colored console output
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "bcm".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
            file_prefix: default_file_prefix(),
            ansi: default_ansi(),
        }
    }
}

impl LogConfig {
    /// Filter directive in effect: `BCM_LOG` wins over the configured level
    pub fn effective_filter(&self) -> String {
        std::env::var(LOG_ENV).unwrap_or_else(|_| self.level.clone())
    }
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed or the filter cannot be parsed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter_str = config.effective_filter();
    let filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| CommonError::Logging(format!("Invalid filter '{}': {}", filter_str, e)))?;

    let file_layer = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => poisoned.into_inner().push(guard),
            }

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat),
            )
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(config.ansi)
                .event_format(BracketedLevelFormat),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| CommonError::Logging(e.to_string()))?;

    tracing::debug!("Logging initialized with filter '{}'", filter_str);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level_brackets() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::TRACE), "[TRACE]");
    }

    #[test]
    fn test_log_config_defaults() {
        let config: LogConfig = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(LogConfig::default()))
            .extract()
            .unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.file_prefix, "bcm");
        assert!(config.log_dir.is_none());
        assert!(config.ansi);
    }
}
