//! Structured logging and tracing for Helion
//!
//! Console, rolling file and an in-process broadcast sink (feeding the web
//! log stream) each get their own level filter.

use crate::config::LoggingConfig;
use crate::error::{HelionError, Result};
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod broadcast;
mod level;
mod state;
mod structured;

pub use broadcast::subscribe_log_lines;
pub use level::{parse_line_level, parse_log_level, set_web_log_level_str, should_emit_to_web};
pub use state::{get_web_log_level, set_web_log_level};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

use broadcast::{BroadcastMakeWriter, get_or_init_log_tx};
use level::min_level;
use state::{INIT_ERROR, INIT_ONCE, LOG_GUARD};

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.level)?;

            let layer_level = |value: &Option<String>| {
                value
                    .as_ref()
                    .and_then(|s| parse_log_level(s).ok())
                    .unwrap_or(base_level)
            };
            let console_level = layer_level(&config.console_level);
            let file_level = layer_level(&config.file_level);
            let web_level = layer_level(&config.web_level);

            // The env filter must admit the most verbose sink; each layer narrows it down
            let most_verbose = min_level(min_level(console_level, file_level), web_level);
            let filter = build_env_filter(most_verbose);

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, console_level, web_level);
            } else {
                init_file_logging(config, filter, console_level, file_level, web_level)?;
            }
            set_web_log_level(web_level);
            Ok(())
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(HelionError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "helion={},tower_http={},reqwest=warn,rusqlite=warn",
            level, level
        )
        .into()
    })
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("HELION_DISABLE_FILE_LOG").is_some()
}

fn broadcast_layer<S>(json_format: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let make = BroadcastMakeWriter {
        tx: get_or_init_log_tx(),
    };
    let base = fmt::layer()
        .with_writer(make)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_ansi(false);
    // Capture everything; the SSE handler applies the runtime web level
    if json_format {
        base.json().with_filter(LevelFilter::TRACE).boxed()
    } else {
        base.with_filter(LevelFilter::TRACE).boxed()
    }
}

fn console_layer<S>(json_format: bool, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    if json_format {
        base.json()
            .with_filter(LevelFilter::from_level(level))
            .boxed()
    } else {
        base.with_filter(LevelFilter::from_level(level)).boxed()
    }
}

fn init_console_only_logging(
    filter: EnvFilter,
    json_format: bool,
    console_level: Level,
    web_level: Level,
) {
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(json_format, console_level))
        .with(broadcast_layer(json_format))
        .try_init();

    // Tests and embedders may already own the global subscriber
    if result.is_ok() {
        info!(
            "Logging initialized - console_level: {:?}, web_level: {:?}, console-only",
            console_level, web_level
        );
    }
}

fn init_file_logging(
    config: &LoggingConfig,
    filter: EnvFilter,
    console_level: Level,
    file_level: Level,
    web_level: Level,
) -> Result<()> {
    let (log_dir, prefix) = split_log_path(&config.file);

    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1) as usize)
        .build(log_dir)
        .map_err(|e| HelionError::io(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_ansi(false);
        if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(file_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(file_level))
                .boxed()
        }
    };

    let console = config
        .console_output
        .then(|| console_layer(config.json_format, console_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(broadcast_layer(config.json_format))
        .with(console)
        .try_init()
        .map_err(|e| HelionError::config(format!("Logging already initialized: {}", e)))?;

    info!(
        "Logging initialized - console_level: {:?}, file_level: {:?}, web_level: {:?}, file: {}",
        console_level, file_level, web_level, config.file
    );
    Ok(())
}

/// Split the configured log path into the rolling directory and file prefix
fn split_log_path(configured: &str) -> (&Path, String) {
    let p = Path::new(configured);
    if p.extension().is_some() {
        let dir = p
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = p
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("helion")
            .to_string();
        (dir, prefix)
    } else {
        (p, "helion".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_split_log_path() {
        let (dir, prefix) = split_log_path("/var/log/helion/poller.log");
        assert_eq!(dir, Path::new("/var/log/helion"));
        assert_eq!(prefix, "poller");

        let (dir, prefix) = split_log_path("/var/log/helion");
        assert_eq!(dir, Path::new("/var/log/helion"));
        assert_eq!(prefix, "helion");

        let (dir, _) = split_log_path("helion.log");
        assert_eq!(dir, Path::new("."));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
