//! Unified logging module for the grid protection services
//!
//! Console output and a daily rolling log file share one `EnvFilter`.
//! `RUST_LOG` overrides the configured levels when set.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use errors::{GridError, GridResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Evaluator started`
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
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

/// Resolve the log root directory
///
/// Priority: `PROTSRV_LOG_DIR` env > configured directory > "logs"
pub fn get_log_root(config_dir: Option<&str>) -> PathBuf {
    std::env::var("PROTSRV_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            config_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "protsrv")
    pub service_name: String,
    /// Base directory for logs
    pub log_dir: PathBuf,
    /// Console log level
    pub console_level: Level,
    /// Level applied to the service's own targets
    pub file_level: Level,
    /// Enable JSON format for the file layer
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(None),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Build the filter string used when `RUST_LOG` is not set
///
/// Crate names use underscores in tracing targets.
fn default_filter(config: &LogConfig) -> String {
    format!(
        "{},{}={},grid_aggregator={},grid_model={}",
        config.console_level.as_str().to_lowercase(),
        config.service_name.replace('-', "_"),
        config.file_level.as_str().to_lowercase(),
        config.file_level.as_str().to_lowercase(),
        config.file_level.as_str().to_lowercase(),
    )
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> GridResult<()> {
    fs::create_dir_all(&config.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(
        &config.log_dir,
        format!("{}.log", config.service_name),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let slot = GUARD.get_or_init(|| Mutex::new(None));
    match slot.lock() {
        Ok(mut slot) => *slot = Some(guard),
        Err(poisoned) => {
            eprintln!("Warning: log GUARD lock was poisoned, recovering...");
            *poisoned.into_inner() = Some(guard);
        },
    }

    let env_filter = match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => EnvFilter::try_new(&env_str)
            .map_err(|e| GridError::invalid_config("RUST_LOG", e.to_string()))?,
        _ => EnvFilter::new(default_filter(&config)),
    };

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| GridError::config(format!("Failed to init logging: {}", e)))?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Install a test-friendly subscriber (captured by the test harness)
///
/// Safe to call from many tests; only the first call installs.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
