//! Unified service bootstrap utilities
//!
//! Startup banner, logging initialization and development environment setup.

use crate::logging::{self, LogConfig};
use errors::GridResult;
use tracing::{info, Level};

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "protsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "protsrv" => {
            r#"
 ██████╗ ██████╗  ██████╗ ████████╗███████╗██████╗ ██╗   ██╗
 ██╔══██╗██╔══██╗██╔═══██╗╚══██╔══╝██╔════╝██╔══██╗██║   ██║
 ██████╔╝██████╔╝██║   ██║   ██║   ███████╗██████╔╝██║   ██║
 ██╔═══╝ ██╔══██╗██║   ██║   ██║   ╚════██║██╔══██╗╚██╗ ██╔╝
 ██║     ██║  ██║╚██████╔╝   ██║   ███████║██║  ██║ ╚████╔╝
 ╚═╝     ╚═╝  ╚═╝ ╚═════╝    ╚═╝   ╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => "",
    };

    if !banner.is_empty() {
        info!("{}", banner);
    }
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. PROTSRV_LOG_DIR environment variable
/// 2. `log_dir` from the service configuration
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    console_level: Level,
    log_dir: Option<&str>,
    enable_json: bool,
    ansi: bool,
) -> GridResult<()> {
    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root(log_dir).join(&service.name),
        console_level,
        file_level: Level::DEBUG,
        enable_json,
        ansi,
    };

    logging::init_with_config(log_config)
}

/// Load environment variables in development mode
///
/// In debug builds, reads .env file and sets variables that are not already
/// set. In release builds this is a no-op.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for line in content.lines() {
                let trimmed = line.trim();
                if trimmed.starts_with('#') || trimmed.is_empty() {
                    continue;
                }

                if let Some((key, value)) = trimmed.split_once('=') {
                    let key = key.trim();
                    let value = value.trim();

                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
        }
    }
}

/// Parse log level string to tracing::Level (defaults to INFO)
pub fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
