//! Basic library shared by the grid protection services
//!
//! Provides:
//! - logging initialization (console + daily file)
//! - shutdown signal handling
//! - configuration value fallback helpers
//! - service bootstrap helpers (banner, development env)

pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use tokio;
pub use tokio_util::sync::CancellationToken;
