//! Service Bootstrap and Initialization
//!
//! Command-line arguments, logging setup and the `--validate` dry run.

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info, warn};

use common::service_bootstrap::{self, ServiceInfo};
use errors::GridResult;
use grid_model::{load_device_file, Phase, Tag, TopologyClassifier, TopologyDescriptor};

use crate::config::{ProtsrvConfig, DEFAULT_CONFIG_PATH};

/// Command-line arguments
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Differential current protection service")]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output and the banner
    #[arg(long)]
    pub no_color: bool,

    /// Only validate configuration and input files without starting
    #[arg(long)]
    pub validate: bool,
}

/// Initialize service info for unified bootstrap
pub fn create_service_info(config: &ProtsrvConfig) -> ServiceInfo {
    ServiceInfo::new(config.service.name.clone(), "Differential Current Protection")
}

/// Initialize logging; the command line overrides the configured level
pub fn initialize_logging(
    service: &ServiceInfo,
    config: &ProtsrvConfig,
    args: &Args,
) -> GridResult<()> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str());
    service_bootstrap::init_logging(
        service,
        service_bootstrap::parse_log_level(level),
        config.logging.dir.as_deref(),
        config.logging.json,
        !args.no_color,
    )
}

/// Summary of a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub grid_id: String,
    pub pocs: usize,
    /// Devices in the device list (0 without one)
    pub devices: usize,
    /// Phase current POCs per phase, as far as the device list declares them
    pub phase_tags: [usize; 3],
}

/// Check configuration and input files without touching the gateway
///
/// When a device list is configured the descriptor is classified against it
/// to report what the service would see after registration.
pub fn validate_configuration(config: &ProtsrvConfig) -> GridResult<ValidationReport> {
    debug!("Validating configuration");
    config.validate()?;

    let descriptor = TopologyDescriptor::from_file(&config.service.topology_path)?;
    info!(
        grid_id = %descriptor.grid_id,
        pocs = descriptor.pocs.len(),
        "Topology descriptor valid"
    );

    let mut report = ValidationReport {
        grid_id: descriptor.grid_id.clone(),
        pocs: descriptor.pocs.len(),
        devices: 0,
        phase_tags: [0; 3],
    };

    match &config.service.device_path {
        Some(path) => {
            let devices = load_device_file(path)?;
            let known: Vec<_> = devices
                .iter()
                .map(|d| Tag::new(d.tag.clone(), d.value_type))
                .collect();
            let topology = TopologyClassifier::classify(&descriptor, &known);
            report.devices = devices.len();
            for phase in Phase::ALL {
                report.phase_tags[phase.index()] = topology.phase_tags(phase).len();
            }
            info!(devices = devices.len(), "Device list valid");
        },
        None => warn!("No device list configured, tags must already exist at the gateway"),
    }

    if let Ok(rendered) = serde_yaml::to_string(config) {
        debug!("Effective configuration:\n{}", rendered);
    }
    Ok(report)
}
