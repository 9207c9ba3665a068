//! protsrv - differential current protection service

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use common::service_bootstrap::{load_development_env, print_startup_banner};
use common::shutdown::cancel_on_shutdown;
use common::CancellationToken;
use protsrv::bootstrap::{self, Args};
use protsrv::{MemoryGateway, ProtectionManager, ProtsrvConfig};

#[tokio::main]
async fn main() -> Result<()> {
    load_development_env();
    let args = Args::parse();

    let config = ProtsrvConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;

    let service_info = bootstrap::create_service_info(&config);
    bootstrap::initialize_logging(&service_info, &config, &args)
        .context("Failed to initialize logging")?;
    if !args.no_color {
        print_startup_banner(&service_info);
    }

    if args.validate {
        let report = bootstrap::validate_configuration(&config)?;
        info!(
            grid_id = %report.grid_id,
            pocs = report.pocs,
            devices = report.devices,
            "Configuration valid"
        );
        return Ok(());
    }

    let gateway = Arc::new(MemoryGateway::new(config.gateway.endpoint.clone()));
    let manager = ProtectionManager::new(config, gateway);
    let shutdown = cancel_on_shutdown(CancellationToken::new());

    if let Err(e) = manager.run(shutdown).await {
        error!("protsrv stopped with error: {}", e);
        return Err(e.into());
    }

    info!("protsrv stopped");
    Ok(())
}
