//! protsrv configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. YAML file (`config/protsrv.yaml` unless overridden on the command line)
//! 3. `PROTSRV_` environment variables, nested with `__`
//!    (e.g. `PROTSRV_PROTECTION__NOMINAL_CURRENT=2`)
//! 4. Deployment variables of the protection container
//!    (`NOMINAL_CURRENT`, `CURRENT_EPS`, `MAX_FAULTY_STATES`,
//!    `TIMESTAMP_PRECISION`, `THREE_PHASE_CALCULATION`)

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::config_loader::{get_config_value, parse_bool_flag};
use errors::{GridError, GridResult};
use grid_aggregator::AggregatorConfig;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/protsrv.yaml";

/// Service identity and input files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Topology descriptor (JSON)
    pub topology_path: String,
    /// Device list registered at the gateway on startup
    pub device_path: Option<String>,
    /// Folder of the gateway address space holding the grid tags
    pub scope: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "protsrv".to_string(),
            topology_path: "config/topology.json".to_string(),
            device_path: None,
            scope: "GridProtection".to_string(),
        }
    }
}

/// Differential protection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Nominal current in A
    pub nominal_current: f64,
    /// Tolerated imbalance as a fraction of the nominal current
    pub eps_fraction: f64,
    /// Consecutive faulty cycles before the protective action fires
    pub max_faulty_states: u32,
    pub timestamp_precision_ms: u64,
    /// Evaluate phases 1-3 instead of phase 1 only
    pub three_phase_calculation: bool,
    /// Maximum buffered rows per phase
    pub buffer_limit: usize,
    pub poll_interval_ms: u64,
    /// Sleep between state checks while not running
    pub idle_interval_ms: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            nominal_current: 275.0,
            eps_fraction: 0.05,
            max_faulty_states: 5,
            timestamp_precision_ms: 10,
            three_phase_calculation: false,
            buffer_limit: 100,
            poll_interval_ms: 5,
            idle_interval_ms: 1000,
        }
    }
}

impl ProtectionConfig {
    /// Absolute tolerance in A (`nominal_current * eps_fraction`)
    pub fn tolerance_abs(&self) -> f64 {
        self.nominal_current * self.eps_fraction
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            timestamp_precision_ms: self.timestamp_precision_ms,
            buffer_limit: self.buffer_limit,
        }
    }
}

/// Tag naming conventions of the address space
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConventions {
    /// Marker of infeed-limit actuators among the controls
    pub limit_ctrl: String,
    /// Markers of fault-counter telemetry tags among the status tags
    pub fault_counter: Vec<String>,
    /// Command flag requesting a topology reload
    pub update_request_topology: String,
    /// Command flag switching protection on and off
    pub run_online_grid_protection: String,
    /// Status tag reflecting whether the evaluator is running
    pub protection_online: String,
    /// Infeed limit written on startup (%)
    pub limit_start_value: f64,
    /// Infeed limit written by the protective action (%)
    pub limit_trip_value: f64,
}

impl Default for TagConventions {
    fn default() -> Self {
        Self {
            limit_ctrl: "LIMIT_CTRL".to_string(),
            fault_counter: vec!["FAULT_COUNTER".to_string(), "FEHLER_COUNTER".to_string()],
            update_request_topology: "UPDATE_REQUEST_TOPOLOGY".to_string(),
            run_online_grid_protection: "RUN_ONLINE_GRID_PROTECTION".to_string(),
            protection_online: "GRID_PROTECTION_ONLINE".to_string(),
            limit_start_value: 100.0,
            limit_trip_value: 0.0,
        }
    }
}

impl TagConventions {
    pub fn is_fault_counter(&self, tag: &str) -> bool {
        self.fault_counter.iter().any(|m| tag.contains(m.as_str()))
    }
}

/// Gateway connection and subscription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Only the in-process `memory` gateway ships with this service
    pub kind: String,
    pub endpoint: String,
    pub measurement_interval_ms: u64,
    pub status_interval_ms: u64,
    /// Connectivity probe period
    pub supervision_interval_ms: u64,
    /// Fixed backoff before replaying the startup sequence
    pub reconnect_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            endpoint: "memory://protsrv".to_string(),
            measurement_interval_ms: 1,
            status_interval_ms: 500,
            supervision_interval_ms: 1000,
            reconnect_delay_ms: 1000,
        }
    }
}

impl GatewayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn supervision_interval(&self) -> Duration {
        Duration::from_millis(self.supervision_interval_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtsrvConfig {
    pub service: ServiceConfig,
    pub protection: ProtectionConfig,
    pub tags: TagConventions,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

impl ProtsrvConfig {
    /// Load configuration from defaults, file and environment, then validate
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load(path: impl AsRef<Path>) -> GridResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            info!("Loading configuration from {}", path.display());
        } else {
            debug!("Config file {} not found, using defaults", path.display());
        }

        let mut config: ProtsrvConfig = Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("PROTSRV_").split("__"))
            .extract()?;

        config.apply_deployment_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML string on top of the defaults (no environment)
    pub fn from_yaml_str(content: &str) -> GridResult<Self> {
        let config: ProtsrvConfig = Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::string(content))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the plain variable names used by the protection container
    fn apply_deployment_env(&mut self) {
        let defaults = ProtectionConfig::default();
        let p = &mut self.protection;

        p.nominal_current =
            get_config_value(Some(p.nominal_current), "NOMINAL_CURRENT", defaults.nominal_current);
        p.eps_fraction = get_config_value(Some(p.eps_fraction), "CURRENT_EPS", defaults.eps_fraction);
        p.max_faulty_states = get_config_value(
            Some(p.max_faulty_states),
            "MAX_FAULTY_STATES",
            defaults.max_faulty_states,
        );
        p.timestamp_precision_ms = get_config_value(
            Some(p.timestamp_precision_ms),
            "TIMESTAMP_PRECISION",
            defaults.timestamp_precision_ms,
        );
        if let Ok(raw) = std::env::var("THREE_PHASE_CALCULATION") {
            match parse_bool_flag(&raw) {
                Some(flag) => p.three_phase_calculation = flag,
                None => warn!("Ignoring THREE_PHASE_CALCULATION={}", raw),
            }
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> GridResult<()> {
        let p = &self.protection;
        if !(p.nominal_current.is_finite() && p.nominal_current > 0.0) {
            return Err(GridError::invalid_config(
                "protection.nominal_current",
                "must be a positive number",
            ));
        }
        if !(p.eps_fraction > 0.0 && p.eps_fraction <= 1.0) {
            return Err(GridError::invalid_config(
                "protection.eps_fraction",
                "must be in (0, 1]",
            ));
        }
        if p.max_faulty_states == 0 {
            return Err(GridError::invalid_config(
                "protection.max_faulty_states",
                "must be at least 1",
            ));
        }
        if p.timestamp_precision_ms == 0 {
            return Err(GridError::invalid_config(
                "protection.timestamp_precision_ms",
                "must be at least 1",
            ));
        }
        if p.buffer_limit == 0 {
            return Err(GridError::invalid_config(
                "protection.buffer_limit",
                "must be at least 1",
            ));
        }
        if p.poll_interval_ms == 0 || p.idle_interval_ms == 0 {
            return Err(GridError::invalid_config(
                "protection.poll_interval_ms",
                "poll and idle intervals must be at least 1",
            ));
        }

        if self.service.topology_path.trim().is_empty() {
            return Err(GridError::invalid_config(
                "service.topology_path",
                "cannot be empty",
            ));
        }
        if self.service.scope.trim().is_empty() {
            return Err(GridError::invalid_config("service.scope", "cannot be empty"));
        }

        let t = &self.tags;
        if t.limit_ctrl.is_empty() || t.update_request_topology.is_empty() {
            return Err(GridError::invalid_config(
                "tags",
                "tag markers cannot be empty",
            ));
        }

        let g = &self.gateway;
        if g.kind != "memory" {
            return Err(GridError::invalid_config(
                "gateway.kind",
                format!("unsupported gateway `{}`", g.kind),
            ));
        }
        if g.measurement_interval_ms == 0
            || g.status_interval_ms == 0
            || g.supervision_interval_ms == 0
        {
            return Err(GridError::invalid_config(
                "gateway",
                "intervals must be at least 1 ms",
            ));
        }

        Ok(())
    }
}
