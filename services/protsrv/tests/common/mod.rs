//! Common test utilities and helpers

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use grid_model::{DeviceSpec, ValueType};
use protsrv::{ControlGateway, MemoryGateway, ProtsrvConfig};

pub const SCOPE: &str = "GridProtection";

/// Single-phase feeder: transformer (slack), PV plant and household
pub const TOPOLOGY: &str = r#"{
  "Grid-ID": "Test-Feeder",
  "POCs": [
    {"TR_I_PH1_RES": "slack"},
    {"PV_I_PH1_RES": "pv"},
    {"HH_I_PH1_RES": "load"},
    {"PV_LIMIT_CTRL": "pv"},
    {"GRID_PROTECTION_ONLINE": "status"},
    {"FAULT_COUNTER": "status"},
    {"UPDATE_REQUEST_TOPOLOGY": "status"},
    {"RUN_ONLINE_GRID_PROTECTION": "status"}
  ]
}"#;

pub const DEVICES: &str = "\
TR_I_PH1_RES 4
PV_I_PH1_RES 4
HH_I_PH1_RES 4
HH2_I_PH1_RES 4
PV_LIMIT_CTRL 2
GRID_PROTECTION_ONLINE 2
FAULT_COUNTER 2
UPDATE_REQUEST_TOPOLOGY 2
RUN_ONLINE_GRID_PROTECTION 2
";

pub fn device_specs() -> Vec<DeviceSpec> {
    grid_model::parse_device_list(DEVICES, "test").unwrap()
}

/// Write topology and device files and build a fast-cycling configuration
pub fn test_config(dir: &Path, topology: &str) -> ProtsrvConfig {
    let topology_path = dir.join("topology.json");
    let device_path = dir.join("devices.txt");
    std::fs::write(&topology_path, topology).unwrap();
    std::fs::write(&device_path, DEVICES).unwrap();

    let mut config = ProtsrvConfig::default();
    config.service.topology_path = topology_path.display().to_string();
    config.service.device_path = Some(device_path.display().to_string());
    config.protection.poll_interval_ms = 1;
    config.protection.idle_interval_ms = 10;
    config.gateway.measurement_interval_ms = 1;
    config.gateway.status_interval_ms = 5;
    config.gateway.supervision_interval_ms = 10;
    config.gateway.reconnect_delay_ms = 20;
    config
}

pub fn temp_config() -> (TempDir, ProtsrvConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), TOPOLOGY);
    (dir, config)
}

/// Connected gateway with the test devices registered
pub async fn registered_gateway() -> Arc<MemoryGateway> {
    let gateway = Arc::new(MemoryGateway::new("memory://test"));
    gateway.connect().await.unwrap();
    gateway.register_tags(SCOPE, &device_specs()).await.unwrap();
    gateway
}

/// Timestamp of measurement cycle `n`, one 10 ms bucket apart
pub fn cycle_ts(base: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    base + chrono::Duration::milliseconds(10 * n)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Await `future` with a test timeout
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}
