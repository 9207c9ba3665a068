//! Device list parsing
//!
//! One tag per line followed by its numeric type code:
//!
//! ```text
//! MS1_I_PH1_RES   4
//! PV1_LIMIT_CTRL,2,0
//! ```
//!
//! Fields may be separated by whitespace, tabs or commas. Anything after the
//! type code is ignored. Empty lines and lines starting with `#` are skipped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use errors::{GridError, GridResult};

use crate::types::ValueType;

/// Tag to register at the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub tag: String,
    pub value_type: ValueType,
}

impl DeviceSpec {
    pub fn new(tag: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            tag: tag.into(),
            value_type,
        }
    }
}

/// Parse a device list; `source` names the origin in error messages
pub fn parse_device_list(content: &str, source: &str) -> GridResult<Vec<DeviceSpec>> {
    let mut devices = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty());

        let (Some(tag), Some(code)) = (fields.next(), fields.next()) else {
            return Err(GridError::parse(
                source,
                format!("line {}: expected `<tag> <type code>`", line_no + 1),
            ));
        };

        let code: u8 = code.parse().map_err(|_| {
            GridError::parse(
                source,
                format!("line {}: invalid type code `{}`", line_no + 1, code),
            )
        })?;

        devices.push(DeviceSpec::new(tag, ValueType::from_type_code(code)));
    }

    debug!("Parsed {} devices from {}", devices.len(), source);
    Ok(devices)
}

/// Load and parse a device list file
pub fn load_device_file(path: impl AsRef<Path>) -> GridResult<Vec<DeviceSpec>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(GridError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_device_list(&content, &path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_separators() {
        let content = "MS1_I_PH1_RES\t4\nPV1_LIMIT_CTRL,2,0\n\n# comment\nUPDATE_REQUEST_TOPOLOGY 2\nMS1_P_RES 9\n";
        let devices = parse_device_list(content, "devices.txt").unwrap();

        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0], DeviceSpec::new("MS1_I_PH1_RES", ValueType::Float));
        assert_eq!(devices[1], DeviceSpec::new("PV1_LIMIT_CTRL", ValueType::Int16));
        assert_eq!(devices[2].value_type, ValueType::Int16);
        assert_eq!(devices[3].value_type, ValueType::Double);
    }

    #[test]
    fn test_parse_missing_type_code() {
        let err = parse_device_list("MS1_I_PH1_RES\n", "devices.txt").unwrap_err();
        assert!(err.to_string().contains("line 1"));

        let err = parse_device_list("A 4\nB x\n", "devices.txt").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_device_file("/nonexistent/devices.txt").unwrap_err();
        assert!(matches!(err, GridError::FileNotFound(_)));
    }
}
