//! Configuration loading helper functions
//! Provides utilities for loading single values with fallback logic

use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

/// Get configuration value with priority: ENV > configured > default
///
/// # Arguments
/// * `configured` - Value from the configuration file, if any
/// * `env_var` - Environment variable name to check
/// * `default` - Default value to use as fallback
pub fn get_config_value<T>(configured: Option<T>, env_var: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.parse::<T>() {
            Ok(val) => {
                debug!("Using {} from environment: {}", env_var, env_str);
                return val;
            },
            Err(e) => {
                warn!("Failed to parse {} from environment: {}", env_var, e);
            },
        }
    }

    if let Some(val) = configured {
        return val;
    }

    debug!("Using default value for {}", env_var);
    default
}

/// Parse a boolean flag the way the deployment scripts write them
///
/// Accepts `1/0`, `true/false`, `yes/no`, `on/off` (case-insensitive).
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Some(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_get_config_value_priority() {
        let val = get_config_value(Some(7u32), "PROTSRV_TEST_UNSET_VALUE", 5);
        assert_eq!(val, 7);

        let val = get_config_value(None, "PROTSRV_TEST_UNSET_VALUE", 5u32);
        assert_eq!(val, 5);
    }

    #[test]
    fn test_parse_bool_flag() {
        assert_eq!(parse_bool_flag("True"), Some(true));
        assert_eq!(parse_bool_flag(" 0 "), Some(false));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
