//! Interpreter configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by invalid configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A concurrency limit was zero.
    #[error("{field} must be greater than 0")]
    ZeroLimit {
        /// The offending setting.
        field: &'static str,
    },

    /// A monitor interval was zero.
    #[error("{field} must be a non-zero duration")]
    ZeroInterval {
        /// The offending setting.
        field: &'static str,
    },
}

/// Process-wide limits shared by every action tree.
///
/// Missing fields take their defaults when deserialized.
///
/// # Examples
///
/// ```
/// use vessel::InterpreterConfig;
///
/// let config = InterpreterConfig::default();
/// assert_eq!(config.max_concurrent_downloads, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Downloads allowed to run at once.
    pub max_concurrent_downloads: usize,
    /// Uploads allowed to run at once.
    pub max_concurrent_uploads: usize,
    /// Health checks allowed to run at once.
    pub health_check_work_pool_size: usize,
    /// Where uploads stage their compressed archives.
    pub temp_dir: PathBuf,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 5,
            max_concurrent_uploads: 5,
            health_check_work_pool_size: 64,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl InterpreterConfig {
    /// Rejects limits that would block every step forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_concurrent_downloads", self.max_concurrent_downloads),
            ("max_concurrent_uploads", self.max_concurrent_uploads),
            ("health_check_work_pool_size", self.health_check_work_pool_size),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: InterpreterConfig =
            serde_json::from_str(r#"{"max_concurrent_uploads": 2, "temp_dir": "/var/vcap/tmp"}"#)
                .expect("valid config");
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.health_check_work_pool_size, 64);
        assert_eq!(config.temp_dir, PathBuf::from("/var/vcap/tmp"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config = InterpreterConfig {
            health_check_work_pool_size: 0,
            ..InterpreterConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                field: "health_check_work_pool_size"
            })
        );
        assert_eq!(
            config.validate().map_err(|e| e.to_string()),
            Err("health_check_work_pool_size must be greater than 0".to_string())
        );
    }
}
