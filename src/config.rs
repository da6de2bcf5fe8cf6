//! Configuration for setu-link applications
//!
//! Loads configuration from a TOML file: the device attachment, timeout
//! overrides, and logging.

use crate::device::{BoardId, DeviceInfo};
use crate::error::{Error, Result};
use crate::timeout::Timeout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

/// Device attachment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Device control-plane IP address
    pub peer_ip: String,
    /// UDP port for control transactions
    pub control_port: u16,
    /// Device serial number
    pub serial_number: String,
    /// Ask the device to verify sequence numbers on every transaction
    pub sequence_number_checking: bool,
    /// Numeric board id from enumeration metadata, when known
    pub board_id: Option<u32>,
}

/// Timeout overrides, in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Deadline for one register access including retries
    pub register_ms: u64,
    /// Resend cadence for register accesses
    pub register_retry_ms: u64,
    /// Deadline for one I2C transaction
    pub i2c_ms: u64,
    /// Deadline for one SPI transaction
    pub spi_ms: u64,
    /// Poll cadence while waiting on a bus controller
    #[serde(default = "default_bus_retry_ms")]
    pub bus_retry_ms: u64,
}

fn default_bus_retry_ms() -> u64 {
    100
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout or stderr)
    pub output: String,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a bridge on the standard attachment.
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn bridge_defaults() -> Self {
        Self {
            device: DeviceConfig {
                peer_ip: "192.168.0.2".to_string(),
                control_port: 8192,
                serial_number: "0".to_string(),
                sequence_number_checking: true,
                board_id: None,
            },
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::bridge_defaults()
    }
}

impl DeviceConfig {
    /// Resolve the configuration into a [`DeviceInfo`], validating the IP
    /// address and board id.
    pub fn device_info(&self) -> Result<DeviceInfo> {
        let peer_ip = self.peer_ip.parse().map_err(|_| {
            Error::InvalidParameter(format!("unparseable peer_ip \"{}\"", self.peer_ip))
        })?;
        let board_id = match self.board_id {
            Some(id) => Some(BoardId::from_wire(id)?),
            None => None,
        };
        Ok(DeviceInfo {
            peer_ip,
            control_port: self.control_port,
            serial_number: self.serial_number.clone(),
            sequence_number_checking: self.sequence_number_checking,
            board_id,
        })
    }
}

impl TimeoutConfig {
    /// Register-access timeout policy from the configured values.
    pub fn register_access(&self) -> Timeout {
        Timeout::new(
            Duration::from_millis(self.register_ms),
            Duration::from_millis(self.register_retry_ms),
        )
    }

    /// I2C transaction timeout policy from the configured values.
    pub fn i2c(&self) -> Timeout {
        Timeout::new(
            Duration::from_millis(self.i2c_ms),
            Duration::from_millis(self.bus_retry_ms),
        )
    }

    /// SPI transaction timeout policy from the configured values.
    pub fn spi(&self) -> Timeout {
        Timeout::new(
            Duration::from_millis(self.spi_ms),
            Duration::from_millis(self.bus_retry_ms),
        )
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            register_ms: 500,
            register_retry_ms: 50,
            i2c_ms: 1000,
            spi_ms: 1000,
            bus_retry_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::bridge_defaults();
        assert_eq!(config.device.peer_ip, "192.168.0.2");
        assert_eq!(config.device.control_port, 8192);
        assert!(config.device.sequence_number_checking);
        assert_eq!(config.timeouts.register_ms, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::bridge_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        assert!(toml_string.contains("[device]"));
        assert!(toml_string.contains("[timeouts]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("peer_ip = \"192.168.0.2\""));
        assert!(toml_string.contains("control_port = 8192"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[device]
peer_ip = "10.0.0.7"
control_port = 8192
serial_number = "A1B2C3"
sequence_number_checking = false
board_id = 5

[logging]
level = "debug"
output = "stderr"
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.peer_ip, "10.0.0.7");
        assert_eq!(config.device.serial_number, "A1B2C3");
        // [timeouts] omitted falls back to defaults
        assert_eq!(config.timeouts.i2c_ms, 1000);
        assert_eq!(config.timeouts.bus_retry_ms, 100);

        let info = config.device.device_info().unwrap();
        assert_eq!(info.board_id, Some(crate::device::BoardId::Nano));
        assert!(!info.sequence_number_checking);
    }

    #[test]
    fn test_bad_peer_ip_rejected() {
        let mut config = AppConfig::bridge_defaults();
        config.device.peer_ip = "not-an-ip".to_string();
        assert!(config.device.device_info().is_err());
    }
}
