//! Transport configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HardwareError, Result};

/// Module default UART speed.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Serial speeds are multiples of this unit.
pub const BAUD_UNIT: u32 = 9_600;

/// Serial port settings for a sensor module.
///
/// The module runs 8N1 at a multiple of 9600 baud (1x to 12x).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// OS port name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,

    pub baud_rate: u32,

    /// Per-read timeout used when the caller does not pass one (milliseconds).
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Check the settings against what the module accepts.
    ///
    /// # Errors
    /// Returns `HardwareError::InvalidSettings` for an empty port name or
    /// a baud rate outside 9600..=115200 in 9600 steps.
    pub fn validate(&self) -> Result<()> {
        if self.port_name.is_empty() {
            return Err(HardwareError::invalid_settings("port name is empty"));
        }

        let multiple = self.baud_rate / BAUD_UNIT;
        if self.baud_rate % BAUD_UNIT != 0 || !(1..=12).contains(&multiple) {
            return Err(HardwareError::invalid_settings(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }

        if self.read_timeout_ms == 0 {
            return Err(HardwareError::invalid_settings("read timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::from("/dev/ttyUSB0"),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 57_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_odd_baud_rate() {
        let config = SerialConfig::new("/dev/ttyS1").with_baud_rate(56_000);
        assert!(matches!(
            config.validate(),
            Err(HardwareError::InvalidSettings { .. })
        ));

        let config = SerialConfig::new("/dev/ttyS1").with_baud_rate(9_600 * 13);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_port() {
        assert!(SerialConfig::new("").validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SerialConfig =
            serde_json::from_str(r#"{"port_name": "COM3", "baud_rate": 115200}"#).unwrap();
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout(), Duration::from_millis(200));
    }
}
