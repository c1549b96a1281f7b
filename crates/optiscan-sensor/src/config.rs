//! Driver configuration.
//!
//! All structs deserialize with defaults for missing fields, so a config
//! file only needs to name what it changes:
//!
//! ```
//! use optiscan_sensor::SensorConfig;
//!
//! let config: SensorConfig = serde_json::from_str(r#"{
//!     "password": 1234,
//!     "template": { "max_size": 2048 },
//!     "retry": { "max_attempts": 5 }
//! }"#).unwrap();
//!
//! assert_eq!(config.template.max_size, 2048);
//! assert_eq!(config.retry.max_attempts, 5);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use optiscan_core::constants::{
    DEFAULT_ADDRESS, DEFAULT_FINGER_POLL_INTERVAL_MS, DEFAULT_FINGER_TIMEOUT_MS,
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_PASSWORD, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_TEMPLATE_INITIAL_CAPACITY, DEFAULT_TEMPLATE_MAX_CHUNK,
    DEFAULT_TEMPLATE_MAX_SIZE, DEFAULT_TEMPLATE_TIMEOUT_MS, TEMPLATE_TERMINATOR,
};

use crate::error::{Result, SensorError};

/// Limits for template reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TemplateConfig {
    /// Bytes reserved when a collection starts.
    pub initial_capacity: usize,

    /// Hard cap on the assembled template.
    pub max_size: usize,

    /// Largest chunk accepted from a single packet; longer chunks are clamped.
    pub max_chunk: usize,

    /// Collection deadline measured from `start_collection` (milliseconds).
    pub timeout_ms: u64,

    /// Bounded wait for the template mutex (milliseconds).
    pub lock_timeout_ms: u64,
}

impl TemplateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_size < TEMPLATE_TERMINATOR.len() {
            return Err(SensorError::Config(format!(
                "template max_size {} is smaller than the terminator",
                self.max_size
            )));
        }
        if self.initial_capacity > self.max_size {
            return Err(SensorError::Config(format!(
                "template initial_capacity {} exceeds max_size {}",
                self.initial_capacity, self.max_size
            )));
        }
        if self.max_chunk == 0 {
            return Err(SensorError::Config("template max_chunk must be positive".into()));
        }
        if self.timeout_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(SensorError::Config("template timeouts must be positive".into()));
        }
        Ok(())
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_TEMPLATE_INITIAL_CAPACITY,
            max_size: DEFAULT_TEMPLATE_MAX_SIZE,
            max_chunk: DEFAULT_TEMPLATE_MAX_CHUNK,
            timeout_ms: DEFAULT_TEMPLATE_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// Retry budget shared by the multi-step procedures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Attempts per step before a procedure gives up.
    pub max_attempts: u8,

    /// Pause between image captures while no finger is on the sensor (milliseconds).
    pub finger_poll_interval_ms: u64,

    /// How long one capture attempt waits for a finger (milliseconds).
    pub finger_timeout_ms: u64,
}

impl RetryPolicy {
    pub fn finger_poll_interval(&self) -> Duration {
        Duration::from_millis(self.finger_poll_interval_ms)
    }

    pub fn finger_timeout(&self) -> Duration {
        Duration::from_millis(self.finger_timeout_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            finger_poll_interval_ms: DEFAULT_FINGER_POLL_INTERVAL_MS,
            finger_timeout_ms: DEFAULT_FINGER_TIMEOUT_MS,
        }
    }
}

/// Top-level driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SensorConfig {
    /// Module address written into every command.
    pub address: u32,

    /// Handshake password for `VfyPwd`.
    pub password: u32,

    /// Per-read wait on the transport (milliseconds).
    pub read_timeout_ms: u64,

    /// How long a command waits for its acknowledgment (milliseconds).
    pub response_timeout_ms: u64,

    /// Offset added to library page ids when reporting template ids.
    pub template_id_base: u16,

    /// Library size used by `search`. Read from the module when unset.
    pub library_capacity: Option<u16>,

    pub template: TemplateConfig,

    pub retry: RetryPolicy,
}

impl SensorConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    /// Returns `SensorError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_ms == 0 {
            return Err(SensorError::Config("read_timeout_ms must be positive".into()));
        }
        if self.response_timeout_ms < self.read_timeout_ms {
            return Err(SensorError::Config(format!(
                "response_timeout_ms {} is shorter than read_timeout_ms {}",
                self.response_timeout_ms, self.read_timeout_ms
            )));
        }
        if self.retry.finger_poll_interval_ms == 0
            || self.retry.finger_timeout_ms < self.retry.finger_poll_interval_ms
        {
            return Err(SensorError::Config(
                "retry.finger_timeout_ms must cover at least one poll interval".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SensorError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.library_capacity == Some(0) {
            return Err(SensorError::Config("library_capacity must be positive".into()));
        }
        self.template.validate()
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            password: DEFAULT_PASSWORD,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            template_id_base: 0,
            library_capacity: None,
            template: TemplateConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}
