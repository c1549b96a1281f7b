//! Error types for the sensor driver.

use std::fmt;

use optiscan_core::ConfirmationCode;
use optiscan_hardware::HardwareError;
use optiscan_protocol::Opcode;

use crate::template::TemplateState;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, SensorError>;

/// Multi-step procedures run by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    Enroll,
    Verify,
    Search,
    Delete,
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enroll => "enroll",
            Self::Verify => "verify",
            Self::Search => "search",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the driver.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Transport error: {0}")]
    Transport(#[from] HardwareError),

    /// Structural packet error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] optiscan_core::Error),

    /// Nothing arrived within the bounded wait.
    #[error("No response after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The template mutex could not be acquired in time.
    #[error("Template lock not acquired within {duration_ms}ms")]
    LockTimeout { duration_ms: u64 },

    /// Template buffer allocation failed. The assembler must be reset.
    #[error("Out of memory reserving {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Cannot {operation} while template is {state}")]
    InvalidState {
        operation: &'static str,
        state: TemplateState,
    },

    #[error("No completed template available")]
    TemplateUnavailable,

    #[error("{procedure} gave up after {attempts} attempts")]
    RetriesExhausted { procedure: Procedure, attempts: u8 },

    /// The module answered with something the current step cannot use.
    #[error("Unexpected response: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: String },

    /// The module refused a single-step command.
    #[error("{command} rejected: {code}")]
    Rejected {
        command: Opcode,
        code: ConfirmationCode,
    },

    /// Bytes arrived but none of them formed a valid packet.
    #[error("Malformed response ({discarded} discards)")]
    Malformed { discarded: usize },

    #[error("Template id {template_id} is below the id base {base}")]
    InvalidTemplateId { template_id: u16, base: u16 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The receiver task is gone.
    #[error("Sensor shut down")]
    Shutdown,
}

impl SensorError {
    /// True for transient failures worth another attempt.
    ///
    /// Resource, state and configuration errors need caller action first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_fatal(),
            Self::Timeout { .. }
            | Self::LockTimeout { .. }
            | Self::Protocol(_)
            | Self::Malformed { .. } => true,
            _ => false,
        }
    }
}
