//! Transport errors.

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Failures of the byte channel between host and module.
///
/// A read that simply sees no bytes is not an error; transports report it
/// as a zero-length read.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The port vanished or its peer hung up.
    #[error("port {port} disconnected")]
    Disconnected { port: String },

    /// Read or write failed mid-transfer; the port is still usable.
    #[error("transfer failed: {message}")]
    Transfer { message: String },

    #[error("cannot open port {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("invalid port settings: {message}")]
    InvalidSettings { message: String },

    /// A blocking port task panicked or was cancelled.
    #[error("port worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(port: impl Into<String>) -> Self {
        Self::Disconnected { port: port.into() }
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
        }
    }

    pub fn open_failed(port: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::OpenFailed {
            port: port.into(),
            message: source.to_string(),
        }
    }

    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// True when the port is gone for good and the receiver should stop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::OpenFailed { .. })
    }
}
