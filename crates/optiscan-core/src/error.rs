use thiserror::Error;

/// Structural protocol errors raised while building or parsing packets.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid packet header: expected 0xEF01, got {0:#06x}")]
    InvalidHeader(u16),

    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Invalid packet length {length}: {reason}")]
    InvalidLength { length: u16, reason: &'static str },

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Incomplete packet: {needed} more bytes required")]
    Incomplete { needed: usize },

    #[error("Payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Buffer allocation failed for {requested} bytes")]
    Allocation { requested: usize },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the input may still become a valid packet once more bytes arrive.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
