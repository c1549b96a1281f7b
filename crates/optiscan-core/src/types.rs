use crate::{
    Result,
    constants::{BAUD_UNIT, DEFAULT_ADDRESS},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Packet identifier carried in the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Command sent by the host.
    Command = 0x01,
    /// Intermediate data packet; never appears alone, always follows a command or acknowledgment.
    Data = 0x02,
    /// Acknowledgment carrying a confirmation code.
    Acknowledge = 0x07,
    /// Final packet of a data transfer.
    EndOfData = 0x08,
}

impl PacketType {
    /// Get the raw type byte.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for packet types whose first content byte is an opcode or confirmation code.
    #[must_use]
    pub fn is_coded(self) -> bool {
        matches!(self, Self::Command | Self::Acknowledge)
    }

    /// True for packet types that carry bulk transfer data.
    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(self, Self::Data | Self::EndOfData)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Command),
            0x02 => Ok(Self::Data),
            0x07 => Ok(Self::Acknowledge),
            0x08 => Ok(Self::EndOfData),
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "command",
            Self::Data => "data",
            Self::Acknowledge => "acknowledge",
            Self::EndOfData => "end-of-data",
        };
        write!(f, "{name}")
    }
}

/// Confirmation code returned in the first content byte of an acknowledgment.
///
/// Conversion from `u8` is total: codes outside the datasheet land in
/// [`ConfirmationCode::Unknown`] instead of being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmationCode {
    Ok,
    PacketReceiveError,
    NoFinger,
    ImageCaptureFailed,
    ImageTooMessy,
    FeatureFailed,
    NoMatch,
    NotFound,
    CombineFailed,
    BadLocation,
    TemplateReadFailed,
    TemplateUploadFailed,
    DataReceiveFailed,
    ImageUploadFailed,
    DeleteFailed,
    ClearFailed,
    WrongPassword,
    InvalidImage,
    FlashError,
    Undefined,
    InvalidRegister,
    InvalidConfiguration,
    WrongNotepadPage,
    PortFailure,
    LibraryFull,
    AddressError,
    PasswordRequired,
    TemplateEmpty,
    LibraryEmpty,
    OperationTimeout,
    AlreadyExists,
    SensorAbnormal,
    Unknown(u8),
}

impl ConfirmationCode {
    /// Get the raw code byte.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::PacketReceiveError => 0x01,
            Self::NoFinger => 0x02,
            Self::ImageCaptureFailed => 0x03,
            Self::ImageTooMessy => 0x06,
            Self::FeatureFailed => 0x07,
            Self::NoMatch => 0x08,
            Self::NotFound => 0x09,
            Self::CombineFailed => 0x0A,
            Self::BadLocation => 0x0B,
            Self::TemplateReadFailed => 0x0C,
            Self::TemplateUploadFailed => 0x0D,
            Self::DataReceiveFailed => 0x0E,
            Self::ImageUploadFailed => 0x0F,
            Self::DeleteFailed => 0x10,
            Self::ClearFailed => 0x11,
            Self::WrongPassword => 0x13,
            Self::InvalidImage => 0x15,
            Self::FlashError => 0x18,
            Self::Undefined => 0x19,
            Self::InvalidRegister => 0x1A,
            Self::InvalidConfiguration => 0x1B,
            Self::WrongNotepadPage => 0x1C,
            Self::PortFailure => 0x1D,
            Self::LibraryFull => 0x1F,
            Self::AddressError => 0x20,
            Self::PasswordRequired => 0x21,
            Self::TemplateEmpty => 0x22,
            Self::LibraryEmpty => 0x24,
            Self::OperationTimeout => 0x26,
            Self::AlreadyExists => 0x27,
            Self::SensorAbnormal => 0x29,
            Self::Unknown(byte) => byte,
        }
    }

    /// True for [`ConfirmationCode::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<u8> for ConfirmationCode {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x01 => Self::PacketReceiveError,
            0x02 => Self::NoFinger,
            0x03 => Self::ImageCaptureFailed,
            0x06 => Self::ImageTooMessy,
            0x07 => Self::FeatureFailed,
            0x08 => Self::NoMatch,
            0x09 => Self::NotFound,
            0x0A => Self::CombineFailed,
            0x0B => Self::BadLocation,
            0x0C => Self::TemplateReadFailed,
            0x0D => Self::TemplateUploadFailed,
            0x0E => Self::DataReceiveFailed,
            0x0F => Self::ImageUploadFailed,
            0x10 => Self::DeleteFailed,
            0x11 => Self::ClearFailed,
            0x13 => Self::WrongPassword,
            0x15 => Self::InvalidImage,
            0x18 => Self::FlashError,
            0x19 => Self::Undefined,
            0x1A => Self::InvalidRegister,
            0x1B => Self::InvalidConfiguration,
            0x1C => Self::WrongNotepadPage,
            0x1D => Self::PortFailure,
            0x1F => Self::LibraryFull,
            0x20 => Self::AddressError,
            0x21 => Self::PasswordRequired,
            0x22 => Self::TemplateEmpty,
            0x24 => Self::LibraryEmpty,
            0x26 => Self::OperationTimeout,
            0x27 => Self::AlreadyExists,
            0x29 => Self::SensorAbnormal,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(byte) => write!(f, "Unknown({byte:#04x})"),
            other => write!(f, "{other:?}({:#04x})", other.as_u8()),
        }
    }
}

/// Size of the `ReadSysPara` parameter block in bytes.
pub const SYSTEM_PARAMETERS_SIZE: usize = 16;

/// System status and configuration snapshot returned by `ReadSysPara`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemParameters {
    /// Status bits. Use the helper methods to read individual flags.
    pub status_register: u16,

    /// System identifier code (constant `0x0009` on most modules).
    pub system_id: u16,

    /// Number of template slots in the library.
    pub library_capacity: u16,

    /// Matching security level, 1 to 5.
    pub security_level: u16,

    /// Module address.
    pub device_address: u32,

    /// Data packet size code: 0 = 32, 1 = 64, 2 = 128, 3 = 256 bytes.
    pub packet_size_code: u16,

    /// Baud code; multiply by 9600 for bits per second.
    pub baud_code: u16,
}

impl SystemParameters {
    /// Parse the 16-byte parameter block that follows the confirmation code.
    ///
    /// # Errors
    /// Returns `Error::InvalidLength` if fewer than 16 bytes are supplied.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < SYSTEM_PARAMETERS_SIZE {
            return Err(Error::InvalidLength {
                length: payload.len() as u16,
                reason: "system parameter block needs 16 bytes",
            });
        }

        let word = |at: usize| u16::from_be_bytes([payload[at], payload[at + 1]]);

        Ok(Self {
            status_register: word(0),
            system_id: word(2),
            library_capacity: word(4),
            security_level: word(6),
            device_address: u32::from_be_bytes([
                payload[8],
                payload[9],
                payload[10],
                payload[11],
            ]),
            packet_size_code: word(12),
            baud_code: word(14),
        })
    }

    /// The module is busy executing another command.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.status_register & (1 << 0) != 0
    }

    /// The module found a matching finger during the last search.
    #[must_use]
    pub fn has_match(&self) -> bool {
        self.status_register & (1 << 1) != 0
    }

    /// The handshake password was verified.
    #[must_use]
    pub fn password_verified(&self) -> bool {
        self.status_register & (1 << 2) != 0
    }

    /// The image buffer holds a valid image.
    #[must_use]
    pub fn has_valid_image(&self) -> bool {
        self.status_register & (1 << 3) != 0
    }

    /// Data packet size in bytes.
    #[must_use]
    pub fn packet_size_bytes(&self) -> usize {
        32usize << self.packet_size_code.min(3)
    }

    /// Serial speed in bits per second.
    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        u32::from(self.baud_code) * BAUD_UNIT
    }

    /// True when the module still answers on the factory address.
    #[must_use]
    pub fn uses_default_address(&self) -> bool {
        self.device_address == DEFAULT_ADDRESS
    }
}
