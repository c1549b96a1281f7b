//! Instruction set of the sensor module.
//!
//! Every command the host can send is listed in [`CATALOG`] with its opcode,
//! name and default parameters. Descriptors are immutable and carry the
//! checksum of their default packet at the factory address, computed at
//! compile time. Packets are always built fresh from a descriptor and never
//! shared between exchanges.
//!
//! # Instruction Groups
//!
//! ## Capture and Matching
//! - `GenImg` (0x01): capture a finger image
//! - `Img2Tz` (0x02): extract features into a character buffer
//! - `Match` (0x03): compare character buffers 1 and 2
//! - `Search` (0x04): search the library for a character buffer
//! - `RegModel` (0x05): combine buffers 1 and 2 into a model
//!
//! ## Library Management
//! - `Store` (0x06), `LoadChar` (0x07), `DeletChar` (0x0C), `Empty` (0x0D)
//! - `TemplateNum` (0x1D), `ReadIndexTable` (0x1F)
//!
//! ## Transfers
//! - `UpChar` (0x08), `DownChar` (0x09), `UpImage` (0x0A)
//!
//! ## System
//! - `SetSysPara` (0x0E), `ReadSysPara` (0x0F), `SetPwd` (0x12), `VfyPwd` (0x13),
//!   `GetRandomCode` (0x14), `SetAdder` (0x15), `AuraLedConfig` (0x35),
//!   `CheckSensor` (0x36), `SoftReset` (0x3D), `HandShake` (0x40)
//!
//! # Example
//!
//! ```
//! use optiscan_protocol::{Command, CommandDescriptor, Opcode};
//! use optiscan_core::constants::DEFAULT_ADDRESS;
//!
//! let descriptor = CommandDescriptor::lookup(Opcode::GenImg);
//! assert_eq!(descriptor.checksum, 0x0005);
//!
//! let packet = Command::Search { buffer: 1, start_page: 0, page_count: 200 }
//!     .to_packet(DEFAULT_ADDRESS);
//! assert_eq!(packet.params(), &[0x01, 0x00, 0x00, 0x00, 0xC8]);
//! ```

use std::fmt;

use optiscan_core::{Error, PacketType, Result, constants::DEFAULT_PASSWORD};

use crate::{builder::CommandBuilder, packet::Packet};

/// Instruction opcodes understood by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    GenImg = 0x01,
    Img2Tz = 0x02,
    Match = 0x03,
    Search = 0x04,
    RegModel = 0x05,
    Store = 0x06,
    LoadChar = 0x07,
    UpChar = 0x08,
    DownChar = 0x09,
    UpImage = 0x0A,
    DeletChar = 0x0C,
    Empty = 0x0D,
    SetSysPara = 0x0E,
    ReadSysPara = 0x0F,
    SetPwd = 0x12,
    VfyPwd = 0x13,
    GetRandomCode = 0x14,
    SetAdder = 0x15,
    TemplateNum = 0x1D,
    ReadIndexTable = 0x1F,
    AuraLedConfig = 0x35,
    CheckSensor = 0x36,
    SoftReset = 0x3D,
    HandShake = 0x40,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Instruction name as printed in the module's documentation.
    pub const fn name(self) -> &'static str {
        CommandDescriptor::lookup(self).name
    }

    /// True if the acknowledgment is followed by data packets.
    pub const fn has_data_phase(self) -> bool {
        matches!(self, Self::UpChar | Self::UpImage)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        CATALOG
            .iter()
            .find(|descriptor| descriptor.opcode.as_u8() == value)
            .map(|descriptor| descriptor.opcode)
            .ok_or(Error::UnknownOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.as_u8())
    }
}

/// Immutable catalog entry for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub opcode: Opcode,
    pub name: &'static str,
    /// Parameters sent when the caller supplies none.
    pub default_params: &'static [u8],
    /// Checksum of the default packet. The address is not covered.
    pub checksum: u16,
}

impl CommandDescriptor {
    const fn new(opcode: Opcode, name: &'static str, default_params: &'static [u8]) -> Self {
        Self {
            opcode,
            name,
            default_params,
            checksum: default_checksum(opcode.as_u8(), default_params),
        }
    }

    /// Catalog entry for `opcode`.
    pub const fn lookup(opcode: Opcode) -> &'static CommandDescriptor {
        let mut i = 0;
        while i < CATALOG.len() {
            if CATALOG[i].opcode as u8 == opcode as u8 {
                return &CATALOG[i];
            }
            i += 1;
        }
        // Every opcode has exactly one entry; checked by tests.
        &CATALOG[0]
    }

    /// Fresh packet carrying the default parameters.
    pub fn instantiate(&self, address: u32) -> Packet {
        Packet::command(address, self.opcode.as_u8(), self.default_params)
    }
}

const fn default_checksum(opcode: u8, params: &[u8]) -> u16 {
    let length = (1 + params.len() + 2) as u16;
    let [len_hi, len_lo] = length.to_be_bytes();
    let mut sum = (PacketType::Command as u8 as u16)
        .wrapping_add(len_hi as u16)
        .wrapping_add(len_lo as u16)
        .wrapping_add(opcode as u16);

    let mut i = 0;
    while i < params.len() {
        sum = sum.wrapping_add(params[i] as u16);
        i += 1;
    }
    sum
}

const PASSWORD_BYTES: [u8; 4] = DEFAULT_PASSWORD.to_be_bytes();

/// Every instruction the driver knows, in opcode order.
pub const CATALOG: &[CommandDescriptor] = &[
    CommandDescriptor::new(Opcode::GenImg, "GenImg", &[]),
    CommandDescriptor::new(Opcode::Img2Tz, "Img2Tz", &[0x01]),
    CommandDescriptor::new(Opcode::Match, "Match", &[]),
    CommandDescriptor::new(Opcode::Search, "Search", &[0x01, 0x00, 0x00, 0x00, 0xC8]),
    CommandDescriptor::new(Opcode::RegModel, "RegModel", &[]),
    CommandDescriptor::new(Opcode::Store, "Store", &[0x01, 0x00, 0x00]),
    CommandDescriptor::new(Opcode::LoadChar, "LoadChar", &[0x02, 0x00, 0x00]),
    CommandDescriptor::new(Opcode::UpChar, "UpChar", &[0x01]),
    CommandDescriptor::new(Opcode::DownChar, "DownChar", &[0x01]),
    CommandDescriptor::new(Opcode::UpImage, "UpImage", &[]),
    CommandDescriptor::new(Opcode::DeletChar, "DeletChar", &[0x00, 0x00, 0x00, 0x01]),
    CommandDescriptor::new(Opcode::Empty, "Empty", &[]),
    CommandDescriptor::new(Opcode::SetSysPara, "SetSysPara", &[0x04, 0x03]),
    CommandDescriptor::new(Opcode::ReadSysPara, "ReadSysPara", &[]),
    CommandDescriptor::new(Opcode::SetPwd, "SetPwd", &PASSWORD_BYTES),
    CommandDescriptor::new(Opcode::VfyPwd, "VfyPwd", &PASSWORD_BYTES),
    CommandDescriptor::new(Opcode::GetRandomCode, "GetRandomCode", &[]),
    CommandDescriptor::new(Opcode::SetAdder, "SetAdder", &[0xFF, 0xFF, 0xFF, 0xFF]),
    CommandDescriptor::new(Opcode::TemplateNum, "TemplateNum", &[]),
    CommandDescriptor::new(Opcode::ReadIndexTable, "ReadIndexTable", &[0x00]),
    CommandDescriptor::new(Opcode::AuraLedConfig, "AuraLedConfig", &[0x03, 0x80, 0x01, 0x00]),
    CommandDescriptor::new(Opcode::CheckSensor, "CheckSensor", &[]),
    CommandDescriptor::new(Opcode::SoftReset, "SoftReset", &[]),
    CommandDescriptor::new(Opcode::HandShake, "HandShake", &[]),
];

/// Build a fresh command packet for a raw opcode byte.
///
/// `param_len` is clamped to the maximum parameter size and bytes not
/// covered by `params` are zero-filled.
pub fn build_command(address: u32, opcode: u8, params: &[u8], param_len: usize) -> Packet {
    let mut packet = Packet::command(address, opcode, &[]);
    packet.build_command(opcode, params, param_len);
    packet
}

/// Aura LED effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedMode {
    Breathing = 0x01,
    Flashing = 0x02,
    On = 0x03,
    Off = 0x04,
    GradualOn = 0x05,
    GradualOff = 0x06,
}

/// Aura LED colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedColor {
    Red = 0x01,
    Blue = 0x02,
    Purple = 0x03,
}

/// Typed instruction with its parameters.
///
/// Buffer ids select character buffer 1 or 2; page ids address the
/// on-module template library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GenImg,
    Img2Tz { buffer: u8 },
    Match,
    Search { buffer: u8, start_page: u16, page_count: u16 },
    RegModel,
    Store { buffer: u8, page_id: u16 },
    LoadChar { buffer: u8, page_id: u16 },
    UpChar { buffer: u8 },
    DownChar { buffer: u8 },
    UpImage,
    DeletChar { page_id: u16, count: u16 },
    Empty,
    SetSysPara { register: u8, value: u8 },
    ReadSysPara,
    SetPwd { password: u32 },
    VfyPwd { password: u32 },
    GetRandomCode,
    SetAdder { address: u32 },
    TemplateNum,
    ReadIndexTable { page: u8 },
    AuraLedConfig { mode: LedMode, speed: u8, color: LedColor, cycles: u8 },
    CheckSensor,
    SoftReset,
    HandShake,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::GenImg => Opcode::GenImg,
            Self::Img2Tz { .. } => Opcode::Img2Tz,
            Self::Match => Opcode::Match,
            Self::Search { .. } => Opcode::Search,
            Self::RegModel => Opcode::RegModel,
            Self::Store { .. } => Opcode::Store,
            Self::LoadChar { .. } => Opcode::LoadChar,
            Self::UpChar { .. } => Opcode::UpChar,
            Self::DownChar { .. } => Opcode::DownChar,
            Self::UpImage => Opcode::UpImage,
            Self::DeletChar { .. } => Opcode::DeletChar,
            Self::Empty => Opcode::Empty,
            Self::SetSysPara { .. } => Opcode::SetSysPara,
            Self::ReadSysPara => Opcode::ReadSysPara,
            Self::SetPwd { .. } => Opcode::SetPwd,
            Self::VfyPwd { .. } => Opcode::VfyPwd,
            Self::GetRandomCode => Opcode::GetRandomCode,
            Self::SetAdder { .. } => Opcode::SetAdder,
            Self::TemplateNum => Opcode::TemplateNum,
            Self::ReadIndexTable { .. } => Opcode::ReadIndexTable,
            Self::AuraLedConfig { .. } => Opcode::AuraLedConfig,
            Self::CheckSensor => Opcode::CheckSensor,
            Self::SoftReset => Opcode::SoftReset,
            Self::HandShake => Opcode::HandShake,
        }
    }

    /// Encode into a fresh packet for the module at `address`.
    pub fn to_packet(&self, address: u32) -> Packet {
        let builder = CommandBuilder::new(self.opcode()).address(address);

        let builder = match *self {
            Self::Img2Tz { buffer } | Self::UpChar { buffer } | Self::DownChar { buffer } => {
                builder.u8(buffer)
            }
            Self::Search {
                buffer,
                start_page,
                page_count,
            } => builder.u8(buffer).u16(start_page).u16(page_count),
            Self::Store { buffer, page_id } | Self::LoadChar { buffer, page_id } => {
                builder.u8(buffer).u16(page_id)
            }
            Self::DeletChar { page_id, count } => builder.u16(page_id).u16(count),
            Self::SetSysPara { register, value } => builder.u8(register).u8(value),
            Self::SetPwd { password } | Self::VfyPwd { password } => builder.u32(password),
            Self::SetAdder { address } => builder.u32(address),
            Self::ReadIndexTable { page } => builder.u8(page),
            Self::AuraLedConfig {
                mode,
                speed,
                color,
                cycles,
            } => builder
                .u8(mode as u8)
                .u8(speed)
                .u8(color as u8)
                .u8(cycles),
            Self::GenImg
            | Self::Match
            | Self::RegModel
            | Self::UpImage
            | Self::Empty
            | Self::ReadSysPara
            | Self::GetRandomCode
            | Self::TemplateNum
            | Self::CheckSensor
            | Self::SoftReset
            | Self::HandShake => builder,
        };

        builder.finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::checksum;
    use optiscan_core::constants::{DEFAULT_ADDRESS, MAX_PARAMETER_SIZE};
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_unique_opcodes() {
        let opcodes: HashSet<u8> = CATALOG.iter().map(|d| d.opcode.as_u8()).collect();
        assert_eq!(opcodes.len(), CATALOG.len());
    }

    #[test]
    fn test_lookup_finds_every_entry() {
        for descriptor in CATALOG {
            assert_eq!(CommandDescriptor::lookup(descriptor.opcode), descriptor);
        }
    }

    #[test]
    fn test_precomputed_checksums_match_runtime() {
        for descriptor in CATALOG {
            let packet = descriptor.instantiate(DEFAULT_ADDRESS);
            assert_eq!(
                packet.checksum(),
                descriptor.checksum,
                "{} checksum",
                descriptor.name
            );
        }
    }

    #[test]
    fn test_instances_are_independent() {
        let descriptor = CommandDescriptor::lookup(Opcode::Img2Tz);
        let mut first = descriptor.instantiate(DEFAULT_ADDRESS);
        let second = descriptor.instantiate(DEFAULT_ADDRESS);

        first.build_command(0x02, &[0x02], 1);
        assert_eq!(second.params(), &[0x01]);
        assert_eq!(descriptor.default_params, &[0x01]);
    }

    #[rstest]
    #[case(0x01, Opcode::GenImg)]
    #[case(0x0C, Opcode::DeletChar)]
    #[case(0x40, Opcode::HandShake)]
    fn test_opcode_from_u8(#[case] byte: u8, #[case] expected: Opcode) {
        assert_eq!(Opcode::try_from(byte).unwrap(), expected);
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            Opcode::try_from(0x0B),
            Err(Error::UnknownOpcode(0x0B))
        ));
    }

    #[test]
    fn test_build_command_free_function() {
        let packet = build_command(DEFAULT_ADDRESS, 0x02, &[0x01], 1);
        assert_eq!(packet.code(), Some(0x02));
        assert_eq!(packet.length(), 4);
        assert_eq!(packet.checksum(), checksum(0x01, 4, &[0x02, 0x01]));
    }

    #[test]
    fn test_build_command_clamps_oversized_length() {
        let params = [0x11; 8];
        let packet = build_command(DEFAULT_ADDRESS, 0x09, &params, usize::MAX);

        assert_eq!(packet.params().len(), MAX_PARAMETER_SIZE);
        assert_eq!(&packet.params()[..8], &params);
        assert!(packet.params()[8..].iter().all(|&b| b == 0));
    }

    #[rstest]
    #[case(Command::Img2Tz { buffer: 2 }, &[0x02])]
    #[case(Command::Store { buffer: 1, page_id: 0x0102 }, &[0x01, 0x01, 0x02])]
    #[case(Command::LoadChar { buffer: 2, page_id: 7 }, &[0x02, 0x00, 0x07])]
    #[case(Command::DeletChar { page_id: 5, count: 1 }, &[0x00, 0x05, 0x00, 0x01])]
    #[case(Command::VfyPwd { password: 0xA1B2C3D4 }, &[0xA1, 0xB2, 0xC3, 0xD4])]
    #[case(Command::SetSysPara { register: 5, value: 2 }, &[0x05, 0x02])]
    #[case(
        Command::AuraLedConfig { mode: LedMode::Breathing, speed: 0x80, color: LedColor::Blue, cycles: 0 },
        &[0x01, 0x80, 0x02, 0x00]
    )]
    fn test_command_parameters(#[case] command: Command, #[case] params: &[u8]) {
        let packet = command.to_packet(DEFAULT_ADDRESS);
        assert_eq!(packet.code(), Some(command.opcode().as_u8()));
        assert_eq!(packet.params(), params);
        assert!(packet.is_checksum_valid());
    }

    #[test]
    fn test_data_phase_opcodes() {
        assert!(Opcode::UpChar.has_data_phase());
        assert!(Opcode::UpImage.has_data_phase());
        assert!(!Opcode::Search.has_data_phase());
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::Search.to_string(), "Search (0x04)");
        assert_eq!(Command::TemplateNum.to_string(), "TemplateNum");
    }
}
