//! Core constants for the optical fingerprint sensor protocol.
//!
//! This module defines the protocol-level constants shared by every crate in
//! the workspace: packet framing, parameter limits, the template reassembly
//! budget and the default timeouts used by the driver.
//!
//! # Packet Structure
//!
//! Every unit exchanged with the sensor is a framed packet:
//!
//! ```text
//! [header:u16][address:u32][type:u8][length:u16][content:(length-2)][checksum:u16]
//! ```
//!
//! Where:
//! - `header` - Fixed start code `0xEF01`
//! - `address` - Module address (default `0xFFFFFFFF`)
//! - `type` - Packet identifier (command, data, acknowledge, end of data)
//! - `length` - Bytes of content plus the 2-byte checksum
//! - `content` - Opcode / confirmation code followed by parameters, or raw data
//! - `checksum` - Low 16 bits of the sum of type, length and content bytes
//!
//! All multi-byte fields are big-endian.
//!
//! # Usage
//!
//! ```
//! use optiscan_core::constants::*;
//!
//! assert_eq!(PACKET_HEADER, 0xEF01);
//! assert_eq!(PACKET_PREFIX_SIZE + CHECKSUM_SIZE, 11);
//!
//! use std::time::Duration;
//! let lock_wait = Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS);
//! assert!(lock_wait < Duration::from_secs(1));
//! ```

// ============================================================================
// Packet Framing
// ============================================================================

/// Fixed packet start code.
///
/// Transmitted high byte first as `0xEF 0x01`.
pub const PACKET_HEADER: u16 = 0xEF01;

/// Start code split into its wire bytes.
pub const PACKET_HEADER_BYTES: [u8; 2] = PACKET_HEADER.to_be_bytes();

/// Default module address.
///
/// Modules ship with this address and keep it unless `SetAdder` is issued.
/// A module silently ignores packets carrying any other address.
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Default handshake password.
pub const DEFAULT_PASSWORD: u32 = 0x0000_0000;

/// Bytes before the packet content: header (2) + address (4) + type (1) + length (2).
///
/// # Examples
///
/// ```
/// use optiscan_core::constants::{PACKET_PREFIX_SIZE, CHECKSUM_SIZE};
///
/// // A packet with `length` = 3 occupies 9 + 3 bytes on the wire.
/// let length: usize = 3;
/// assert_eq!(PACKET_PREFIX_SIZE + length, 12);
/// # let _ = CHECKSUM_SIZE;
/// ```
pub const PACKET_PREFIX_SIZE: usize = 9;

/// Size of the trailing checksum field.
pub const CHECKSUM_SIZE: usize = 2;

/// Offset of the packet type byte inside a serialized packet.
pub const PACKET_TYPE_OFFSET: usize = 6;

/// Offset of the length field inside a serialized packet.
pub const LENGTH_OFFSET: usize = 7;

/// Maximum number of parameter bytes carried after the code byte.
///
/// Data packets are at most 256 bytes of content on any module in the
/// family, so content is bounded by `1 + MAX_PARAMETER_SIZE`.
pub const MAX_PARAMETER_SIZE: usize = 256;

/// Maximum content bytes (code byte plus parameters) in a single packet.
pub const MAX_CONTENT_SIZE: usize = MAX_PARAMETER_SIZE + 1;

/// Smallest legal `length` field: checksum only (empty data packet).
pub const MIN_LENGTH: u16 = CHECKSUM_SIZE as u16;

/// Smallest legal `length` for command and acknowledge packets (code + checksum).
pub const MIN_CODED_LENGTH: u16 = 3;

/// Largest serialized packet in bytes.
pub const MAX_PACKET_SIZE: usize = PACKET_PREFIX_SIZE + MAX_CONTENT_SIZE + CHECKSUM_SIZE;

// ============================================================================
// Template Reassembly
// ============================================================================

/// In-band end-of-template marker.
///
/// Some firmware revisions never send an end-of-data packet and instead
/// append this ASCII sequence to the final data chunk.
pub const TEMPLATE_TERMINATOR: [u8; 4] = *b"FOOF";

/// Capacity allocated when a template collection starts (bytes).
pub const DEFAULT_TEMPLATE_INITIAL_CAPACITY: usize = 512;

/// Hard ceiling for both buffer capacity and accumulated template size (bytes).
///
/// Character files on this family are 512 to 1536 bytes; the ceiling leaves
/// room for firmware that uploads two concatenated buffers.
pub const DEFAULT_TEMPLATE_MAX_SIZE: usize = 4096;

/// Largest chunk accepted from a single `process_packet` call (bytes).
pub const DEFAULT_TEMPLATE_MAX_CHUNK: usize = 1024;

/// Time allowed for a template collection before it is forced to finish (milliseconds).
pub const DEFAULT_TEMPLATE_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Timeouts
// ============================================================================

/// Bounded wait for the shared template mutex (milliseconds).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 100;

/// Bounded wait for a single transport read (milliseconds).
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Bounded wait for the event answering one command (milliseconds).
///
/// Image capture on optical modules takes up to ~1 s; this leaves margin.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2000;

/// Pause between `GenImg` polls while waiting for a finger (milliseconds).
pub const DEFAULT_FINGER_POLL_INTERVAL_MS: u64 = 100;

/// How long one capture attempt keeps polling for a finger (milliseconds).
pub const DEFAULT_FINGER_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Procedures
// ============================================================================

/// Attempts per multi-step procedure before it fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;

/// Character buffer used for the first capture of an enrollment.
pub const CHAR_BUFFER_1: u8 = 1;

/// Character buffer used for the second capture / comparison.
pub const CHAR_BUFFER_2: u8 = 2;

/// Serial speed unit: the module's baud code multiplied by this gives bits per second.
pub const BAUD_UNIT: u32 = 9600;

/// Default UART speed of the module.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
