//! Packet codec for the sensor wire format.
//!
//! A [`Packet`] is one framed protocol unit. This module builds outgoing
//! packets, computes their checksums, serializes them and parses a single
//! packet structurally off the front of a byte slice.
//!
//! # Wire Format
//!
//! ```text
//! EF 01 | FF FF FF FF | 01   | 00 03  | 01      | 00 05
//! header| address     | type | length | content | checksum
//! ```
//!
//! `length` counts the content bytes plus the 2-byte checksum. For command
//! and acknowledge packets the first content byte is the opcode or the
//! confirmation code; the remaining bytes are parameters. Data packets carry
//! raw transfer bytes in the whole content.
//!
//! # Example
//!
//! ```
//! use optiscan_protocol::{Packet, parse_one};
//! use optiscan_core::constants::DEFAULT_ADDRESS;
//!
//! // "Capture image" at the factory address
//! let packet = Packet::command(DEFAULT_ADDRESS, 0x01, &[]);
//! let wire = packet.serialize().unwrap();
//! assert_eq!(&wire[..], &[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05]);
//!
//! let (parsed, consumed) = parse_one(&wire).unwrap();
//! assert_eq!(consumed, wire.len());
//! assert_eq!(parsed, packet);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use optiscan_core::{
    Error, PacketType, Result,
    constants::{
        CHECKSUM_SIZE, MAX_CONTENT_SIZE, MAX_PARAMETER_SIZE, MIN_CODED_LENGTH, MIN_LENGTH,
        PACKET_HEADER, PACKET_PREFIX_SIZE,
    },
};

/// Additive checksum over the type byte, both length bytes and the content.
///
/// The sum is truncated to 16 bits; overflowing bits are dropped.
///
/// # Examples
///
/// ```
/// use optiscan_protocol::checksum;
///
/// assert_eq!(checksum(0x01, 0x0003, &[0x01]), 0x0005);
/// ```
pub const fn checksum(packet_type: u8, length: u16, content: &[u8]) -> u16 {
    let [len_hi, len_lo] = length.to_be_bytes();
    let mut sum = packet_type as u16;
    sum = sum.wrapping_add(len_hi as u16);
    sum = sum.wrapping_add(len_lo as u16);

    let mut i = 0;
    while i < content.len() {
        sum = sum.wrapping_add(content[i] as u16);
        i += 1;
    }
    sum
}

/// One framed protocol unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    address: u32,
    packet_type: PacketType,
    length: u16,
    content: Bytes,
    checksum: u16,
}

impl Packet {
    /// Create a packet from its content, deriving length and checksum.
    ///
    /// # Errors
    /// - `Error::PayloadTooLarge` if the content exceeds the packet limit.
    /// - `Error::InvalidLength` if a command/acknowledge packet has no code byte.
    pub fn new(address: u32, packet_type: PacketType, content: impl Into<Bytes>) -> Result<Self> {
        let content = content.into();

        if content.len() > MAX_CONTENT_SIZE {
            return Err(Error::PayloadTooLarge {
                size: content.len(),
                max_size: MAX_CONTENT_SIZE,
            });
        }

        let length = (content.len() + CHECKSUM_SIZE) as u16;
        if packet_type.is_coded() && length < MIN_CODED_LENGTH {
            return Err(Error::InvalidLength {
                length,
                reason: "command and acknowledge packets need a code byte",
            });
        }

        let checksum = checksum(packet_type.as_u8(), length, &content);
        Ok(Self {
            address,
            packet_type,
            length,
            content,
            checksum,
        })
    }

    /// Build a command packet for `opcode`, clamping parameters to the maximum size.
    pub fn command(address: u32, opcode: u8, params: &[u8]) -> Self {
        let mut packet = Self::empty_command(address);
        packet.build_command(opcode, params, params.len());
        packet
    }

    /// Build an acknowledgment packet. Used by device simulators and tests.
    pub fn acknowledge(address: u32, code: u8, params: &[u8]) -> Self {
        let mut packet = Self::empty_command(address);
        packet.packet_type = PacketType::Acknowledge;
        packet.build_command(code, params, params.len());
        packet
    }

    /// Build a data or end-of-data packet carrying `data`.
    ///
    /// # Errors
    /// Returns `Error::PayloadTooLarge` when `data` does not fit one packet.
    pub fn data(address: u32, data: &[u8], last: bool) -> Result<Self> {
        let packet_type = if last {
            PacketType::EndOfData
        } else {
            PacketType::Data
        };
        Self::new(address, packet_type, Bytes::copy_from_slice(data))
    }

    fn empty_command(address: u32) -> Self {
        Self {
            address,
            packet_type: PacketType::Command,
            length: MIN_CODED_LENGTH,
            content: Bytes::from_static(&[0x00]),
            checksum: 0,
        }
    }

    /// Overwrite the code byte and parameters of this packet.
    ///
    /// `param_len` is clamped to [`MAX_PARAMETER_SIZE`]. Parameter bytes past
    /// the end of `params` are zero-filled. The length field becomes
    /// `3 + param_len` and the checksum is recomputed.
    pub fn build_command(&mut self, opcode: u8, params: &[u8], param_len: usize) {
        let param_len = param_len.min(MAX_PARAMETER_SIZE);
        let copied = params.len().min(param_len);

        let mut content = BytesMut::with_capacity(1 + param_len);
        content.put_u8(opcode);
        content.put_slice(&params[..copied]);
        content.put_bytes(0, param_len - copied);

        self.content = content.freeze();
        self.length = (1 + param_len + CHECKSUM_SIZE) as u16;
        self.update_checksum();
    }

    /// Change the module address. The address is not covered by the checksum.
    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    /// Compute the checksum for the current type, length and content.
    #[must_use]
    pub fn compute_checksum(&self) -> u16 {
        checksum(self.packet_type.as_u8(), self.length, &self.content)
    }

    /// Store the freshly computed checksum. Call after any mutation.
    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// True if the stored checksum matches the packet contents.
    #[must_use]
    pub fn is_checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Module address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Packet identifier.
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Raw length field.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Stored checksum.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Every content byte between the length field and the checksum.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Opcode (command) or confirmation code (acknowledge). `None` for data packets.
    pub fn code(&self) -> Option<u8> {
        if self.packet_type.is_coded() {
            self.content.first().copied()
        } else {
            None
        }
    }

    /// Parameter bytes after the code byte. Empty for data packets.
    pub fn params(&self) -> &[u8] {
        if self.packet_type.is_coded() && !self.content.is_empty() {
            &self.content[1..]
        } else {
            &[]
        }
    }

    /// Transfer bytes of a data or end-of-data packet. Empty for coded packets.
    pub fn data_bytes(&self) -> &[u8] {
        if self.packet_type.is_data() {
            &self.content
        } else {
            &[]
        }
    }

    /// Number of bytes this packet occupies on the wire.
    pub fn wire_size(&self) -> usize {
        PACKET_PREFIX_SIZE + usize::from(self.length)
    }

    /// Serialize into a fresh buffer.
    ///
    /// # Errors
    /// - `Error::InvalidLength` if the length field disagrees with the content.
    /// - `Error::ChecksumMismatch` if the checksum was not refreshed after a mutation.
    /// - `Error::Allocation` if the output buffer cannot be allocated.
    pub fn serialize(&self) -> Result<Bytes> {
        self.check_consistency()?;

        let size = self.wire_size();
        let mut out = Vec::new();
        out.try_reserve_exact(size)
            .map_err(|_| Error::Allocation { requested: size })?;
        self.put_unchecked(&mut out);

        Ok(Bytes::from(out))
    }

    /// Append the serialized packet to `dst`.
    ///
    /// # Errors
    /// Same consistency errors as [`Packet::serialize`]; nothing is written on error.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<()> {
        self.check_consistency()?;
        dst.reserve(self.wire_size());
        self.put_unchecked(dst);
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        if usize::from(self.length) != self.content.len() + CHECKSUM_SIZE {
            return Err(Error::InvalidLength {
                length: self.length,
                reason: "length field does not match content",
            });
        }

        let expected = self.compute_checksum();
        if self.checksum != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }

    fn put_unchecked<B: BufMut>(&self, out: &mut B) {
        out.put_u16(PACKET_HEADER);
        out.put_u32(self.address);
        out.put_u8(self.packet_type.as_u8());
        out.put_u16(self.length);
        out.put_slice(&self.content);
        out.put_u16(self.checksum);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("type", &self.packet_type)
            .field("length", &self.length)
            .field("content", &format_args!("{:02X?}", &self.content[..]))
            .field("checksum", &format_args!("{:#06x}", self.checksum))
            .finish()
    }
}

/// Parse one packet from the front of `bytes`.
///
/// Returns the packet and the number of bytes it occupied.
///
/// # Errors
/// - `Error::Incomplete` when more bytes are needed (not a structural failure).
/// - `Error::InvalidHeader`, `Error::UnknownPacketType`, `Error::InvalidLength`,
///   `Error::ChecksumMismatch` for malformed input.
///
/// # Examples
///
/// ```
/// use optiscan_protocol::parse_one;
/// use optiscan_core::Error;
///
/// // Only the header has arrived so far
/// let result = parse_one(&[0xEF, 0x01, 0xFF]);
/// assert!(matches!(result, Err(Error::Incomplete { .. })));
/// ```
pub fn parse_one(bytes: &[u8]) -> Result<(Packet, usize)> {
    if bytes.len() < 2 {
        return Err(Error::Incomplete {
            needed: 2 - bytes.len(),
        });
    }

    let header = u16::from_be_bytes([bytes[0], bytes[1]]);
    if header != PACKET_HEADER {
        return Err(Error::InvalidHeader(header));
    }

    if bytes.len() < PACKET_PREFIX_SIZE {
        return Err(Error::Incomplete {
            needed: PACKET_PREFIX_SIZE - bytes.len(),
        });
    }

    let address = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let packet_type = PacketType::try_from(bytes[6])?;
    let length = u16::from_be_bytes([bytes[7], bytes[8]]);

    if length < MIN_LENGTH {
        return Err(Error::InvalidLength {
            length,
            reason: "shorter than the checksum",
        });
    }
    if packet_type.is_coded() && length < MIN_CODED_LENGTH {
        return Err(Error::InvalidLength {
            length,
            reason: "missing code byte",
        });
    }

    let content_len = usize::from(length) - CHECKSUM_SIZE;
    if content_len > MAX_CONTENT_SIZE {
        return Err(Error::InvalidLength {
            length,
            reason: "exceeds maximum parameter size",
        });
    }

    let total = PACKET_PREFIX_SIZE + usize::from(length);
    if bytes.len() < total {
        return Err(Error::Incomplete {
            needed: total - bytes.len(),
        });
    }

    let content = &bytes[PACKET_PREFIX_SIZE..PACKET_PREFIX_SIZE + content_len];
    let actual = u16::from_be_bytes([bytes[total - 2], bytes[total - 1]]);
    let expected = checksum(packet_type.as_u8(), length, content);
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    let packet = Packet {
        address,
        packet_type,
        length,
        content: Bytes::copy_from_slice(content),
        checksum: actual,
    };
    Ok((packet, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiscan_core::constants::DEFAULT_ADDRESS;
    use rstest::rstest;

    const GEN_IMG_WIRE: [u8; 12] = [
        0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05,
    ];

    #[test]
    fn test_capture_image_reference_packet() {
        let packet = Packet::command(DEFAULT_ADDRESS, 0x01, &[]);

        assert_eq!(packet.length(), 0x0003);
        assert_eq!(packet.checksum(), 0x0005);
        assert_eq!(&packet.serialize().unwrap()[..], &GEN_IMG_WIRE);
    }

    #[test]
    fn test_build_command_clamps_parameters() {
        let params = vec![0xAA; MAX_PARAMETER_SIZE + 50];
        let packet = Packet::command(DEFAULT_ADDRESS, 0x09, &params);

        assert_eq!(packet.params().len(), MAX_PARAMETER_SIZE);
        assert_eq!(usize::from(packet.length()), 3 + MAX_PARAMETER_SIZE);
        assert!(packet.is_checksum_valid());
    }

    #[test]
    fn test_build_command_zero_fills_missing_parameters() {
        let mut packet = Packet::command(DEFAULT_ADDRESS, 0x01, &[]);
        packet.build_command(0x04, &[0x01], 5);

        assert_eq!(packet.code(), Some(0x04));
        assert_eq!(packet.params(), &[0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(packet.length(), 8);
    }

    #[test]
    fn test_build_command_overwrites_previous_parameters() {
        let mut packet = Packet::command(DEFAULT_ADDRESS, 0x13, &[1, 2, 3, 4]);
        packet.build_command(0x01, &[], 0);

        assert_eq!(&packet.serialize().unwrap()[..], &GEN_IMG_WIRE);
    }

    #[test]
    fn test_checksum_wraps_at_16_bits() {
        let content = vec![0xFF; 257];
        let sum = checksum(0x02, 259, &content);
        let expected = (0x02u32 + 0x01 + 0x03 + 0xFF * 257) as u16;
        assert_eq!(sum, expected);
    }

    #[test]
    fn test_parse_reference_packet() {
        let (packet, consumed) = parse_one(&GEN_IMG_WIRE).unwrap();

        assert_eq!(consumed, 12);
        assert_eq!(packet.address(), DEFAULT_ADDRESS);
        assert_eq!(packet.packet_type(), PacketType::Command);
        assert_eq!(packet.code(), Some(0x01));
        assert!(packet.params().is_empty());
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        let mut wire = GEN_IMG_WIRE.to_vec();
        wire.extend_from_slice(&[0xEF, 0x01, 0x00]);

        let (_, consumed) = parse_one(&wire).unwrap();
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_parse_acknowledge_with_parameters() {
        let ack = Packet::acknowledge(DEFAULT_ADDRESS, 0x00, &[0x00, 0x05, 0x00, 0x64]);
        let wire = ack.serialize().unwrap();

        let (packet, _) = parse_one(&wire).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Acknowledge);
        assert_eq!(packet.code(), Some(0x00));
        assert_eq!(packet.params(), &[0x00, 0x05, 0x00, 0x64]);
    }

    #[test]
    fn test_parse_data_packet_keeps_all_content() {
        let data = Packet::data(DEFAULT_ADDRESS, &[0x10, 0x20, 0x30], false).unwrap();
        let wire = data.serialize().unwrap();

        let (packet, _) = parse_one(&wire).unwrap();
        assert_eq!(packet.code(), None);
        assert_eq!(packet.data_bytes(), &[0x10, 0x20, 0x30]);
    }

    #[rstest]
    #[case(&GEN_IMG_WIRE[..0], 2)]
    #[case(&GEN_IMG_WIRE[..1], 1)]
    #[case(&GEN_IMG_WIRE[..5], 4)]
    #[case(&GEN_IMG_WIRE[..9], 3)]
    #[case(&GEN_IMG_WIRE[..11], 1)]
    fn test_parse_incomplete(#[case] bytes: &[u8], #[case] needed: usize) {
        match parse_one(bytes) {
            Err(Error::Incomplete { needed: n }) => assert_eq!(n, needed),
            other => panic!("Expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bad_header() {
        let mut wire = GEN_IMG_WIRE;
        wire[0] = 0xEE;
        assert!(matches!(parse_one(&wire), Err(Error::InvalidHeader(0xEE01))));
    }

    #[test]
    fn test_parse_bad_checksum() {
        let mut wire = GEN_IMG_WIRE;
        wire[11] = 0x06;
        assert!(matches!(
            parse_one(&wire),
            Err(Error::ChecksumMismatch {
                expected: 0x0005,
                actual: 0x0006
            })
        ));
    }

    #[test]
    fn test_parse_unknown_type() {
        let mut wire = GEN_IMG_WIRE;
        wire[6] = 0x03;
        assert!(matches!(
            parse_one(&wire),
            Err(Error::UnknownPacketType(0x03))
        ));
    }

    #[rstest]
    #[case(0x0000)]
    #[case(0x0002)]
    #[case(0x0200)]
    fn test_parse_rejects_inconsistent_length(#[case] length: u16) {
        let mut wire = GEN_IMG_WIRE;
        wire[7..9].copy_from_slice(&length.to_be_bytes());
        assert!(matches!(
            parse_one(&wire),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_serialize_rejects_stale_checksum() {
        let mut packet = Packet::command(DEFAULT_ADDRESS, 0x01, &[]);
        packet.checksum = 0x1234;

        assert!(matches!(
            packet.serialize(),
            Err(Error::ChecksumMismatch { .. })
        ));

        packet.update_checksum();
        assert!(packet.serialize().is_ok());
    }

    #[test]
    fn test_new_rejects_oversized_content() {
        let content = vec![0u8; MAX_CONTENT_SIZE + 1];
        assert!(matches!(
            Packet::new(DEFAULT_ADDRESS, PacketType::Data, content),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_address_change_keeps_checksum() {
        let mut packet = Packet::command(DEFAULT_ADDRESS, 0x01, &[]);
        packet.set_address(0x1234_5678);

        let wire = packet.serialize().unwrap();
        assert_eq!(&wire[2..6], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(packet.checksum(), 0x0005);
    }
}
