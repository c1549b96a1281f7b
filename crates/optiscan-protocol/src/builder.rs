use bytes::{BufMut, BytesMut};

use optiscan_core::{
    Error, Result,
    constants::{DEFAULT_ADDRESS, MAX_PARAMETER_SIZE},
};

use crate::{commands::Opcode, packet::Packet};

/// Builder for command packets with a fluent API.
///
/// Multi-byte parameters are appended big-endian, matching the wire format.
///
/// # Example
/// ```
/// use optiscan_protocol::{CommandBuilder, Opcode};
///
/// let packet = CommandBuilder::new(Opcode::Store)
///     .u8(1)
///     .u16(42)
///     .build()
///     .unwrap();
///
/// assert_eq!(packet.params(), &[0x01, 0x00, 0x2A]);
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    opcode: u8,
    address: u32,
    params: BytesMut,
}

impl CommandBuilder {
    /// Create a builder for a catalog instruction at the default address.
    pub fn new(opcode: Opcode) -> Self {
        Self::raw(opcode.as_u8())
    }

    /// Create a builder for an opcode byte the catalog does not list.
    ///
    /// Vendor extensions of the instruction set use opcodes above 0x40.
    pub fn raw(opcode: u8) -> Self {
        Self {
            opcode,
            address: DEFAULT_ADDRESS,
            params: BytesMut::new(),
        }
    }

    /// Target module address.
    pub fn address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.params.put_u8(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.params.put_u16(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.params.put_u32(value);
        self
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.params.put_slice(value);
        self
    }

    /// Number of parameter bytes appended so far.
    pub fn param_len(&self) -> usize {
        self.params.len()
    }

    /// Build the packet.
    ///
    /// # Errors
    /// Returns `Error::PayloadTooLarge` if more than the maximum parameter
    /// size was appended.
    pub fn build(self) -> Result<Packet> {
        if self.params.len() > MAX_PARAMETER_SIZE {
            return Err(Error::PayloadTooLarge {
                size: self.params.len(),
                max_size: MAX_PARAMETER_SIZE,
            });
        }
        Ok(self.finish())
    }

    /// Build the packet, silently clamping oversized parameters.
    pub fn finish(self) -> Packet {
        Packet::command(self.address, self.opcode, &self.params)
    }
}
