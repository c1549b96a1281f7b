//! Tokio codec for sensor packets.
//!
//! [`SensorCodec`] wraps the [`StreamParser`] so a serial port can be driven
//! through `tokio_util::codec::Framed`.
//!
//! ```text
//! UART bytes -> Decoder -> Packet
//! Packet -> Encoder -> UART bytes
//! ```
//!
//! Malformed input never surfaces as a decode error: the parser resyncs and
//! counts a discard instead, so a noisy line does not terminate a `Framed`
//! stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use optiscan_core::{Error, Result, constants::MAX_PACKET_SIZE};

use crate::{Packet, StreamParser};

/// Tokio codec for sensor packets.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
/// use optiscan_protocol::{Packet, SensorCodec};
/// use optiscan_core::constants::DEFAULT_ADDRESS;
///
/// let mut codec = SensorCodec::new();
/// let mut wire = BytesMut::new();
/// codec.encode(Packet::acknowledge(DEFAULT_ADDRESS, 0x00, &[]), &mut wire).unwrap();
///
/// let packet = codec.decode(&mut wire).unwrap().unwrap();
/// assert_eq!(packet.code(), Some(0x00));
/// ```
#[derive(Debug)]
pub struct SensorCodec {
    parser: StreamParser,

    /// Largest packet the encoder will emit.
    max_packet_size: usize,
}

impl SensorCodec {
    /// Create a codec that accepts any packet the protocol allows.
    pub fn new() -> Self {
        Self {
            parser: StreamParser::new(),
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Create a codec with a tighter encoder limit.
    ///
    /// Modules configured for a 32/64/128-byte data packet size reject
    /// longer packets, so hosts can mirror that limit here.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            parser: StreamParser::new(),
            max_packet_size: max_packet_size.min(MAX_PACKET_SIZE),
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Discard events recorded by the underlying parser.
    pub fn discarded(&self) -> usize {
        self.parser.discarded()
    }

    /// Drop a packet stalled at the front of the parser and rescan what
    /// follows it. See [`StreamParser::abandon_partial`].
    pub fn abandon_partial(&mut self) -> bool {
        self.parser.abandon_partial()
    }

    /// Reset buffered state, e.g. after a transport reconnect.
    pub fn reset(&mut self) {
        self.parser.clear();
    }
}

impl Default for SensorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SensorCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // The parser owns every byte from here on.
            self.parser.feed(src);
            src.clear();
        }

        Ok(self.parser.next_packet())
    }
}

impl Encoder<Packet> for SensorCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Packet>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Packet> for SensorCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a Packet, dst: &mut BytesMut) -> Result<()> {
        let size = item.wire_size();
        if size > self.max_packet_size {
            return Err(Error::PayloadTooLarge {
                size,
                max_size: self.max_packet_size,
            });
        }

        item.write_to(dst)
    }
}
