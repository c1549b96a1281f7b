//! Stream parser for sensor packets.
//!
//! The sensor UART delivers an unframed byte stream: a single read may hold
//! part of a packet, several packets, or line noise. [`StreamParser`]
//! accumulates bytes, resynchronizes on the `0xEF01` start code and queues
//! every structurally valid packet it finds.
//!
//! # Usage
//!
//! ```
//! use optiscan_protocol::StreamParser;
//!
//! let mut parser = StreamParser::new();
//!
//! // Acknowledge "OK" split across two reads
//! parser.feed(&[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
//! parser.feed(&[0x00, 0x03, 0x00, 0x00, 0x0A]);
//!
//! let packet = parser.next_packet().unwrap();
//! assert_eq!(packet.code(), Some(0x00));
//! ```
//!
//! # Discards
//!
//! Bytes that cannot belong to a packet are dropped. Each contiguous run of
//! dropped bytes, and each packet rejected for a bad type, length or
//! checksum, increments a discard counter that callers can inspect through
//! [`StreamParser::discarded`].

use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use tracing::{trace, warn};

use optiscan_core::constants::{MAX_PACKET_SIZE, PACKET_HEADER_BYTES};

use crate::packet::{Packet, parse_one};

/// Upper bound on buffered bytes while no packet can be extracted.
const MAX_BUFFER_SIZE: usize = 16 * 1024;

/// Initial buffer capacity: one full data packet plus slack.
const INITIAL_BUFFER_CAPACITY: usize = 2 * MAX_PACKET_SIZE;

/// Most responses are a single acknowledgment followed by a short data burst.
const INITIAL_PACKET_QUEUE_CAPACITY: usize = 8;

/// State machine states for packet extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for the `0xEF 0x01` start code.
    ///
    /// Bytes before the start code are discarded.
    WaitingHeader,

    /// A start code sits at the front of the buffer; waiting for the rest
    /// of the packet to arrive.
    ReadingPacket,
}

/// Stateful parser turning a UART byte stream into [`Packet`]s.
///
/// # State Machine
///
/// ```text
/// ┌──────────────┐ 0xEF01 found ┌───────────────┐ complete + valid ┌──────────────┐
/// │WaitingHeader │─────────────>│ ReadingPacket │─────────────────>│Packet queued │
/// └──────────────┘              └───────────────┘                  └──────────────┘
///       ^  │                           │                                  │
///       │  │ noise (discarded)         │ malformed (header skipped)       │
///       │  └───────────────────────────┘                                  │
///       └─────────────────────────────────────────────────────────────────┘
/// ```
///
/// A packet rejected after its header was found (unknown type, bad length,
/// bad checksum) only drops the two start-code bytes. Scanning then resumes
/// from the next byte, so a corrupted length field cannot swallow the
/// packet that follows it.
#[derive(Debug)]
pub struct StreamParser {
    /// Bytes received but not yet turned into packets.
    buffer: BytesMut,

    state: ParserState,

    /// Packets ready for extraction, in arrival order.
    packets: VecDeque<Packet>,

    /// Running discard count since construction or the last `clear`.
    discarded: usize,

    /// Set after a rejected packet so the noise that follows it is not
    /// counted a second time.
    resyncing: bool,
}

impl StreamParser {
    /// Create a new parser.
    ///
    /// # Example
    ///
    /// ```
    /// use optiscan_protocol::{StreamParser, ParserState};
    ///
    /// let parser = StreamParser::new();
    /// assert_eq!(parser.state(), ParserState::WaitingHeader);
    /// ```
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ParserState::WaitingHeader,
            packets: VecDeque::with_capacity(INITIAL_PACKET_QUEUE_CAPACITY),
            discarded: 0,
            resyncing: false,
        }
    }

    /// Feed bytes read from the transport.
    ///
    /// Every complete packet contained in the accumulated bytes is parsed
    /// and queued before this returns.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while self.try_extract_packet() {}
    }

    /// Pop the oldest parsed packet.
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Current state of the state machine.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of packets ready for extraction.
    pub fn packets_available(&self) -> usize {
        self.packets.len()
    }

    /// Bytes buffered but not yet parsed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total discard events so far.
    ///
    /// # Example
    ///
    /// ```
    /// use optiscan_protocol::StreamParser;
    ///
    /// let mut parser = StreamParser::new();
    /// parser.feed(&[0x55, 0x55, 0x55]);
    /// assert_eq!(parser.discarded(), 1);
    /// ```
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Drop every buffered byte and queued packet and reset counters.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packets.clear();
        self.state = ParserState::WaitingHeader;
        self.discarded = 0;
        self.resyncing = false;
    }

    /// Give up on a packet whose remaining bytes never arrived.
    ///
    /// Call when the line went quiet while a start code sits at the front of
    /// the buffer. The start code is dropped and counted as a discard, and the
    /// bytes behind it are scanned again, so packets that were absorbed as the
    /// stalled packet's body are recovered.
    ///
    /// Returns `false` if there was no partial packet.
    ///
    /// # Example
    ///
    /// ```
    /// use optiscan_protocol::{ParserState, StreamParser};
    ///
    /// let mut parser = StreamParser::new();
    /// parser.feed(&[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x00, 0x80, 0x11]);
    /// assert_eq!(parser.state(), ParserState::ReadingPacket);
    ///
    /// assert!(parser.abandon_partial());
    /// assert_eq!(parser.buffered_len(), 0);
    /// assert_eq!(parser.discarded(), 1);
    /// ```
    pub fn abandon_partial(&mut self) -> bool {
        if self.state != ParserState::ReadingPacket {
            return false;
        }

        warn!(buffered = self.buffer.len(), "Dropping stalled partial packet");
        self.buffer.advance(PACKET_HEADER_BYTES.len());
        self.state = ParserState::WaitingHeader;
        self.record_discard();
        self.resyncing = true;

        while self.try_extract_packet() {}
        true
    }

    /// Iterator draining all currently queued packets.
    ///
    /// Does not parse more input; call [`feed()`] first.
    ///
    /// [`feed()`]: StreamParser::feed
    pub fn drain_packets(&mut self) -> DrainPackets<'_> {
        DrainPackets { parser: self }
    }

    /// Try to make progress on the buffer.
    ///
    /// Returns `true` while another pass may extract more.
    fn try_extract_packet(&mut self) -> bool {
        if self.buffer.len() > MAX_BUFFER_SIZE {
            warn!(
                buffered = self.buffer.len(),
                "Stream buffer overflow, dropping buffered bytes"
            );
            self.buffer.clear();
            self.state = ParserState::WaitingHeader;
            self.record_discard();
            return false;
        }

        match self.state {
            ParserState::WaitingHeader => self.handle_waiting_header(),
            ParserState::ReadingPacket => self.handle_reading_packet(),
        }
    }

    /// Locate the next start code, discarding anything in front of it.
    fn handle_waiting_header(&mut self) -> bool {
        match find_header(&self.buffer) {
            Some(pos) => {
                self.discard_front(pos);
                self.state = ParserState::ReadingPacket;
                true
            }
            None => {
                // A trailing 0xEF may be the first half of a start code.
                let keep = usize::from(self.buffer.last() == Some(&PACKET_HEADER_BYTES[0]));
                let drop = self.buffer.len() - keep;
                self.discard_front(drop);
                false
            }
        }
    }

    fn handle_reading_packet(&mut self) -> bool {
        match parse_one(&self.buffer) {
            Ok((packet, consumed)) => {
                trace!(
                    packet_type = %packet.packet_type(),
                    length = packet.length(),
                    "Parsed packet"
                );
                self.buffer.advance(consumed);
                self.packets.push_back(packet);
                self.state = ParserState::WaitingHeader;
                self.resyncing = false;
                true
            }
            Err(e) if e.is_incomplete() => false,
            Err(e) => {
                warn!(error = %e, "Dropping malformed packet");
                self.buffer.advance(PACKET_HEADER_BYTES.len());
                self.state = ParserState::WaitingHeader;
                self.record_discard();
                self.resyncing = true;
                true
            }
        }
    }

    fn discard_front(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        trace!(count, "Discarding bytes outside any packet");
        self.buffer.advance(count);
        if !self.resyncing {
            self.record_discard();
        }
    }

    fn record_discard(&mut self) {
        self.discarded += 1;
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_header(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(PACKET_HEADER_BYTES.len())
        .position(|window| window == PACKET_HEADER_BYTES)
}

/// Iterator returned by [`StreamParser::drain_packets`].
pub struct DrainPackets<'a> {
    parser: &'a mut StreamParser,
}

impl Iterator for DrainPackets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_packet()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.parser.packets_available();
        (len, Some(len))
    }
}

impl ExactSizeIterator for DrainPackets<'_> {
    fn len(&self) -> usize {
        self.parser.packets_available()
    }
}
