//! Response reader and multi-packet collector.
//!
//! One call to [`ResponseReader::read_response`] returns one logical
//! response: usually a single acknowledgment, or for uploads the
//! acknowledgment followed by every data packet of the transfer.
//!
//! ```text
//! Transport::read ──> SensorCodec ──> Packet ─┬─> MultiPacketResponse
//!                                             └─> SharedTemplate (data packets)
//! ```
//!
//! The response ends once it holds at least one packet and no template
//! collection is in flight. Packets that arrive after that point stay
//! queued in the codec for the next call.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use optiscan_core::{ConfirmationCode, PacketType};
use optiscan_hardware::Transport;
use optiscan_protocol::{Packet, SensorCodec};

use crate::error::{Result, SensorError};
use crate::template::{SharedTemplate, TemplateState};

/// Read buffer size. Large enough for a full burst of maximum-size packets.
const READ_BUFFER_SIZE: usize = 4096;

/// Packets of one exchange in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MultiPacketResponse {
    packets: Vec<Packet>,
    template: Option<Bytes>,
    discarded: usize,
}

impl MultiPacketResponse {
    pub fn new(packets: Vec<Packet>, template: Option<Bytes>, discarded: usize) -> Self {
        Self {
            packets,
            template,
            discarded,
        }
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    /// Assembled template, when this response carried a completed transfer.
    pub fn template(&self) -> Option<&Bytes> {
        self.template.as_ref()
    }

    /// Malformed stretches skipped while this response was read.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// First acknowledgment in the response.
    pub fn acknowledgment(&self) -> Option<&Packet> {
        self.packets
            .iter()
            .find(|p| p.packet_type() == PacketType::Acknowledge)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Reads responses off a transport.
#[derive(Debug)]
pub struct ResponseReader<T: Transport> {
    transport: Arc<T>,
    codec: SensorCodec,
    template: SharedTemplate,
    read_timeout: Duration,
    read_buf: Vec<u8>,
    inbox: BytesMut,
}

impl<T: Transport> ResponseReader<T> {
    pub fn new(transport: Arc<T>, template: SharedTemplate, read_timeout: Duration) -> Self {
        Self {
            transport,
            codec: SensorCodec::new(),
            template,
            read_timeout,
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            inbox: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn template(&self) -> &SharedTemplate {
        &self.template
    }

    /// Total discards since the reader was created or reset.
    pub fn discarded(&self) -> usize {
        self.codec.discarded()
    }

    /// Drop every buffered byte and queued packet.
    pub fn reset(&mut self) {
        self.codec.reset();
        self.inbox.clear();
    }

    /// Read the next complete response.
    ///
    /// # Errors
    /// - `SensorError::Timeout` if nothing arrived within the read timeout.
    /// - `SensorError::Malformed` if bytes arrived but none formed a packet.
    /// - `SensorError::Transport` if the transport failed.
    /// - `SensorError::LockTimeout` if the template mutex was not acquired.
    pub async fn read_response(&mut self) -> Result<MultiPacketResponse> {
        let discards_at_start = self.codec.discarded();
        let mut packets = Vec::new();

        loop {
            while let Some(packet) = self.codec.decode(&mut self.inbox)? {
                self.accept(&packet).await?;
                packets.push(packet);

                if self.is_finished(&packets).await? {
                    return self.finalize(packets, discards_at_start).await;
                }
            }

            let n = self
                .transport
                .read(&mut self.read_buf, self.read_timeout)
                .await?;

            if n == 0 {
                // A packet still incomplete after a quiet read never completes.
                if self.codec.abandon_partial() {
                    continue;
                }
                if packets.is_empty() {
                    let discarded = self.codec.discarded() - discards_at_start;
                    if discarded > 0 {
                        warn!(discarded, "No well-formed packet in response");
                        return Err(SensorError::Malformed { discarded });
                    }
                    return Err(SensorError::Timeout {
                        duration_ms: self.read_timeout.as_millis() as u64,
                    });
                }

                // Mid-transfer silence: let the template deadline decide.
                if self.template.poll_timeout().await? != TemplateState::Collecting {
                    return self.finalize(packets, discards_at_start).await;
                }
                continue;
            }

            trace!(transport = %self.transport.name(), len = n, "Read bytes");
            self.inbox.extend_from_slice(&self.read_buf[..n]);
        }
    }

    async fn accept(&self, packet: &Packet) -> Result<()> {
        trace!(
            packet_type = %packet.packet_type(),
            length = packet.length(),
            "Packet received"
        );

        let outcome = match packet.packet_type() {
            PacketType::Data => {
                self.template
                    .process_packet(packet.data_bytes(), PacketType::Data)
                    .await
            }
            PacketType::EndOfData => {
                let forwarded = self
                    .template
                    .process_packet(packet.data_bytes(), PacketType::Data)
                    .await;
                match forwarded {
                    Ok(TemplateState::Collecting) => {
                        self.template
                            .process_packet(&[], PacketType::EndOfData)
                            .await
                    }
                    other => other,
                }
            }
            PacketType::Command | PacketType::Acknowledge => return Ok(()),
        };

        match outcome {
            Ok(_) => Ok(()),
            Err(SensorError::InvalidState { state, .. }) => {
                debug!(%state, "Data packet outside a template collection");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn is_finished(&self, packets: &[Packet]) -> Result<bool> {
        if packets.is_empty() {
            return Ok(false);
        }

        // A refused upload sends no data packets.
        let refused = packets.iter().any(|p| {
            p.packet_type() == PacketType::Acknowledge
                && p.code().is_some_and(|code| !ConfirmationCode::from(code).is_ok())
        });
        if refused {
            return Ok(true);
        }

        Ok(self.template.state().await? != TemplateState::Collecting)
    }

    async fn finalize(
        &self,
        packets: Vec<Packet>,
        discards_at_start: usize,
    ) -> Result<MultiPacketResponse> {
        let carried_data = packets.iter().any(|p| p.packet_type().is_data());
        let template = if carried_data {
            match self.template.template().await {
                Ok(template) => Some(template),
                Err(SensorError::TemplateUnavailable) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let response =
            MultiPacketResponse::new(packets, template, self.codec.discarded() - discards_at_start);
        debug!(
            packets = response.len(),
            template_len = response.template().map_or(0, Bytes::len),
            discarded = response.discarded(),
            "Response complete"
        );
        Ok(response)
    }
}
