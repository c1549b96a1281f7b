//! Shared helpers for protocol integration tests.
//!
//! Helpers build the packets a sensor module would send back so tests can
//! assemble realistic byte streams without repeating framing details.

#![allow(dead_code)]

use bytes::BytesMut;
use optiscan_core::constants::DEFAULT_ADDRESS;
use optiscan_protocol::Packet;

/// Serialized acknowledgment carrying `code` and `params`.
pub fn ack_bytes(code: u8, params: &[u8]) -> Vec<u8> {
    Packet::acknowledge(DEFAULT_ADDRESS, code, params)
        .serialize()
        .expect("acknowledgment serializes")
        .to_vec()
}

/// Serialized data packet; `last` selects the end-of-data type.
pub fn data_bytes(payload: &[u8], last: bool) -> Vec<u8> {
    Packet::data(DEFAULT_ADDRESS, payload, last)
        .expect("payload fits one packet")
        .serialize()
        .expect("data packet serializes")
        .to_vec()
}

/// Byte stream of an `UpChar` exchange: acknowledgment then `chunks` data packets.
pub fn upload_stream(template: &[u8], chunk_size: usize) -> BytesMut {
    let mut stream = BytesMut::from(&ack_bytes(0x00, &[])[..]);
    let chunks: Vec<&[u8]> = template.chunks(chunk_size).collect();

    for (i, chunk) in chunks.iter().enumerate() {
        stream.extend_from_slice(&data_bytes(chunk, i + 1 == chunks.len()));
    }
    stream
}

/// Deterministic pseudo-template of `len` bytes that never contains `FOOF`.
pub fn sample_template(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ 0x80).collect()
}
