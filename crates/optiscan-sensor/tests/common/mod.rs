//! Shared helpers for sensor integration tests.
//!
//! [`spawn_module`] plays a sensor module behind a [`MockTransport`]: for
//! each scripted [`Step`] it waits for the host's next command, checks the
//! opcode and injects the scripted reply bytes.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use optiscan_core::constants::DEFAULT_ADDRESS;
use optiscan_hardware::mock::{MockTransport, MockTransportHandle};
use optiscan_protocol::{Opcode, Packet, parse_one};
use optiscan_sensor::{Event, EventKind, RetryPolicy, Sensor, SensorConfig};

/// Install a test-writer subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timeouts so paused-clock tests stay readable.
pub fn test_config() -> SensorConfig {
    SensorConfig {
        read_timeout_ms: 50,
        response_timeout_ms: 500,
        library_capacity: Some(200),
        retry: RetryPolicy {
            max_attempts: 3,
            finger_poll_interval_ms: 10,
            finger_timeout_ms: 100,
        },
        ..SensorConfig::default()
    }
}

pub fn ack_bytes(code: u8, params: &[u8]) -> Bytes {
    Packet::acknowledge(DEFAULT_ADDRESS, code, params)
        .serialize()
        .expect("acknowledgment serializes")
}

/// Acknowledgment plus the data packets of a template upload.
pub fn upload_bytes(template: &[u8], chunk_size: usize, end_packet: bool) -> Bytes {
    let mut stream = BytesMut::from(&ack_bytes(0x00, &[])[..]);
    let chunks: Vec<&[u8]> = template.chunks(chunk_size).collect();

    for (i, chunk) in chunks.iter().enumerate() {
        let last = end_packet && i + 1 == chunks.len();
        let packet = Packet::data(DEFAULT_ADDRESS, chunk, last).expect("chunk fits one packet");
        stream.extend_from_slice(&packet.serialize().expect("data packet serializes"));
    }
    stream.freeze()
}

/// 16-byte `ReadSysPara` block with the given library capacity.
pub fn system_parameters(library_capacity: u16) -> Vec<u8> {
    let mut block = vec![0x00, 0x00, 0x00, 0x09];
    block.extend_from_slice(&library_capacity.to_be_bytes());
    block.extend_from_slice(&[0x00, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x02, 0x00, 0x06]);
    block
}

/// One scripted exchange.
#[derive(Debug, Clone)]
pub struct Step {
    pub expect: Opcode,
    pub replies: Vec<Bytes>,
}

impl Step {
    pub fn ack(expect: Opcode, code: u8) -> Self {
        Self::ack_with(expect, code, &[])
    }

    pub fn ack_with(expect: Opcode, code: u8, params: &[u8]) -> Self {
        Self {
            expect,
            replies: vec![ack_bytes(code, params)],
        }
    }

    /// Swallow the command without answering.
    pub fn silent(expect: Opcode) -> Self {
        Self {
            expect,
            replies: Vec::new(),
        }
    }

    pub fn raw(expect: Opcode, replies: Vec<Bytes>) -> Self {
        Self { expect, replies }
    }
}

/// Successful capture into a character buffer.
pub fn capture_ok() -> Vec<Step> {
    vec![Step::ack(Opcode::GenImg, 0x00), Step::ack(Opcode::Img2Tz, 0x00)]
}

/// Handle to a running scripted module.
pub struct Module {
    task: JoinHandle<(MockTransportHandle, Vec<Packet>)>,
}

impl Module {
    /// Wait for the script to finish and return every command received.
    ///
    /// Panics if the host sent an unexpected command.
    pub async fn finish(self) -> Vec<Packet> {
        let (_handle, seen) = self.task.await.expect("module script panicked");
        seen
    }
}

/// Start a sensor over a mock transport driven by `script`.
pub fn start_sensor(config: SensorConfig, script: Vec<Step>) -> (Sensor<MockTransport>, Module) {
    init_tracing();
    let (transport, handle) = MockTransport::new();
    let sensor = Sensor::start(Arc::new(transport), config).expect("valid test config");
    (sensor, spawn_module(handle, script))
}

pub fn spawn_module(mut handle: MockTransportHandle, script: Vec<Step>) -> Module {
    let task = tokio::spawn(async move {
        let mut seen = Vec::new();
        for (index, step) in script.into_iter().enumerate() {
            let written = handle
                .next_written()
                .await
                .expect("host closed before the script finished");
            let (packet, _) = parse_one(&written).expect("host wrote a malformed packet");
            assert_eq!(
                packet.code(),
                Some(step.expect.as_u8()),
                "step {index}: expected {}",
                step.expect
            );

            for reply in step.replies {
                handle.inject(reply);
            }
            seen.push(packet);
        }
        // Keep the handle alive so the transport stays connected.
        (handle, seen)
    });
    Module { task }
}

/// Record the kind of every dispatched event.
pub fn record_events(sensor: &Sensor<MockTransport>) -> Arc<Mutex<Vec<EventKind>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    sensor.on_event(move |event: &Event| {
        sink.lock().unwrap().push(event.kind.clone());
    });
    events
}
