//! Mock transport for testing and development.
//!
//! [`MockTransport`] plays the host side of a UART. Its paired
//! [`MockTransportHandle`] plays the module: it injects bytes the host will
//! read and observes every buffer the host writes.

use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::{HardwareError, Result, traits::Transport};

#[derive(Debug, Default)]
struct FaultFlags {
    disconnected: AtomicBool,
    fail_next_read: AtomicBool,
    fail_next_write: AtomicBool,
}

#[derive(Debug)]
struct Inbound {
    rx: mpsc::UnboundedReceiver<Bytes>,
    /// Bytes received from the channel but not yet handed to a reader.
    pending: BytesMut,
}

/// Host side of a simulated UART.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use optiscan_hardware::{Transport, mock::MockTransport};
///
/// #[tokio::main]
/// async fn main() -> optiscan_hardware::Result<()> {
///     let (transport, mut handle) = MockTransport::new();
///
///     transport.write(&[0xEF, 0x01]).await?;
///     assert_eq!(&handle.next_written().await.unwrap()[..], &[0xEF, 0x01]);
///
///     handle.inject(vec![0x07, 0x00]);
///     let mut buf = [0u8; 8];
///     let n = transport.read(&mut buf, Duration::from_millis(10)).await?;
///     assert_eq!(&buf[..n], &[0x07, 0x00]);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    inbound: Mutex<Inbound>,
    written_tx: mpsc::UnboundedSender<Bytes>,
    faults: Arc<FaultFlags>,
}

impl MockTransport {
    /// Create a mock transport with the default name.
    pub fn new() -> (Self, MockTransportHandle) {
        Self::with_name("mock-uart")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, MockTransportHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let faults = Arc::new(FaultFlags::default());

        let transport = Self {
            name: name.into(),
            inbound: Mutex::new(Inbound {
                rx: inbound_rx,
                pending: BytesMut::new(),
            }),
            written_tx,
            faults: Arc::clone(&faults),
        };

        let handle = MockTransportHandle {
            inbound_tx,
            written_rx,
            faults,
        };

        (transport, handle)
    }

    fn check_connected(&self) -> Result<()> {
        if self.faults.disconnected.load(Ordering::Acquire) {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    async fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.check_connected()?;
        if self.faults.fail_next_write.swap(false, Ordering::AcqRel) {
            return Err(HardwareError::transfer("simulated write failure"));
        }

        trace!(transport = %self.name, len = bytes.len(), "Mock write");
        self.written_tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| HardwareError::disconnected(self.name.clone()))?;
        Ok(bytes.len())
    }

    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_connected()?;
        if self.faults.fail_next_read.swap(false, Ordering::AcqRel) {
            return Err(HardwareError::transfer("simulated read failure"));
        }

        let mut inbound = self.inbound.lock().await;

        if inbound.pending.is_empty() {
            match tokio::time::timeout(timeout, inbound.rx.recv()).await {
                Ok(Some(bytes)) => inbound.pending.extend_from_slice(&bytes),
                Ok(None) => return Err(HardwareError::disconnected(self.name.clone())),
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(inbound.pending.len());
        buf[..n].copy_from_slice(&inbound.pending[..n]);
        inbound.pending.advance(n);
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Module side of a [`MockTransport`].
#[derive(Debug)]
pub struct MockTransportHandle {
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    written_rx: mpsc::UnboundedReceiver<Bytes>,
    faults: Arc<FaultFlags>,
}

impl MockTransportHandle {
    /// Queue bytes for the host to read. Each call is delivered as one read.
    pub fn inject(&self, bytes: impl Into<Bytes>) {
        // The transport may already be dropped at the end of a test.
        let _ = self.inbound_tx.send(bytes.into());
    }

    /// Next buffer written by the host, waiting until one arrives.
    ///
    /// Returns `None` once the transport is dropped.
    pub async fn next_written(&mut self) -> Option<Bytes> {
        self.written_rx.recv().await
    }

    /// Next written buffer if one is already queued.
    pub fn try_next_written(&mut self) -> Option<Bytes> {
        self.written_rx.try_recv().ok()
    }

    /// Make the next read fail with a transfer error.
    pub fn fail_next_read(&self) {
        self.faults.fail_next_read.store(true, Ordering::Release);
    }

    /// Make the next write fail with a transfer error.
    pub fn fail_next_write(&self) {
        self.faults.fail_next_write.store(true, Ordering::Release);
    }

    /// Simulate unplugging the module: every later call fails.
    pub fn disconnect(&self) {
        self.faults.disconnected.store(true, Ordering::Release);
    }

    pub fn reconnect(&self) {
        self.faults.disconnected.store(false, Ordering::Release);
    }
}
