//! Serial port transport backed by the `serialport` crate.
//!
//! `serialport` is blocking, so every read and write runs on tokio's
//! blocking pool. The port is cloned once at open time so a read blocked in
//! the receiver task never holds up a command write.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use crate::{HardwareError, Result, traits::Transport, types::SerialConfig};

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// UART connection to a sensor module.
pub struct SerialTransport {
    name: String,
    reader: SharedPort,
    writer: SharedPort,
}

impl SerialTransport {
    /// Open the port described by `config`.
    ///
    /// # Errors
    /// - `HardwareError::InvalidSettings` if the settings are invalid.
    /// - `HardwareError::OpenFailed` if the OS refuses the port.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        config.validate()?;

        let reader = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| HardwareError::open_failed(&config.port_name, e))?;
        let writer = reader
            .try_clone()
            .map_err(|e| HardwareError::open_failed(&config.port_name, e))?;

        info!(
            port = %config.port_name,
            baud_rate = config.baud_rate,
            "Opened serial transport"
        );

        Ok(Self {
            name: config.port_name.clone(),
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn join_error(e: tokio::task::JoinError) -> HardwareError {
    HardwareError::Worker(e.to_string())
}

impl Transport for SerialTransport {
    async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let writer = Arc::clone(&self.writer);
        let data = bytes.to_vec();

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
            let mut port = writer.lock().unwrap_or_else(PoisonError::into_inner);
            port.write_all(&data)?;
            port.flush()?;
            Ok(data.len())
        })
        .await
        .map_err(join_error)?;

        result.map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe => HardwareError::disconnected(self.name.clone()),
            _ => HardwareError::Io(e),
        })
    }

    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let reader = Arc::clone(&self.reader);
        let capacity = buf.len();

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            // A panic while holding the lock leaves the port itself usable.
            let mut port = reader.lock().unwrap_or_else(PoisonError::into_inner);
            port.set_timeout(timeout)?;

            let mut chunk = vec![0u8; capacity];
            match port.read(&mut chunk) {
                Ok(n) => {
                    chunk.truncate(n);
                    Ok(chunk)
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(join_error)?;

        match result {
            Ok(chunk) => {
                if !chunk.is_empty() {
                    debug!(port = %self.name, len = chunk.len(), "Serial read");
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                Err(HardwareError::disconnected(self.name.clone()))
            }
            Err(e) => Err(HardwareError::Io(e)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
