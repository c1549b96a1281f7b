//! Template reassembly.
//!
//! A template upload arrives as a run of data packets. [`TemplateAssembler`]
//! concatenates their contents into one buffer and decides when the
//! transfer is over.
//!
//! # States
//!
//! ```text
//! Idle ──start_collection──> Collecting ──> Complete
//!                                      └──> Error
//! any ──reset──> Idle
//! ```
//!
//! # Completion
//!
//! Checked in this order for every packet:
//!
//! 1. An end-of-data packet completes without copying its contents.
//! 2. The in-band marker `FOOF` completes; bytes after it in the same chunk
//!    are dropped.
//! 3. Reaching `max_size` truncates and completes.
//! 4. Past the deadline the collection is forced to Complete if it holds
//!    data, Error if it holds none.
//!
//! A marker split across two chunks is not detected. The transfer then ends
//! on the end-of-data packet, the size cap or the deadline.
//!
//! [`SharedTemplate`] is the single instance shared by the reader and the
//! driver. Every operation waits for the mutex at most `lock_timeout`.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use optiscan_core::{PacketType, constants::TEMPLATE_TERMINATOR};

use crate::config::TemplateConfig;
use crate::error::{Result, SensorError};

/// Lifecycle of a template collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateState {
    Idle,
    Collecting,
    Complete,
    Error,
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Collecting => "Collecting",
            Self::Complete => "Complete",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Accumulates data packet contents into one template buffer.
#[derive(Debug)]
pub struct TemplateAssembler {
    config: TemplateConfig,
    buffer: Vec<u8>,
    state: TemplateState,
    started: Option<Instant>,
    terminator_found: bool,
}

impl TemplateAssembler {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            state: TemplateState::Idle,
            started: None,
            terminator_found: false,
        }
    }

    pub fn state(&self) -> TemplateState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn terminator_found(&self) -> bool {
        self.terminator_found
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Begin a new collection, discarding whatever the previous one held.
    ///
    /// # Errors
    /// - `SensorError::InvalidState` while a collection is in flight; call
    ///   [`reset`](Self::reset) first.
    /// - `SensorError::OutOfMemory` if the initial buffer cannot be reserved.
    ///   The assembler stays Idle.
    pub fn start_collection(&mut self) -> Result<()> {
        if self.state == TemplateState::Collecting {
            return Err(SensorError::InvalidState {
                operation: "start collection",
                state: self.state,
            });
        }

        self.release();

        let requested = self.config.initial_capacity;
        if self.buffer.try_reserve_exact(requested).is_err() {
            error!(requested, "Template buffer allocation failed");
            return Err(SensorError::OutOfMemory { requested });
        }

        self.started = Some(Instant::now());
        self.state = TemplateState::Collecting;
        debug!(capacity = self.buffer.capacity(), "Template collection started");
        Ok(())
    }

    /// Feed the contents of one data packet.
    ///
    /// Returns the state after the packet was applied.
    ///
    /// # Errors
    /// - `SensorError::InvalidState` outside Collecting. Nothing changes.
    /// - `SensorError::OutOfMemory` if the buffer cannot grow. The
    ///   assembler moves to Error.
    pub fn process_packet(&mut self, data: &[u8], packet_type: PacketType) -> Result<TemplateState> {
        if self.state != TemplateState::Collecting {
            return Err(SensorError::InvalidState {
                operation: "process packet",
                state: self.state,
            });
        }

        if packet_type == PacketType::EndOfData {
            self.terminator_found = true;
            self.finish(TemplateState::Complete, "end-of-data packet");
            return Ok(self.state);
        }

        let mut accepted = &data[..data.len().min(self.config.max_chunk)];
        if accepted.len() < data.len() {
            warn!(
                len = data.len(),
                max_chunk = self.config.max_chunk,
                "Clamped oversized template chunk"
            );
        }

        let marker_end = find_terminator(accepted).map(|pos| pos + TEMPLATE_TERMINATOR.len());
        if let Some(end) = marker_end {
            accepted = &accepted[..end];
        }

        let room = self.config.max_size.saturating_sub(self.buffer.len());
        if room == 0 {
            self.finish(TemplateState::Complete, "size cap reached");
            return Ok(self.state);
        }
        if accepted.len() > room {
            warn!(
                dropped = accepted.len() - room,
                max_size = self.config.max_size,
                "Template truncated at size cap"
            );
            accepted = &accepted[..room];
        }

        // The cap may have cut the chunk ahead of the marker.
        let marker_kept = marker_end.is_some_and(|end| end <= accepted.len());

        self.grow_for(accepted.len())?;
        self.buffer.extend_from_slice(accepted);
        trace!(appended = accepted.len(), total = self.buffer.len(), "Template chunk");

        if marker_kept {
            self.terminator_found = true;
            self.finish(TemplateState::Complete, "terminator marker");
        } else if self.buffer.len() >= self.config.max_size {
            self.finish(TemplateState::Complete, "size cap reached");
        }

        self.check_timeout();
        Ok(self.state)
    }

    /// Apply the deadline when no data is arriving.
    pub fn poll_timeout(&mut self) -> TemplateState {
        self.check_timeout();
        self.state
    }

    /// The assembled template.
    ///
    /// # Errors
    /// Returns `SensorError::TemplateUnavailable` unless the collection is
    /// Complete and holds at least one byte.
    pub fn template(&self) -> Result<&[u8]> {
        if self.state == TemplateState::Complete && !self.buffer.is_empty() {
            Ok(&self.buffer)
        } else {
            Err(SensorError::TemplateUnavailable)
        }
    }

    /// Release the buffer and return to Idle.
    pub fn reset(&mut self) {
        self.release();
        if self.state != TemplateState::Idle {
            debug!(from = %self.state, "Template reset");
        }
        self.state = TemplateState::Idle;
    }

    fn release(&mut self) {
        self.buffer = Vec::new();
        self.started = None;
        self.terminator_found = false;
    }

    /// Double the buffer, capped at `max_size`, bumped to fit `additional`.
    fn grow_for(&mut self, additional: usize) -> Result<()> {
        let required = self.buffer.len() + additional;
        let capacity = self.buffer.capacity();
        if required <= capacity {
            return Ok(());
        }

        let target = capacity
            .saturating_mul(2)
            .min(self.config.max_size)
            .max(required);

        if self
            .buffer
            .try_reserve_exact(target - self.buffer.len())
            .is_err()
        {
            error!(requested = target, "Template buffer growth failed");
            self.state = TemplateState::Error;
            return Err(SensorError::OutOfMemory { requested: target });
        }

        trace!(from = capacity, to = self.buffer.capacity(), "Template buffer grown");
        Ok(())
    }

    fn check_timeout(&mut self) {
        if self.state != TemplateState::Collecting {
            return;
        }
        let Some(started) = self.started else {
            return;
        };

        if started.elapsed() > self.config.timeout() {
            warn!(
                collected = self.buffer.len(),
                timeout_ms = self.config.timeout_ms,
                "Template collection timed out"
            );
            if self.buffer.is_empty() {
                self.finish(TemplateState::Error, "timeout with no data");
            } else {
                self.finish(TemplateState::Complete, "timeout");
            }
        }
    }

    fn finish(&mut self, state: TemplateState, reason: &'static str) {
        self.state = state;
        debug!(%state, reason, size = self.buffer.len(), "Template collection finished");
    }
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(TEMPLATE_TERMINATOR.len())
        .position(|window| window == TEMPLATE_TERMINATOR)
}

/// Shared handle to the one template assembler of a sensor.
///
/// Cloning shares the same assembler.
#[derive(Debug, Clone)]
pub struct SharedTemplate {
    inner: Arc<Mutex<TemplateAssembler>>,
    lock_timeout: Duration,
}

impl SharedTemplate {
    pub fn new(config: TemplateConfig) -> Self {
        let lock_timeout = config.lock_timeout();
        Self {
            inner: Arc::new(Mutex::new(TemplateAssembler::new(config))),
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, TemplateAssembler>> {
        tokio::time::timeout(self.lock_timeout, self.inner.lock())
            .await
            .map_err(|_| {
                warn!(
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Template lock timed out"
                );
                SensorError::LockTimeout {
                    duration_ms: self.lock_timeout.as_millis() as u64,
                }
            })
    }

    pub async fn start_collection(&self) -> Result<()> {
        self.lock().await?.start_collection()
    }

    pub async fn process_packet(&self, data: &[u8], packet_type: PacketType) -> Result<TemplateState> {
        self.lock().await?.process_packet(data, packet_type)
    }

    pub async fn poll_timeout(&self) -> Result<TemplateState> {
        Ok(self.lock().await?.poll_timeout())
    }

    pub async fn state(&self) -> Result<TemplateState> {
        Ok(self.lock().await?.state())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.lock().await?.len())
    }

    /// Copy of the assembled template.
    pub async fn template(&self) -> Result<Bytes> {
        let guard = self.lock().await?;
        guard.template().map(Bytes::copy_from_slice)
    }

    pub async fn reset(&self) -> Result<()> {
        self.lock().await?.reset();
        Ok(())
    }

    /// Release the buffer and give up this handle.
    pub async fn cleanup(self) -> Result<()> {
        self.reset().await?;
        debug!(handles = Arc::strong_count(&self.inner) - 1, "Template handle released");
        Ok(())
    }
}
