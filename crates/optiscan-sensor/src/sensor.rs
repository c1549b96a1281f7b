//! Sensor driver runtime.
//!
//! [`Sensor::start`] spawns one receiver task that owns the
//! [`ResponseReader`]. Every response it reads is mapped to an [`Event`],
//! dispatched to the application handler and handed to the command waiting
//! for it.
//!
//! ```text
//! caller ──execute──> Packet ──> Transport::write
//!   ^                                  |
//!   |                                  v (module)
//!   └── oneshot <── Correlator <── StatusMapper <── ResponseReader <── Transport::read
//!                                      └──> EventDispatcher ──> handler
//! ```
//!
//! Sends are serialized: one command is in flight at a time and its reply
//! is awaited with a bounded timeout.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use optiscan_core::SystemParameters;
use optiscan_hardware::Transport;
use optiscan_protocol::{Command, Opcode};

use crate::config::SensorConfig;
use crate::dispatch::{Correlator, EventDispatcher, EventHandler};
use crate::error::{Result, SensorError};
use crate::event::{Event, EventKind};
use crate::mapper::StatusMapper;
use crate::reader::ResponseReader;
use crate::template::SharedTemplate;

/// State shared with the receiver task.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) correlator: Correlator,
    /// Signalled whenever a read window passes without a packet.
    quiet: Notify,
    /// Set when a command timed out; its reply may still be on the way.
    stale: AtomicBool,
}

/// Driver for one sensor module.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use optiscan_hardware::mock::MockTransport;
/// use optiscan_sensor::{Event, Sensor, SensorConfig};
///
/// #[tokio::main]
/// async fn main() -> optiscan_sensor::Result<()> {
///     let (transport, _module) = MockTransport::new();
///     let sensor = Sensor::start(Arc::new(transport), SensorConfig::default())?;
///
///     sensor.on_event(|event: &Event| println!("{:?}", event.kind));
///     assert!(sensor.is_running());
///
///     sensor.shutdown().await
/// }
/// ```
pub struct Sensor<T: Transport> {
    transport: Arc<T>,
    pub(crate) config: SensorConfig,
    template: SharedTemplate,
    pub(crate) shared: Arc<Shared>,
    send_lock: Mutex<()>,
    /// Keeps multi-step procedures from interleaving.
    pub(crate) procedure_lock: Mutex<()>,
    pub(crate) library_capacity: StdMutex<Option<u16>>,
    receiver: JoinHandle<()>,
}

impl<T: Transport> Sensor<T> {
    /// Validate `config` and spawn the receiver task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `SensorError::Config` if the configuration is invalid.
    pub fn start(transport: Arc<T>, config: SensorConfig) -> Result<Self> {
        config.validate()?;

        let template = SharedTemplate::new(config.template.clone());
        let reader = ResponseReader::new(
            Arc::clone(&transport),
            template.clone(),
            config.read_timeout(),
        );
        let mapper = StatusMapper::new(config.template_id_base);
        let shared = Arc::new(Shared::default());

        let receiver = tokio::spawn(receive_loop(
            reader,
            mapper,
            Arc::clone(&shared),
            config.read_timeout(),
        ));

        info!(
            transport = %transport.name(),
            address = format_args!("{:#010x}", config.address),
            "Sensor started"
        );

        Ok(Self {
            transport,
            library_capacity: StdMutex::new(config.library_capacity),
            config,
            template,
            shared,
            send_lock: Mutex::new(()),
            procedure_lock: Mutex::new(()),
            receiver,
        })
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The template assembler shared with the receiver task.
    pub fn template(&self) -> &SharedTemplate {
        &self.template
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Register the application event handler, replacing any previous one.
    pub fn on_event(&self, handler: impl EventHandler + 'static) {
        self.shared.dispatcher.register(handler);
    }

    /// False once the receiver task has stopped.
    pub fn is_running(&self) -> bool {
        !self.receiver.is_finished()
    }

    /// Send `command` and wait for the event answering it.
    ///
    /// A refusal from the module is still `Ok`; inspect the event kind.
    ///
    /// # Errors
    /// - `SensorError::Timeout` if no reply arrived within the response timeout.
    /// - `SensorError::Transport` if the write failed.
    /// - `SensorError::Shutdown` if the receiver task is gone.
    pub async fn execute(&self, command: Command) -> Result<Event> {
        let _guard = self.send_lock.lock().await;
        self.exchange(command, self.config.response_timeout()).await
    }

    async fn exchange(&self, command: Command, timeout: Duration) -> Result<Event> {
        if !self.is_running() {
            return Err(SensorError::Shutdown);
        }

        let opcode = command.opcode();
        let bytes = command.to_packet(self.config.address).serialize()?;

        if self.shared.stale.swap(false, Ordering::AcqRel) {
            self.settle().await;
        }

        let rx = self.shared.correlator.expect(opcode.as_u8());
        if let Err(e) = self.transport.write(&bytes).await {
            self.shared.correlator.cancel();
            return Err(e.into());
        }
        debug!(%command, len = bytes.len(), "Command sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SensorError::Shutdown),
            Err(_) => {
                self.shared.correlator.cancel();
                self.shared.stale.store(true, Ordering::Release);
                let duration_ms = timeout.as_millis() as u64;
                warn!(%command, timeout_ms = duration_ms, "No response to command");
                Err(SensorError::Timeout { duration_ms })
            }
        }
    }

    /// Wait for the line to go quiet so a late reply to a timed-out command
    /// is dropped as unsolicited instead of answering the next one.
    ///
    /// The second quiet signal belongs to a read window that opened after
    /// the wait began, so at least one whole window passed in silence.
    async fn settle(&self) {
        let quiet = async {
            self.shared.quiet.notified().await;
            self.shared.quiet.notified().await;
        };
        match tokio::time::timeout(self.config.response_timeout(), quiet).await {
            Ok(()) => debug!("Line settled after a timed-out command"),
            Err(_) => warn!("Line never went quiet after a timed-out command"),
        }
    }

    async fn execute_ok(&self, command: Command) -> Result<Event> {
        let event = self.execute(command).await?;
        require_success(command.opcode(), event)
    }

    /// Check the module password.
    ///
    /// # Errors
    /// `SensorError::Rejected` with `WrongPassword` if the module refuses it.
    pub async fn verify_password(&self) -> Result<()> {
        self.execute_ok(Command::VfyPwd {
            password: self.config.password,
        })
        .await
        .map(drop)
    }

    /// Read the module status and settings block.
    ///
    /// Also refreshes the cached library capacity used by `search`.
    pub async fn read_system_parameters(&self) -> Result<SystemParameters> {
        let event = self.execute_ok(Command::ReadSysPara).await?;
        match event.kind {
            EventKind::SystemParameters(parameters) => {
                *self
                    .library_capacity
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(parameters.library_capacity);
                Ok(parameters)
            }
            other => Err(unexpected("system parameters", &other)),
        }
    }

    /// Number of templates stored in the library.
    pub async fn template_count(&self) -> Result<u16> {
        let event = self.execute_ok(Command::TemplateNum).await?;
        match event.kind {
            EventKind::TemplateCount(count) => Ok(count),
            other => Err(unexpected("template count", &other)),
        }
    }

    /// Delete every stored template.
    pub async fn clear_library(&self) -> Result<()> {
        self.execute_ok(Command::Empty).await.map(drop)
    }

    /// Capture one image. Fails with `Rejected` / `NoFinger` if the sensor is empty.
    pub async fn capture_image(&self) -> Result<()> {
        self.execute_ok(Command::GenImg).await.map(drop)
    }

    /// Upload the template held in character buffer `buffer`.
    ///
    /// Resets the shared assembler, collects the data packets that follow
    /// the acknowledgment and returns the assembled bytes.
    ///
    /// # Errors
    /// - `SensorError::Rejected` if the module refuses the upload.
    /// - `SensorError::Unexpected` if the transfer produced no template.
    /// - `SensorError::OutOfMemory` if the buffer could not be allocated.
    pub async fn upload_template(&self, buffer: u8) -> Result<Bytes> {
        let _guard = self.send_lock.lock().await;

        self.template.reset().await?;
        self.template.start_collection().await?;

        // The reply completes only after the last data packet.
        let timeout = self.config.response_timeout()
            + self.config.template.timeout()
            + self.config.read_timeout();
        let result = self.exchange(Command::UpChar { buffer }, timeout).await;

        match result {
            Ok(Event {
                kind: EventKind::TemplateUploaded(template),
                ..
            }) => {
                info!(buffer, len = template.len(), "Template uploaded");
                Ok(template)
            }
            Ok(event) => {
                self.reset_template().await;
                Err(require_success(Opcode::UpChar, event)
                    .err()
                    .unwrap_or_else(|| SensorError::TemplateUnavailable))
            }
            Err(e) => {
                self.reset_template().await;
                Err(e)
            }
        }
    }

    async fn reset_template(&self) {
        if let Err(e) = self.template.reset().await {
            warn!(error = %e, "Template reset failed");
        }
    }

    /// Stop the receiver task and release the template buffer.
    pub async fn shutdown(self) -> Result<()> {
        self.receiver.abort();
        self.shared.correlator.fail(SensorError::Shutdown);
        self.template.clone().cleanup().await?;
        info!(transport = %self.transport.name(), "Sensor stopped");
        Ok(())
    }
}

impl<T: Transport> Drop for Sensor<T> {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl<T: Transport> std::fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("transport", &self.transport.name())
            .field("address", &format_args!("{:#010x}", self.config.address))
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Turn a refusal into an error. Successful events pass through.
pub(crate) fn require_success(opcode: Opcode, event: Event) -> Result<Event> {
    if event.is_success() {
        return Ok(event);
    }
    if event.status.is_ok() {
        // Acknowledged, but the payload could not be used.
        return Err(unexpected("usable payload", &event.kind));
    }
    Err(SensorError::Rejected {
        command: opcode,
        code: event.status,
    })
}

pub(crate) fn unexpected(expected: &'static str, got: &EventKind) -> SensorError {
    SensorError::Unexpected {
        expected,
        got: got.name().to_string(),
    }
}

async fn receive_loop<T: Transport>(
    mut reader: ResponseReader<T>,
    mapper: StatusMapper,
    shared: Arc<Shared>,
    backoff: Duration,
) {
    loop {
        match reader.read_response().await {
            Ok(response) => {
                let Some(ack) = response.acknowledgment().cloned() else {
                    warn!(packets = response.len(), "Response without acknowledgment");
                    continue;
                };
                let Some(command) = shared.correlator.pending() else {
                    warn!(code = ?ack.code(), "Unsolicited acknowledgment");
                    continue;
                };

                let event = mapper.map(command, &ack, Some(response));
                shared.dispatcher.dispatch(&event);
                shared.correlator.complete(&event);
            }
            Err(SensorError::Timeout { .. }) => shared.quiet.notify_waiters(),
            Err(SensorError::Malformed { discarded }) => {
                warn!(discarded, "Noise without a packet");
                shared.correlator.fail(SensorError::Malformed { discarded });
                shared.quiet.notify_waiters();
            }
            Err(SensorError::Transport(e)) if e.is_fatal() => {
                error!(error = %e, "Transport lost, receiver stopping");
                shared.correlator.fail(SensorError::Transport(e));
                break;
            }
            Err(SensorError::Transport(e)) => {
                warn!(error = %e, "Transport read failed");
                shared.correlator.fail(SensorError::Transport(e));
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(error = %e, "Response dropped");
                shared.correlator.fail(e);
            }
        }
    }
}
