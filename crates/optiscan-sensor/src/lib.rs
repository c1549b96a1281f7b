//! Driver for UART optical fingerprint sensor modules.
//!
//! Builds on the packet codec in `optiscan-protocol` and any
//! [`Transport`](optiscan_hardware::Transport):
//!
//! - [`template`]: reassembles templates uploaded as runs of data packets.
//! - [`reader`]: turns the byte stream into complete responses.
//! - [`mapper`]: maps confirmation codes to application [`Event`]s.
//! - [`dispatch`]: the event handler slot and command correlation.
//! - [`sensor`]: the running driver and single-step operations.
//! - [`sequencer`]: enroll, verify, search and delete procedures.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use optiscan_hardware::mock::MockTransport;
//! use optiscan_sensor::{Event, EventKind, Sensor, SensorConfig};
//!
//! # async fn example() -> optiscan_sensor::Result<()> {
//! let (transport, _module) = MockTransport::new();
//! let sensor = Sensor::start(Arc::new(transport), SensorConfig::default())?;
//!
//! sensor.on_event(|event: &Event| {
//!     if let EventKind::EnrollComplete(result) = &event.kind {
//!         println!("enrolled as #{}", result.template_id);
//!     }
//! });
//!
//! sensor.verify_password().await?;
//! let result = sensor.enroll(1).await?;
//! let found = sensor.search().await?;
//! assert_eq!(found.template_id, Some(result.template_id));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod mapper;
pub mod reader;
pub mod sensor;
pub mod sequencer;
pub mod template;

pub use config::{RetryPolicy, SensorConfig, TemplateConfig};
pub use dispatch::{Correlator, EventDispatcher, EventHandler};
pub use error::{Procedure, Result, SensorError};
pub use event::{EnrollmentResult, Event, EventKind, MatchInfo};
pub use mapper::StatusMapper;
pub use reader::{MultiPacketResponse, ResponseReader};
pub use sensor::Sensor;
pub use template::{SharedTemplate, TemplateAssembler, TemplateState};
