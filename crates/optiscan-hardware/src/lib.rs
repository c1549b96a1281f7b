//! Transport layer for optical fingerprint sensor modules.
//!
//! The driver talks to a module through the [`Transport`] trait: a duplex
//! byte channel with a bounded-wait read. Two implementations ship here:
//!
//! - [`mock::MockTransport`] for tests and development without hardware.
//! - `SerialTransport` over a host serial port, behind the
//!   `hardware-serial` feature.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use optiscan_hardware::{Transport, mock::MockTransport};
//!
//! # #[tokio::main]
//! # async fn main() -> optiscan_hardware::Result<()> {
//! let (transport, handle) = MockTransport::new();
//! handle.inject(vec![0xEF, 0x01]);
//!
//! let mut buf = [0u8; 16];
//! let n = transport.read(&mut buf, Duration::from_millis(50)).await?;
//! assert_eq!(n, 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `Transport` requires `Send + Sync` and its futures are `Send`, so a
//! transport can be shared through an `Arc` between a receiver task and
//! the command path.

pub mod error;
pub mod mock;
#[cfg(feature = "hardware-serial")]
pub mod serial;
pub mod traits;
pub mod types;

pub use error::{HardwareError, Result};
#[cfg(feature = "hardware-serial")]
pub use serial::SerialTransport;
pub use traits::Transport;
pub use types::SerialConfig;
