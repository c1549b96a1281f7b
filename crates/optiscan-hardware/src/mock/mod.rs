//! Mock transport for testing and development.
//!
//! Lets the driver run end to end without a module attached.

pub mod transport;

pub use transport::{MockTransport, MockTransportHandle};
