//! Shared vocabulary of the optiscan crates: wire constants, packet and
//! confirmation code types, and the protocol error.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
