//! Transport trait definition.
//!
//! The sensor speaks over a plain duplex byte channel, usually a UART. The
//! driver needs only two primitives from it: write a buffer, and read with
//! a bounded wait. Both take `&self` so that a receiver task can block in
//! `read` while the command path writes.
//!
//! Methods return `impl Future + Send` (Edition 2024 RPITIT) so generic
//! drivers can spawn tasks over any transport without `async_trait`.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Duplex byte channel to one sensor module.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use optiscan_hardware::{Result, Transport};
///
/// async fn drain<T: Transport>(transport: &T) -> Result<usize> {
///     let mut buf = [0u8; 64];
///     let mut total = 0;
///     loop {
///         let n = transport.read(&mut buf, Duration::from_millis(50)).await?;
///         if n == 0 {
///             return Ok(total);
///         }
///         total += n;
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Write the whole buffer. Returns the number of bytes written.
    fn write(&self, bytes: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Read whatever is available into `buf`, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` if nothing arrived in time. A timeout is not an error.
    fn read(&self, buf: &mut [u8], timeout: Duration)
    -> impl Future<Output = Result<usize>> + Send;

    /// Human-readable channel name used in logs.
    fn name(&self) -> &str;
}
