//! Byte-stream endpoints the driver talks through.
//!
//! A transport knows nothing about framing: it moves raw bytes with a timeout and owns
//! the OS resource (serial port or socket) until it is closed or dropped.

use crate::base::{Error, Result};
use std::time::Duration;

mod serial;
mod tcp;

pub use self::serial::SerialTransport;
pub use self::tcp::TcpTransport;

/// Raw send/receive access to a device.
pub trait Transport: Send {
    /// Writes all of `data` to the device.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Reads whatever is available into `buf`, waiting at most `timeout` for the first byte.
    ///
    /// Returns the number of bytes read (never zero). Fails with a timeout error if nothing
    /// arrived and with an I/O error if the endpoint is closed or broken.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Changes the line rate. Only meaningful for serial links.
    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        Err(Error::config(format!(
            "transport does not support changing baud rate to {}",
            baud
        )))
    }

    /// Releases the underlying resource. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Returns `true` until `close` has been called.
    fn is_open(&self) -> bool;
}

pub(crate) fn closed_error() -> Error {
    Error::io("transport is closed")
}
