//! Serial transport for the RS-232/RS-422 attached LMS 2xx family

use super::{closed_error, Transport};
use crate::base::{Error, Result};
use log::{debug, error, info, trace};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Serial port wrapper speaking 8N1 without flow control.
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Initial line rate (the LMS 2xx powers up at 9600)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", path, e);
                Error::io(format!("cannot open {}: {}", path, e))
            })?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(SerialTransport {
            path: path.to_owned(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(closed_error)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        trace!("Serial send {} bytes", data.len());
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(0) => Err(Error::timeout("no bytes received")),
            Ok(n) => {
                trace!("Serial received {} bytes", n);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(Error::timeout("no bytes received")),
            Err(e) => {
                error!("Serial read error on {}: {}", self.path, e);
                Err(e.into())
            }
        }
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        debug!("Setting {} to {} baud", self.path, baud);
        self.port()?.set_baud_rate(baud)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            debug!("Closing serial port {}", self.path);
            drop(port);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
