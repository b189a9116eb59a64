//! TCP transport for the Ethernet attached LMS 5xx family

use super::{closed_error, Transport};
use crate::base::{Error, Result};
use log::{debug, error, info, trace};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP socket wrapper.
pub struct TcpTransport {
    peer: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `addr` (e.g. "192.168.0.1:2111"), giving up after `timeout`.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let peer = addr
            .to_socket_addrs()
            .map_err(|e| Error::io(format!("invalid address {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::io(format!("address {} did not resolve", addr)))?;

        let stream = TcpStream::connect_timeout(&peer, timeout).map_err(|e| {
            error!("Failed to connect to {}: {}", peer, e);
            Error::io(format!("cannot connect to {}: {}", peer, e))
        })?;
        stream.set_nodelay(true)?;

        info!("Connected to {}", peer);
        Ok(TcpTransport {
            peer,
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(closed_error)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        trace!("TCP send {} bytes", data.len());
        let stream = self.stream()?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let peer = self.peer;
        let stream = self.stream()?;
        // A zero duration would mean "block forever" to set_read_timeout.
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match stream.read(buf) {
            Ok(0) => {
                error!("Connection to {} closed by device", peer);
                Err(Error::io(format!("connection to {} closed by device", peer)))
            }
            Ok(n) => {
                trace!("TCP received {} bytes", n);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(Error::timeout("no bytes received"))
            }
            Err(e) => {
                error!("TCP read error from {}: {}", peer, e);
                Err(Error::io(e.to_string()))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!("Closing connection to {}", self.peer);
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(Error::io(format!("shutdown failed: {}", e))),
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
