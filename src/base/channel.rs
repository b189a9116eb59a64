use crate::base::error::{Error, ErrorKind, Result};
use crate::base::traits::{ProtocolDecoder, ProtocolEncoder};
use crate::transport::Transport;
use log::{error, trace, warn};
use std::fmt;
use std::time::{Duration, Instant};

const DEFAULT_CHANNEL_READ_BUFFER_SIZE: usize = 4096;

/// Channel encodes and decodes frames with a protocol, and sends and receives bytes via a transport
///
/// # Examples
/// ```ignore
/// let mut channel = Channel::new(
///     Lms2xxProtocol::new(),
///     Box::new(SerialTransport::open("/dev/ttyUSB0", 9600)?),
/// );
///
/// channel.write(&Frame::request(0x31, &[]))?;
/// ```
pub struct Channel<P> {
    protocol: P,
    transport: Box<dyn Transport>,
    read_buffer: Vec<u8>,
    read_start: usize,
    read_end: usize,
}

impl<P> fmt::Debug for Channel<P>
where
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("protocol", &self.protocol)
            .field("transport_open", &self.transport.is_open())
            .field("buffered", &(self.read_end - self.read_start))
            .finish()
    }
}

impl<P> Channel<P>
where
    P: ProtocolDecoder + ProtocolEncoder,
{
    /// Create a new `Channel` to read and write frames
    pub fn new(protocol: P, transport: Box<dyn Transport>) -> Channel<P> {
        Channel::with_read_buffer_size(protocol, transport, DEFAULT_CHANNEL_READ_BUFFER_SIZE)
    }

    /// Create a new `Channel` with a non-default receive buffer size
    pub fn with_read_buffer_size(
        protocol: P,
        transport: Box<dyn Transport>,
        read_buffer_size: usize,
    ) -> Channel<P> {
        trace!("Creating new Channel with buffer size {}", read_buffer_size);
        let mut chn = Channel {
            protocol,
            transport,
            read_buffer: vec![0; read_buffer_size.max(1)],
            read_start: 0,
            read_end: 0,
        };
        chn.reset();
        chn
    }

    /// Reset the protocol encoder and decoder and drop any buffered bytes
    pub fn reset(&mut self) {
        trace!("Resetting Channel protocol encoder and decoder");
        self.protocol.reset_encoder();
        self.protocol.reset_decoder();
        self.read_start = 0;
        self.read_end = 0;
    }

    /// Direct access to the underlying transport, e.g. to change the line rate.
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Feeds buffered bytes to the decoder until it yields a frame or wants more input.
    fn decode_buffered(&mut self) -> Result<Option<<P as ProtocolDecoder>::Frame>> {
        loop {
            let pending = &self.read_buffer[self.read_start..self.read_end];
            let (consumed, frame) = match self.protocol.decode(pending) {
                Ok(decoded) => decoded,
                Err(e) => {
                    error!("Protocol decode error: {}", e);
                    self.protocol.reset_decoder();
                    self.read_start = 0;
                    self.read_end = 0;
                    return Err(e);
                }
            };
            self.read_start += consumed;
            if self.read_start >= self.read_end {
                self.read_start = 0;
                self.read_end = 0;
            }

            if frame.is_some() {
                return Ok(frame);
            }
            if consumed == 0 {
                return Ok(None);
            }
        }
    }

    /// Read a frame, waiting at most `timeout`. Returns `Ok(None)` when the time ran out.
    pub fn read_until(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<<P as ProtocolDecoder>::Frame>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                trace!("read_until: timeout of {:?} reached", timeout);
                return Ok(None);
            }

            // Compact leftovers the decoder has not taken yet.
            if self.read_start > 0 {
                self.read_buffer
                    .copy_within(self.read_start..self.read_end, 0);
                self.read_end -= self.read_start;
                self.read_start = 0;
            }
            if self.read_end == self.read_buffer.len() {
                warn!("Receive buffer full and decoder made no progress, resetting decoder");
                self.reset();
                return Err(Error::io("decoder stalled on full buffer"));
            }

            let free = &mut self.read_buffer[self.read_end..];
            match self.transport.receive(free, deadline - now) {
                Ok(received) => {
                    trace!("Received {} bytes from transport", received);
                    self.read_end += received;
                }
                Err(e) if e.kind() == ErrorKind::Timeout => {}
                Err(e) => {
                    error!("Transport error while reading: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Encode and send a request
    pub fn write(&mut self, req: &<P as ProtocolEncoder>::Request) -> Result<usize> {
        let bytes = self.protocol.encode_to_vec(req)?;
        trace!("Channel write: {} bytes", bytes.len());
        self.transport.send(&bytes)?;
        Ok(bytes.len())
    }

    /// Send a request and wait for the next frame
    pub fn invoke(
        &mut self,
        req: &<P as ProtocolEncoder>::Request,
        timeout: Duration,
    ) -> Result<Option<<P as ProtocolDecoder>::Frame>> {
        let written = self.write(req)?;
        trace!("Invoke: wrote {} bytes, waiting up to {:?}", written, timeout);
        let result = self.read_until(timeout);
        if let Ok(None) = &result {
            warn!("Invoke: timed out waiting for response");
        }
        result
    }

    /// Close the transport. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.reset();
        self.transport.close()
    }
}
