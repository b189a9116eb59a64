use super::cmds::*;
use crate::base::{Error, ProtocolDecoder, ProtocolEncoder, Result};
use crate::checksum::Crc16;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace, warn};

/// Consecutive corrupted frames tolerated before the stream is declared unusable.
const LMS2XX_MAX_RESYNC_DROPS: usize = 16;

/// One LMS 2xx telegram.
///
/// For replies, the device status byte is the last byte of `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Sender address (0x00 for host requests, 0x80 for device replies).
    pub address: u8,

    /// Command or reply code.
    pub cmd: u8,

    /// Payload following the command byte.
    pub data: Vec<u8>,
}

impl Frame {
    /// Creates a host request.
    pub fn request(cmd: u8, data: &[u8]) -> Frame {
        Frame {
            address: LMS2XX_HOST_ADDRESS,
            cmd,
            data: data.to_vec(),
        }
    }

    /// Creates a device reply. `data` must already include the trailing status byte.
    pub fn reply(cmd: u8, data: &[u8]) -> Frame {
        Frame {
            address: LMS2XX_DEVICE_ADDRESS,
            cmd,
            data: data.to_vec(),
        }
    }

    /// Splits a reply into its body and trailing status byte.
    pub fn body_and_status(&self) -> Result<(&[u8], u8)> {
        match self.data.split_last() {
            Some((status, body)) => Ok((body, *status)),
            None => Err(Error::io(format!(
                "reply {:02X} carries no status byte",
                self.cmd
            ))),
        }
    }
}

/// Unit produced by the LMS 2xx decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The device accepted the last request.
    Ack,
    /// The device rejected the last request.
    Nack,
    /// A complete telegram with a valid CRC.
    Frame(Frame),
}

/// The LMS 2xx binary telegram protocol.
///
/// Received bytes are kept in a reassembly buffer until they form a telegram whose CRC
/// checks out. On a bad length or CRC, only the start byte is discarded and the scan for
/// the next start byte begins right after it, so a valid telegram hidden behind a damaged
/// one is still found.
#[derive(Debug, Clone, PartialEq)]
pub struct Lms2xxProtocol {
    pending: Vec<u8>,
    resyncing: bool,
    dropped: usize,
}

impl Lms2xxProtocol {
    pub fn new() -> Lms2xxProtocol {
        trace!("Creating new Lms2xxProtocol");
        Lms2xxProtocol {
            pending: Vec::new(),
            resyncing: false,
            dropped: 0,
        }
    }

    /// Drops the start byte of a damaged telegram and resumes scanning after it.
    fn drop_candidate(&mut self, reason: &str) -> Result<()> {
        self.dropped += 1;
        self.resyncing = true;
        warn!(
            "Dropping corrupted frame ({}), {} consecutive",
            reason, self.dropped
        );
        self.pending.drain(..1);
        if self.dropped > LMS2XX_MAX_RESYNC_DROPS {
            error!("Resynchronization failed after {} frames", self.dropped);
            self.reset_decoder();
            return Err(Error::io(reason.to_owned()));
        }
        Ok(())
    }

    fn next_reply(&mut self) -> Result<Option<Reply>> {
        loop {
            let resyncing = self.resyncing;
            let start = self.pending.iter().position(|&b| {
                b == LMS2XX_STX || (!resyncing && (b == LMS2XX_ACK || b == LMS2XX_NACK))
            });
            match start {
                None => {
                    if !self.pending.is_empty() {
                        trace!("Discarding {} bytes of noise", self.pending.len());
                    }
                    self.pending.clear();
                    return Ok(None);
                }
                Some(skip) => {
                    if skip > 0 {
                        trace!("Skipping {} bytes before frame start", skip);
                    }
                    self.pending.drain(..skip);
                }
            }

            match self.pending[0] {
                LMS2XX_ACK => {
                    self.pending.drain(..1);
                    trace!("Decoded ACK");
                    return Ok(Some(Reply::Ack));
                }
                LMS2XX_NACK => {
                    self.pending.drain(..1);
                    trace!("Decoded NACK");
                    return Ok(Some(Reply::Nack));
                }
                _ => {}
            }

            if self.pending.len() < LMS2XX_HEADER_LEN {
                return Ok(None);
            }

            let address = self.pending[1];
            if address != LMS2XX_HOST_ADDRESS && address & LMS2XX_DEVICE_ADDRESS == 0 {
                self.drop_candidate("bad address")?;
                continue;
            }

            let len = LittleEndian::read_u16(&self.pending[2..4]) as usize;
            if len == 0 || len > LMS2XX_MAX_PAYLOAD_LEN {
                self.drop_candidate("bad length")?;
                continue;
            }

            let total = LMS2XX_HEADER_LEN + len + LMS2XX_TRAILER_LEN;
            if self.pending.len() < total {
                trace!(
                    "Frame incomplete: have {} of {} bytes",
                    self.pending.len(),
                    total
                );
                return Ok(None);
            }

            let crc_offset = LMS2XX_HEADER_LEN + len;
            let mut crc = Crc16::new();
            crc.push_slice(&self.pending[..crc_offset]);
            let received = LittleEndian::read_u16(&self.pending[crc_offset..total]);
            if crc.checksum() != received {
                trace!(
                    "CRC mismatch: received {:04X}, calculated {:04X}",
                    received,
                    crc.checksum()
                );
                self.drop_candidate("bad checksum")?;
                continue;
            }

            let frame = Frame {
                address,
                cmd: self.pending[LMS2XX_HEADER_LEN],
                data: self.pending[LMS2XX_HEADER_LEN + 1..crc_offset].to_vec(),
            };
            self.pending.drain(..total);
            self.resyncing = false;
            self.dropped = 0;
            trace!(
                "Decoded frame: cmd={:02X}, data_len={}",
                frame.cmd,
                frame.data.len()
            );
            return Ok(Some(Reply::Frame(frame)));
        }
    }
}

impl Default for Lms2xxProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for Lms2xxProtocol {
    type Frame = Reply;

    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Reply>)> {
        self.pending.extend_from_slice(buf);
        let reply = self.next_reply()?;
        Ok((buf.len(), reply))
    }

    fn reset_decoder(&mut self) {
        trace!("Resetting decoder state");
        self.pending.clear();
        self.resyncing = false;
        self.dropped = 0;
    }
}

impl ProtocolEncoder for Lms2xxProtocol {
    type Request = Frame;

    fn encode(&mut self, frame: &Frame, bytes: &mut [u8]) -> Result<usize> {
        let total = self.estimate_encoded_size(frame)?;
        if total > bytes.len() {
            error!(
                "Buffer too small: required {}, available {}",
                total,
                bytes.len()
            );
            return Err(Error::io("buffer is too small for frame encoding"));
        }

        let len = 1 + frame.data.len();
        bytes[0] = LMS2XX_STX;
        bytes[1] = frame.address;
        LittleEndian::write_u16(&mut bytes[2..4], len as u16);
        bytes[LMS2XX_HEADER_LEN] = frame.cmd;
        bytes[LMS2XX_HEADER_LEN + 1..LMS2XX_HEADER_LEN + len].copy_from_slice(&frame.data);

        let crc_offset = LMS2XX_HEADER_LEN + len;
        let mut crc = Crc16::new();
        crc.push_slice(&bytes[..crc_offset]);
        LittleEndian::write_u16(&mut bytes[crc_offset..total], crc.checksum());
        trace!(
            "Encoded frame cmd={:02X}, {} bytes, crc {:04X}",
            frame.cmd,
            total,
            crc.checksum()
        );
        Ok(total)
    }

    fn estimate_encoded_size(&mut self, frame: &Frame) -> Result<usize> {
        let len = 1 + frame.data.len();
        if len > LMS2XX_MAX_PAYLOAD_LEN {
            return Err(Error::config(format!(
                "payload too big: {} bytes (max {})",
                frame.data.len(),
                LMS2XX_MAX_PAYLOAD_LEN - 1
            )));
        }
        Ok(LMS2XX_HEADER_LEN + len + LMS2XX_TRAILER_LEN)
    }

    fn reset_encoder(&mut self) {}
}
