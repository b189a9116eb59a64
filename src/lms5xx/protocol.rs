use super::cmds::*;
use crate::base::{Error, ProtocolDecoder, ProtocolEncoder, Result};
use crate::checksum::Checksum;
use byteorder::{BigEndian, ByteOrder};
use log::{error, trace, warn};
use std::fmt;

/// Consecutive corrupted telegrams tolerated before the stream is declared unusable.
const LMS5XX_MAX_RESYNC_DROPS: usize = 16;

/// CoLa command type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `sRN`
    ReadByName,
    /// `sRA`
    ReadAnswer,
    /// `sWN`
    WriteByName,
    /// `sWA`
    WriteAnswer,
    /// `sMN`
    MethodCall,
    /// `sAN`
    MethodAnswer,
    /// `sEN`
    EventRequest,
    /// `sEA`
    EventAnswer,
    /// `sSN`, an unsolicited event such as a scan.
    EventData,
    /// `sFA`, the device could not process a request.
    Fault,
}

impl Method {
    const ALL: [Method; 10] = [
        Method::ReadByName,
        Method::ReadAnswer,
        Method::WriteByName,
        Method::WriteAnswer,
        Method::MethodCall,
        Method::MethodAnswer,
        Method::EventRequest,
        Method::EventAnswer,
        Method::EventData,
        Method::Fault,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::ReadByName => "sRN",
            Method::ReadAnswer => "sRA",
            Method::WriteByName => "sWN",
            Method::WriteAnswer => "sWA",
            Method::MethodCall => "sMN",
            Method::MethodAnswer => "sAN",
            Method::EventRequest => "sEN",
            Method::EventAnswer => "sEA",
            Method::EventData => "sSN",
            Method::Fault => "sFA",
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Method> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().as_bytes() == bytes)
    }

    /// The method the device answers a request with.
    pub fn answer(self) -> Option<Method> {
        match self {
            Method::ReadByName => Some(Method::ReadAnswer),
            Method::WriteByName => Some(Method::WriteAnswer),
            Method::MethodCall => Some(Method::MethodAnswer),
            Method::EventRequest => Some(Method::EventAnswer),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of one CoLa-B telegram: `<method> <name>[ <args>]`.
///
/// Faults carry no name; their arguments are a big-endian error code.
#[derive(Debug, Clone, PartialEq)]
pub struct Telegram {
    pub method: Method,
    pub name: String,
    pub args: Vec<u8>,
}

impl Telegram {
    pub fn new(method: Method, name: &str, args: &[u8]) -> Telegram {
        Telegram {
            method,
            name: name.to_owned(),
            args: args.to_vec(),
        }
    }

    /// Error code of an `sFA` telegram.
    pub fn fault_code(&self) -> Option<u16> {
        match self.method {
            Method::Fault if self.args.len() >= 2 => Some(BigEndian::read_u16(&self.args)),
            _ => None,
        }
    }

    fn payload_len(&self) -> usize {
        let mut len = 3;
        if !self.name.is_empty() {
            len += 1 + self.name.len();
        }
        if !self.args.is_empty() {
            len += 1 + self.args.len();
        }
        len
    }

    fn write_payload(&self, out: &mut [u8]) {
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            out[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        put(self.method.as_str().as_bytes());
        if !self.name.is_empty() {
            put(&[LMS5XX_SEPARATOR]);
            put(self.name.as_bytes());
        }
        if !self.args.is_empty() {
            put(&[LMS5XX_SEPARATOR]);
            put(&self.args);
        }
    }

    fn parse(payload: &[u8]) -> Option<Telegram> {
        let method = Method::parse(payload.get(..3)?)?;
        let rest = match payload.get(3) {
            None => &[][..],
            Some(&LMS5XX_SEPARATOR) => &payload[4..],
            Some(_) => return None,
        };

        if method == Method::Fault {
            return Some(Telegram {
                method,
                name: String::new(),
                args: rest.to_vec(),
            });
        }

        let (name, args) = match rest.iter().position(|&b| b == LMS5XX_SEPARATOR) {
            Some(split) => (&rest[..split], &rest[split + 1..]),
            None => (rest, &[][..]),
        };
        let name = std::str::from_utf8(name).ok()?;
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Telegram {
            method,
            name: name.to_owned(),
            args: args.to_vec(),
        })
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} arg bytes)", self.method, self.name, self.args.len())
    }
}

/// The CoLa-B framing used by the LMS 5xx on TCP port 2111.
#[derive(Debug, Clone, PartialEq)]
pub struct Lms5xxProtocol {
    pending: Vec<u8>,
    dropped: usize,
}

impl Lms5xxProtocol {
    pub fn new() -> Lms5xxProtocol {
        trace!("Creating new Lms5xxProtocol");
        Lms5xxProtocol {
            pending: Vec::new(),
            dropped: 0,
        }
    }

    fn drop_candidate(&mut self, reason: &str) -> Result<()> {
        self.dropped += 1;
        warn!(
            "Dropping corrupted telegram ({}), {} consecutive",
            reason, self.dropped
        );
        self.pending.drain(..1);
        if self.dropped > LMS5XX_MAX_RESYNC_DROPS {
            error!("Resynchronization failed after {} telegrams", self.dropped);
            self.reset_decoder();
            return Err(Error::io(reason.to_owned()));
        }
        Ok(())
    }

    fn next_telegram(&mut self) -> Result<Option<Telegram>> {
        let start = [LMS5XX_STX; LMS5XX_STX_COUNT];
        loop {
            match self.pending.windows(LMS5XX_STX_COUNT).position(|w| w == start) {
                Some(skip) => {
                    if skip > 0 {
                        trace!("Skipping {} bytes before telegram start", skip);
                    }
                    self.pending.drain(..skip);
                }
                None => {
                    // A start sequence may be split across reads.
                    let keep = self
                        .pending
                        .iter()
                        .rev()
                        .take(LMS5XX_STX_COUNT - 1)
                        .take_while(|&&b| b == LMS5XX_STX)
                        .count();
                    let discard = self.pending.len() - keep;
                    self.pending.drain(..discard);
                    return Ok(None);
                }
            }

            if self.pending.len() < LMS5XX_HEADER_LEN {
                return Ok(None);
            }

            let len = BigEndian::read_u32(&self.pending[4..8]) as usize;
            if len < 3 || len > LMS5XX_MAX_PAYLOAD_LEN {
                self.drop_candidate("bad length")?;
                continue;
            }

            let total = LMS5XX_HEADER_LEN + len + LMS5XX_TRAILER_LEN;
            if self.pending.len() < total {
                trace!(
                    "Telegram incomplete: have {} of {} bytes",
                    self.pending.len(),
                    total
                );
                return Ok(None);
            }

            let payload = &self.pending[LMS5XX_HEADER_LEN..LMS5XX_HEADER_LEN + len];
            let mut checksum = Checksum::new();
            checksum.push_slice(payload);
            if checksum.checksum() != self.pending[total - 1] {
                trace!(
                    "Checksum mismatch: received {:02X}, calculated {:02X}",
                    self.pending[total - 1],
                    checksum.checksum()
                );
                self.drop_candidate("bad checksum")?;
                continue;
            }

            let telegram = match Telegram::parse(payload) {
                Some(telegram) => telegram,
                None => {
                    self.drop_candidate("malformed telegram")?;
                    continue;
                }
            };
            self.pending.drain(..total);
            self.dropped = 0;
            trace!("Decoded telegram {}", telegram);
            return Ok(Some(telegram));
        }
    }
}

impl Default for Lms5xxProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for Lms5xxProtocol {
    type Frame = Telegram;

    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Telegram>)> {
        self.pending.extend_from_slice(buf);
        let telegram = self.next_telegram()?;
        Ok((buf.len(), telegram))
    }

    fn reset_decoder(&mut self) {
        trace!("Resetting decoder state");
        self.pending.clear();
        self.dropped = 0;
    }
}

impl ProtocolEncoder for Lms5xxProtocol {
    type Request = Telegram;

    fn encode(&mut self, telegram: &Telegram, bytes: &mut [u8]) -> Result<usize> {
        let total = self.estimate_encoded_size(telegram)?;
        if total > bytes.len() {
            error!(
                "Buffer too small: required {}, available {}",
                total,
                bytes.len()
            );
            return Err(Error::io("buffer is too small for telegram encoding"));
        }

        let len = telegram.payload_len();
        bytes[..LMS5XX_STX_COUNT].copy_from_slice(&[LMS5XX_STX; LMS5XX_STX_COUNT]);
        BigEndian::write_u32(&mut bytes[4..8], len as u32);
        telegram.write_payload(&mut bytes[LMS5XX_HEADER_LEN..LMS5XX_HEADER_LEN + len]);

        let mut checksum = Checksum::new();
        checksum.push_slice(&bytes[LMS5XX_HEADER_LEN..LMS5XX_HEADER_LEN + len]);
        bytes[total - 1] = checksum.checksum();
        trace!("Encoded telegram {}, {} bytes", telegram, total);
        Ok(total)
    }

    fn estimate_encoded_size(&mut self, telegram: &Telegram) -> Result<usize> {
        let len = telegram.payload_len();
        if len > LMS5XX_MAX_PAYLOAD_LEN {
            return Err(Error::config(format!(
                "payload too big: {} bytes (max {})",
                len, LMS5XX_MAX_PAYLOAD_LEN
            )));
        }
        Ok(LMS5XX_HEADER_LEN + len + LMS5XX_TRAILER_LEN)
    }

    fn reset_encoder(&mut self) {}
}
