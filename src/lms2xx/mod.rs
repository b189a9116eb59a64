//! Driver for the serial Sick LMS 2xx family (LMS 200, 211, 221, 291).
//!
//! The device speaks a half-duplex request/response protocol: every request is answered by
//! an ACK or NACK byte followed by one or more reply telegrams.

pub(crate) mod cmds;
pub mod protocol;

use self::cmds::*;
use self::protocol::{Frame, Lms2xxProtocol, Reply};
use crate::base::{Channel, Error, ErrorKind, Result};
use crate::internals::*;
use crate::session::{Session, SessionState};
use crate::transport::{SerialTransport, Transport};
use crate::types::{
    Baud, DeviceConfig, MeasurementSet, ScanAngle, ScanResolution, ScanValues, Timeouts,
};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Opens the transport of a session at the given line rate.
type Connector = Box<dyn FnMut(u32) -> Result<Box<dyn Transport>> + Send>;

/// Range values reassembled from one or more reply fragments.
struct RawScan {
    /// Bytes preceding the count word in the first fragment.
    prefix: Vec<u8>,
    values: Vec<u32>,
    status: u8,
}

struct Inner {
    channel: Option<Channel<Lms2xxProtocol>>,
    session: Session,
    config: DeviceConfig,
    device_type: Option<String>,
    timeouts: Timeouts,
    connector: Connector,
}

fn mode_code(baud: Baud) -> Result<u8> {
    match baud {
        Baud::B9600 => Ok(LMS2XX_MODE_BAUD_9600),
        Baud::B19200 => Ok(LMS2XX_MODE_BAUD_19200),
        Baud::B38400 => Ok(LMS2XX_MODE_BAUD_38400),
        Baud::B500000 => Ok(LMS2XX_MODE_BAUD_500000),
        Baud::Unknown => Err(Error::config("unsupported baud rate")),
    }
}

impl Inner {
    fn channel(&mut self) -> Result<&mut Channel<Lms2xxProtocol>> {
        self.channel
            .as_mut()
            .ok_or_else(|| Error::config("device is not initialized"))
    }

    /// Waits for the reply `expected`, skipping ACKs and stale replies.
    fn await_reply(&mut self, cancel: &AtomicBool, expected: u8, deadline: Instant) -> Result<Frame> {
        let channel = self.channel()?;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::io("request cancelled by uninitialize"));
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("No reply {:02X} from device", expected);
                return Err(Error::timeout(format!(
                    "no reply {:02X} from device",
                    expected
                )));
            }

            match channel.read_until((deadline - now).min(POLL_INTERVAL))? {
                None => {}
                Some(Reply::Ack) => trace!("Device acknowledged request"),
                Some(Reply::Nack) => {
                    warn!("Device rejected request {:02X}", expected & !LMS2XX_REPLY_FLAG);
                    return Err(Error::config(format!(
                        "device rejected request {:02X}",
                        expected & !LMS2XX_REPLY_FLAG
                    )));
                }
                Some(Reply::Frame(frame)) if frame.cmd == expected => return Ok(frame),
                Some(Reply::Frame(frame)) => {
                    warn!("Ignoring unexpected reply {:02X}", frame.cmd)
                }
            }
        }
    }

    fn transact(&mut self, cancel: &AtomicBool, request: Frame, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        let expected = reply_code(request.cmd);
        let channel = self.channel()?;
        channel.reset();
        channel.write(&request)?;
        self.await_reply(cancel, expected, deadline)
    }

    fn set_line_rate(&mut self, baud: Baud) -> Result<()> {
        let rate = baud
            .as_u32()
            .ok_or_else(|| Error::config("unsupported baud rate"))?;
        let channel = self.channel()?;
        channel.transport_mut().set_baud_rate(rate)?;
        channel.reset();
        Ok(())
    }

    /// Probes every line rate with a status request until the device answers.
    fn detect_baud(&mut self, cancel: &AtomicBool) -> Result<Baud> {
        for (i, &baud) in Baud::DETECTION_ORDER.iter().enumerate() {
            if i > 0 {
                self.set_line_rate(baud)?;
            }
            let probe = Frame::request(LMS2XX_CMD_REQUEST_STATUS, &[]);
            match self.transact(cancel, probe, LMS2XX_BAUD_PROBE_TIMEOUT) {
                Ok(_) => {
                    debug!("Device answers at {} baud", baud);
                    return Ok(baud);
                }
                Err(e) if e.kind() == ErrorKind::Timeout => trace!("No answer at {} baud", baud),
                Err(e) => return Err(e),
            }
        }
        Err(Error::timeout(
            "device does not answer at any supported baud rate",
        ))
    }

    fn switch_baud(&mut self, cancel: &AtomicBool, target: Baud) -> Result<()> {
        debug!("Switching device from {} to {} baud", self.config.baud, target);
        let request = Frame::request(LMS2XX_CMD_SWITCH_MODE, &[mode_code(target)?]);
        let reply = self.transact(cancel, request, self.timeouts.config)?;
        let (body, _) = reply.body_and_status()?;
        if body.first() != Some(&LMS2XX_SWITCH_MODE_OK) {
            return Err(Error::config(format!(
                "device refused to switch to {} baud",
                target
            )));
        }

        self.set_line_rate(target)?;
        self.config.baud = target;
        let probe = Frame::request(LMS2XX_CMD_REQUEST_STATUS, &[]);
        self.transact(cancel, probe, self.timeouts.config)?;
        Ok(())
    }

    fn negotiate(&mut self, cancel: &AtomicBool, target: Baud) -> Result<()> {
        self.config.baud = self.detect_baud(cancel)?;
        if self.config.baud != target {
            self.switch_baud(cancel, target)?;
        }

        let request = Frame::request(LMS2XX_CMD_REQUEST_TYPE, &[]);
        let reply = self.transact(cancel, request, self.timeouts.config)?;
        let (body, _) = reply.body_and_status()?;
        let device_type = String::from_utf8_lossy(body)
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_owned();
        info!("Connected to {} at {} baud", device_type, target);
        self.device_type = Some(device_type);
        Ok(())
    }

    fn switch_variant(&mut self, cancel: &AtomicBool, degrees: u16, hundredths: u16) -> Result<()> {
        let mut data = [0u8; 4];
        LittleEndian::write_u16(&mut data[0..2], degrees);
        LittleEndian::write_u16(&mut data[2..4], hundredths);
        let request = Frame::request(LMS2XX_CMD_SWITCH_VARIANT, &data);
        let reply = self.transact(cancel, request, self.timeouts.config)?;

        let (body, _) = reply.body_and_status()?;
        if body.len() < 5 {
            return Err(Error::io(format!(
                "switch variant reply too short: {} bytes",
                body.len()
            )));
        }
        if body[0] != LMS2XX_SWITCH_VARIANT_OK {
            return Err(Error::config(format!(
                "device refused variant {} deg at {}/100 deg",
                degrees, hundredths
            )));
        }
        let applied = (
            LittleEndian::read_u16(&body[1..3]),
            LittleEndian::read_u16(&body[3..5]),
        );
        if applied != (degrees, hundredths) {
            return Err(Error::config(format!(
                "device applied {} deg at {}/100 deg instead of {} deg at {}/100 deg",
                applied.0, applied.1, degrees, hundredths
            )));
        }
        Ok(())
    }

    /// Sends `request` and collects the fragments of the scan it triggers.
    ///
    /// Each fragment body is `prefix, count_word, values`. Fragments must arrive in order;
    /// an out-of-order fragment discards what was collected so far.
    fn read_scan(
        &mut self,
        cancel: &AtomicBool,
        request: Frame,
        prefix_len: usize,
        timeout: Duration,
    ) -> Result<RawScan> {
        let deadline = Instant::now() + timeout;
        let expected = reply_code(request.cmd);
        let channel = self.channel()?;
        channel.reset();
        channel.write(&request)?;

        let mut scan = RawScan {
            prefix: Vec::new(),
            values: Vec::new(),
            status: 0,
        };
        let mut next_fragment = 0;
        loop {
            let frame = self.await_reply(cancel, expected, deadline)?;
            let (body, status) = frame.body_and_status()?;
            if body.len() < prefix_len + 2 {
                return Err(Error::io(format!(
                    "measured values reply too short: {} bytes",
                    body.len()
                )));
            }

            let count_word = LittleEndian::read_u16(&body[prefix_len..prefix_len + 2]);
            let count = (count_word & LMS2XX_COUNT_MASK) as usize;
            let fragment = (count_word >> LMS2XX_FRAGMENT_SHIFT) & LMS2XX_FRAGMENT_MASK;
            let more = count_word & LMS2XX_MORE_FRAGMENTS != 0;
            let words = &body[prefix_len + 2..];
            if words.len() < count * LMS2XX_VALUE_SIZE {
                return Err(Error::io(format!(
                    "reply announces {} values but carries {} bytes",
                    count,
                    words.len()
                )));
            }

            if fragment != next_fragment {
                warn!(
                    "Fragment {} arrived while expecting {}, discarding partial scan",
                    fragment, next_fragment
                );
                scan.values.clear();
                next_fragment = 0;
                if fragment != 0 {
                    continue;
                }
            }
            if fragment == 0 {
                scan.prefix = body[..prefix_len].to_vec();
            }

            scan.values.extend(
                words[..count * LMS2XX_VALUE_SIZE]
                    .chunks_exact(LMS2XX_VALUE_SIZE)
                    .map(|w| (LittleEndian::read_u16(w) & LMS2XX_RANGE_MASK) as u32),
            );
            trace!(
                "Fragment {}: {} values, {} collected, more: {}",
                fragment,
                count,
                scan.values.len(),
                more
            );
            if !more {
                scan.status = status;
                return Ok(scan);
            }
            next_fragment += 1;
        }
    }

    fn fill(&self, set: &mut MeasurementSet<'_>, raw: RawScan) {
        let start_angle = match self.config.scan_angle {
            ScanAngle::Deg100 => 400_000,
            _ => 0,
        };
        let mut scan = ScanValues {
            reported: raw.values.len(),
            start_angle,
            angular_step: self.config.scan_resolution.as_ten_thousandths().unwrap_or(0),
            ..ScanValues::default()
        };
        scan.ranges[0] = Some(raw.values);
        set.fill(&scan, raw.status as u32);
    }

    /// Closes the transport and forgets everything learned about the device.
    fn release(&mut self) -> Result<()> {
        let result = match self.channel.take() {
            Some(mut channel) => channel.close(),
            None => Ok(()),
        };
        self.session.close();
        self.config = DeviceConfig::default();
        self.device_type = None;
        result
    }
}

/// Handle to one LMS 2xx on a serial line.
///
/// All operations take `&self` and are serialized by an internal lock, so a handle can be
/// shared between threads. `uninitialize` cancels an acquisition in progress.
///
/// # Example
/// ```no_run
/// # use sicklms::{Baud, Lms2xx, MeasurementSet};
/// # fn main() -> sicklms::Result<()> {
/// let lms = Lms2xx::new("/dev/ttyUSB0");
/// lms.initialize(Baud::from("38400"))?;
///
/// let mut ranges = [0u32; 721];
/// let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
/// lms.get_mean_values(5, &mut set)?;
/// println!("{} values, status {:#x}", set.num_measurements(), set.status());
///
/// lms.uninitialize()?;
/// # Ok(())
/// # }
/// ```
pub struct Lms2xx {
    inner: Mutex<Inner>,
    cancel: AtomicBool,
}

impl fmt::Debug for Lms2xx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Lms2xx")
            .field("state", &inner.session.state())
            .field("config", &inner.config)
            .field("device_type", &inner.device_type)
            .finish()
    }
}

impl Lms2xx {
    /// Creates a handle for the device attached to serial port `path`. Nothing is opened yet.
    pub fn new(path: &str) -> Lms2xx {
        let path = path.to_owned();
        Lms2xx::with_connector(move |baud| {
            SerialTransport::open(&path, baud).map(|t| Box::new(t) as Box<dyn Transport>)
        })
    }

    /// Creates a handle that obtains its transport from `connector` on `initialize`.
    ///
    /// The connector receives the line rate to open at.
    pub fn with_connector<F>(connector: F) -> Lms2xx
    where
        F: FnMut(u32) -> Result<Box<dyn Transport>> + Send + 'static,
    {
        Lms2xx {
            inner: Mutex::new(Inner {
                channel: None,
                session: Session::new(),
                config: DeviceConfig::default(),
                device_type: None,
                timeouts: Timeouts::lms2xx(),
                connector: Box::new(connector),
            }),
            cancel: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.lock().timeouts
    }

    pub fn set_timeouts(&self, timeouts: Timeouts) {
        self.lock().timeouts = timeouts;
    }

    pub fn state(&self) -> SessionState {
        self.lock().session.state()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> DeviceConfig {
        self.lock().config.clone()
    }

    /// Type string reported by the device during `initialize`.
    pub fn device_type(&self) -> Option<String> {
        self.lock().device_type.clone()
    }

    /// Opens the serial port, finds the device's current line rate and switches it to `baud`.
    ///
    /// `Baud::Unknown` is rejected before the port is opened.
    pub fn initialize(&self, baud: Baud) -> Result<()> {
        let rate = baud.as_u32().ok_or_else(|| {
            Error::config("unsupported baud rate, use 9600, 19200, 38400 or 500000")
        })?;

        let mut inner = self.lock();
        inner.session.begin_configuring()?;
        self.cancel.store(false, Ordering::SeqCst);
        info!("Initializing LMS 2xx at {} baud", rate);

        let transport = match (inner.connector)(LMS2XX_POWER_ON_BAUD) {
            Ok(transport) => transport,
            Err(e) => {
                inner.session.close();
                return Err(e);
            }
        };
        inner.channel = Some(Channel::new(Lms2xxProtocol::new(), transport));
        inner.config = DeviceConfig::default();

        match inner.negotiate(&self.cancel, baud) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Initialization failed: {}", e);
                if let Err(close_err) = inner.release() {
                    warn!("Failed to close transport: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Selects the scan angle and angular resolution.
    ///
    /// Supported are 100 deg with 0.25, 0.5 or 1.0 deg and 180 deg with 0.5 or 1.0 deg.
    pub fn set_variant(&self, angle: ScanAngle, resolution: ScanResolution) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_configurable()?;
        let (degrees, hundredths) = match (angle.as_degrees(), resolution.as_hundredths()) {
            (Some(d), Some(h)) if angle.supports(resolution) => (d, h),
            _ => {
                return Err(Error::config(format!(
                    "variant {:?} at {:?} is not supported",
                    angle, resolution
                )))
            }
        };

        let result = inner.switch_variant(&self.cancel, degrees, hundredths);
        inner.session.track(result, &self.cancel)?;
        inner.config.scan_angle = angle;
        inner.config.scan_resolution = resolution;
        debug!("Variant set to {:?} at {:?}", angle, resolution);
        Ok(())
    }

    /// Requests one scan and copies it into `set`.
    pub fn get_measurements(&self, set: &mut MeasurementSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_acquirable()?;
        inner.session.begin_streaming();

        let request = Frame::request(
            LMS2XX_CMD_REQUEST_MEASURED_VALUES,
            &[LMS2XX_MEASURED_VALUES_ALL],
        );
        let timeout = inner.timeouts.measurement;
        let result = inner.read_scan(&self.cancel, request, 0, timeout);
        let raw = inner.session.track(result, &self.cancel)?;
        inner.fill(set, raw);
        Ok(())
    }

    /// Requests one scan averaged by the device over `averaging` raw scans (1 to 250).
    pub fn get_mean_values(&self, averaging: u32, set: &mut MeasurementSet<'_>) -> Result<()> {
        if !(LMS2XX_MIN_AVERAGING..=LMS2XX_MAX_AVERAGING).contains(&averaging) {
            return Err(Error::config(format!(
                "averaging count {} out of range {}..={}",
                averaging, LMS2XX_MIN_AVERAGING, LMS2XX_MAX_AVERAGING
            )));
        }

        let mut inner = self.lock();
        inner.session.ensure_acquirable()?;
        inner.session.begin_streaming();

        let request = Frame::request(LMS2XX_CMD_REQUEST_MEAN_VALUES, &[averaging as u8]);
        let timeout = inner.timeouts.measurement + LMS2XX_MEAN_VALUES_TIME_PER_SCAN * averaging;
        let result = inner.read_scan(&self.cancel, request, 1, timeout);
        let raw = inner.session.track(result, &self.cancel)?;
        if raw.prefix.first() != Some(&(averaging as u8)) {
            return Err(Error::config(format!(
                "device averaged over {:?} scans instead of {}",
                raw.prefix.first(),
                averaging
            )));
        }
        inner.fill(set, raw);
        Ok(())
    }

    /// Returns the device to 9600 baud (best effort) and closes the port.
    ///
    /// Always leaves the handle uninitialized. Fails only if closing the port fails.
    pub fn uninitialize(&self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        let mut inner = self.lock();
        self.cancel.store(false, Ordering::SeqCst);

        let restore = inner.channel.is_some()
            && inner.session.state() != SessionState::Faulted
            && inner.config.baud != Baud::B9600
            && inner.config.baud != Baud::Unknown;
        if restore {
            if let Err(e) = inner.switch_baud(&self.cancel, Baud::B9600) {
                warn!("Could not return device to 9600 baud: {}", e);
            }
        }

        let result = inner.release();
        info!("LMS 2xx uninitialized");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ProtocolDecoder, ProtocolEncoder};
    use crate::mock::{MockStats, MockTransport, SimDevice};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    const SIM_STATUS: u8 = 0x10;

    struct Lms2xxSim {
        protocol: Lms2xxProtocol,
        device_baud: u32,
        host_baud: u32,
        points: usize,
        per_frame: usize,
        mute_scans: bool,
        reject: Option<u8>,
    }

    impl Lms2xxSim {
        fn new() -> Lms2xxSim {
            Lms2xxSim {
                protocol: Lms2xxProtocol::new(),
                device_baud: 9600,
                host_baud: 9600,
                points: 361,
                per_frame: 400,
                mute_scans: false,
                reject: None,
            }
        }

        fn reply(&mut self, cmd: u8, data: &[u8]) -> Vec<u8> {
            let mut out = vec![LMS2XX_ACK];
            let frame = Frame::reply(reply_code(cmd), data);
            out.extend(self.protocol.encode_to_vec(&frame).unwrap());
            out
        }

        fn scan(&mut self, cmd: u8, prefix: &[u8]) -> Vec<u8> {
            // Flag bits above the range must be masked off by the driver.
            let values: Vec<u16> = (0..self.points).map(|i| (i as u16 * 10) | 0xE000).collect();
            let chunks: Vec<&[u16]> = values.chunks(self.per_frame).collect();
            let mut out = vec![LMS2XX_ACK];
            for (index, chunk) in chunks.iter().enumerate() {
                let more = if index + 1 < chunks.len() {
                    LMS2XX_MORE_FRAGMENTS
                } else {
                    0
                };
                let count_word =
                    chunk.len() as u16 | ((index as u16) << LMS2XX_FRAGMENT_SHIFT) | more;
                let mut data = prefix.to_vec();
                data.extend_from_slice(&count_word.to_le_bytes());
                for v in chunk.iter() {
                    data.extend_from_slice(&v.to_le_bytes());
                }
                data.push(SIM_STATUS);
                let frame = Frame::reply(reply_code(cmd), &data);
                out.extend(self.protocol.encode_to_vec(&frame).unwrap());
            }
            out
        }

        fn answer(&mut self, request: Frame) -> Vec<u8> {
            if Some(request.cmd) == self.reject {
                return vec![LMS2XX_NACK];
            }
            match request.cmd {
                LMS2XX_CMD_REQUEST_STATUS => self.reply(request.cmd, &[0, 0, 0, SIM_STATUS]),
                LMS2XX_CMD_SWITCH_MODE => {
                    let rate = match request.data[0] {
                        LMS2XX_MODE_BAUD_9600 => 9600,
                        LMS2XX_MODE_BAUD_19200 => 19200,
                        LMS2XX_MODE_BAUD_38400 => 38400,
                        LMS2XX_MODE_BAUD_500000 => 500000,
                        _ => return vec![LMS2XX_NACK],
                    };
                    let out = self.reply(request.cmd, &[LMS2XX_SWITCH_MODE_OK, SIM_STATUS]);
                    self.device_baud = rate;
                    out
                }
                LMS2XX_CMD_REQUEST_TYPE => {
                    let mut data = b"LMS291-S05 ".to_vec();
                    data.push(SIM_STATUS);
                    self.reply(request.cmd, &data)
                }
                LMS2XX_CMD_SWITCH_VARIANT => {
                    let mut data = vec![LMS2XX_SWITCH_VARIANT_OK];
                    data.extend_from_slice(&request.data);
                    data.push(SIM_STATUS);
                    self.reply(request.cmd, &data)
                }
                LMS2XX_CMD_REQUEST_MEASURED_VALUES if !self.mute_scans => {
                    self.scan(request.cmd, &[])
                }
                LMS2XX_CMD_REQUEST_MEAN_VALUES if !self.mute_scans => {
                    self.scan(request.cmd, &[request.data[0]])
                }
                _ => Vec::new(),
            }
        }
    }

    impl SimDevice for Lms2xxSim {
        fn on_send(&mut self, bytes: &[u8]) -> Vec<u8> {
            if self.host_baud != self.device_baud {
                return Vec::new();
            }
            let mut requests = Vec::new();
            let (_, first) = self.protocol.decode(bytes).unwrap();
            requests.extend(first);
            while let (_, Some(reply)) = self.protocol.decode(&[]).unwrap() {
                requests.push(reply);
            }

            let mut out = Vec::new();
            for request in requests {
                if let Reply::Frame(frame) = request {
                    out.extend(self.answer(frame));
                }
            }
            out
        }

        fn on_baud(&mut self, baud: u32) {
            self.host_baud = baud;
        }
    }

    fn connect(sim: Lms2xxSim) -> (Lms2xx, Arc<MockStats>) {
        let (transport, stats) = MockTransport::new(sim);
        let mut slot = Some(transport);
        let lms = Lms2xx::with_connector(move |baud| {
            assert_eq!(baud, LMS2XX_POWER_ON_BAUD);
            slot.take()
                .map(|t| Box::new(t) as Box<dyn Transport>)
                .ok_or_else(|| Error::io("already connected"))
        });
        lms.set_timeouts(Timeouts {
            config: Duration::from_millis(200),
            measurement: Duration::from_millis(300),
            connect: Duration::from_millis(200),
        });
        (lms, stats)
    }

    fn expected_ranges(n: usize) -> Vec<u32> {
        (0..n).map(|i| i as u32 * 10).collect()
    }

    fn sent_commands(stats: &MockStats) -> Vec<u8> {
        stats.sent().iter().map(|bytes| bytes[4]).collect()
    }

    #[test]
    fn mean_values_session_at_38400() {
        let (lms, stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::from("38400")).unwrap();
        assert_eq!(lms.state(), SessionState::Configuring);
        assert_eq!(lms.config().baud, Baud::B38400);
        assert_eq!(lms.device_type().as_deref(), Some("LMS291-S05"));
        assert_eq!(stats.baud_changes(), vec![38400]);

        let mut ranges = [0u32; 361];
        for _ in 0..10 {
            let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
            lms.get_mean_values(5, &mut set).unwrap();
            assert!(set.num_measurements() <= 361);
            assert_eq!(set.num_measurements(), 361);
            assert!(!set.overflowed());
            assert_eq!(set.status(), SIM_STATUS as u32);
        }
        assert_eq!(ranges.to_vec(), expected_ranges(361));
        assert_eq!(lms.state(), SessionState::Streaming);

        lms.uninitialize().unwrap();
        assert!(stats.is_closed());
        assert_eq!(stats.baud_changes().last(), Some(&9600));
        assert_eq!(lms.state(), SessionState::Uninitialized);

        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        assert_eq!(
            lms.get_mean_values(5, &mut set).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            lms.get_measurements(&mut set).unwrap_err().kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn unsupported_baud_fails_before_opening() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let lms = Lms2xx::with_connector(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::io("should not be opened"))
        });

        let err = lms.initialize(Baud::from("115200")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(lms.state(), SessionState::Uninitialized);
    }

    #[test]
    fn detects_device_already_at_target_rate() {
        let mut sim = Lms2xxSim::new();
        sim.device_baud = 38400;
        let (lms, stats) = connect(sim);
        lms.initialize(Baud::B38400).unwrap();

        assert_eq!(stats.baud_changes(), vec![19200, 38400]);
        assert!(!sent_commands(&stats).contains(&LMS2XX_CMD_SWITCH_MODE));
        lms.uninitialize().unwrap();
    }

    #[test]
    fn disconnect_mid_acquire_faults_session() {
        let (lms, stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::B9600).unwrap();
        stats.disconnect_after_sends(stats.send_count() + 1);

        let mut ranges = [0u32; 361];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        let started = Instant::now();
        let err = lms.get_measurements(&mut set).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(started.elapsed() < lms.timeouts().measurement);
        assert_eq!(lms.state(), SessionState::Faulted);
        assert_eq!(
            lms.set_variant(ScanAngle::Deg180, ScanResolution::Deg0_5)
                .unwrap_err()
                .kind(),
            ErrorKind::Io
        );

        lms.uninitialize().unwrap();
        assert_eq!(lms.state(), SessionState::Uninitialized);
        assert!(stats.is_closed());
    }

    #[test]
    fn averaging_out_of_range_is_rejected_without_traffic() {
        let (lms, stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::B9600).unwrap();
        let sends = stats.send_count();

        let mut ranges = [0u32; 361];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        for averaging in [0, 251, 1000].iter() {
            let err = lms.get_mean_values(*averaging, &mut set).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
        assert_eq!(stats.send_count(), sends);
        assert_eq!(lms.state(), SessionState::Configuring);
    }

    #[test]
    fn small_buffers_are_never_overrun() {
        let (lms, _stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::B9600).unwrap();

        let mut ranges = [0u32; 100];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        lms.get_measurements(&mut set).unwrap();
        assert_eq!(set.num_measurements(), 100);
        assert!(set.overflowed());
        assert_eq!(set.ranges(0), Some(&expected_ranges(100)[..]));
    }

    #[test]
    fn reassembles_fragmented_scans() {
        let mut sim = Lms2xxSim::new();
        sim.points = 801;
        sim.per_frame = 300;
        let (lms, _stats) = connect(sim);
        lms.initialize(Baud::B500000).unwrap();

        let mut ranges = vec![0u32; 1000];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        lms.get_measurements(&mut set).unwrap();
        assert_eq!(set.num_measurements(), 801);
        assert!(!set.overflowed());
        assert_eq!(set.ranges(0), Some(&expected_ranges(801)[..]));
    }

    #[test]
    fn variant_is_frozen_while_streaming() {
        let (lms, _stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::B19200).unwrap();
        lms.set_variant(ScanAngle::Deg100, ScanResolution::Deg0_25)
            .unwrap();
        assert_eq!(lms.config().scan_angle, ScanAngle::Deg100);

        let mut ranges = [0u32; 401];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        lms.get_measurements(&mut set).unwrap();
        assert_eq!(set.start_angle(), 400_000);
        assert_eq!(set.angular_step(), 2500);

        let before = lms.config();
        let err = lms
            .set_variant(ScanAngle::Deg180, ScanResolution::Deg1_0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(lms.config(), before);
        assert_eq!(lms.state(), SessionState::Streaming);
    }

    #[test]
    fn invalid_variant_is_rejected_locally() {
        let (lms, stats) = connect(Lms2xxSim::new());
        lms.initialize(Baud::B9600).unwrap();
        let sends = stats.send_count();
        let err = lms
            .set_variant(ScanAngle::Deg180, ScanResolution::Deg0_25)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(stats.send_count(), sends);
    }

    #[test]
    fn nack_is_a_config_error() {
        let mut sim = Lms2xxSim::new();
        sim.reject = Some(LMS2XX_CMD_SWITCH_VARIANT);
        let (lms, _stats) = connect(sim);
        lms.initialize(Baud::B9600).unwrap();

        let err = lms
            .set_variant(ScanAngle::Deg180, ScanResolution::Deg0_5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(lms.state(), SessionState::Configuring);
        assert_eq!(lms.config().scan_angle, ScanAngle::Unknown);
    }

    #[test]
    fn silent_device_times_out_and_can_retry() {
        let mut sim = Lms2xxSim::new();
        sim.mute_scans = true;
        let (lms, _stats) = connect(sim);
        lms.initialize(Baud::B9600).unwrap();

        let mut ranges = [0u32; 361];
        let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
        for _ in 0..2 {
            let err = lms.get_measurements(&mut set).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Timeout);
            assert_eq!(lms.state(), SessionState::Streaming);
        }
    }

    #[test]
    fn uninitialize_cancels_acquisition_in_flight() {
        let mut sim = Lms2xxSim::new();
        sim.mute_scans = true;
        let (lms, stats) = connect(sim);
        let mut timeouts = lms.timeouts();
        timeouts.measurement = Duration::from_secs(10);
        lms.set_timeouts(timeouts);
        lms.initialize(Baud::B38400).unwrap();

        let lms = Arc::new(lms);
        let worker = {
            let lms = lms.clone();
            thread::spawn(move || {
                let mut ranges = [0u32; 361];
                let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
                let started = Instant::now();
                let result = lms.get_measurements(&mut set);
                (result.is_err(), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        lms.uninitialize().unwrap();
        let (failed, elapsed) = worker.join().unwrap();
        assert!(failed);
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(lms.state(), SessionState::Uninitialized);
        assert_eq!(stats.baud_changes(), vec![38400, 9600]);
        assert_eq!(
            sent_commands(&stats).last(),
            Some(&LMS2XX_CMD_REQUEST_STATUS)
        );
        assert!(stats.is_closed());
    }
}
