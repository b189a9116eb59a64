//! Driver for the Ethernet Sick LMS 5xx family (LMS 511 and relatives).
//!
//! Configuration is request/response over CoLa-B. Once the first measurement is requested
//! the device streams scans continuously and a background reader keeps the latest one.

pub(crate) mod cmds;
pub mod protocol;
mod reader;
mod telegram;

use self::cmds::*;
use self::protocol::{Lms5xxProtocol, Method, Telegram};
use self::reader::ScanReader;
use self::telegram::{parse_u16, parse_u8, ScanConfig, ScanData, ScanDataConfig};
use crate::base::{Channel, Error, Result};
use crate::internals::*;
use crate::session::{Session, SessionState};
use crate::transport::{TcpTransport, Transport};
use crate::types::{
    DeviceConfig, EchoFilter, MeasurementSet, ScanDataFormat, ScanFrequency, ScanResolution,
    Timeouts,
};
use byteorder::{BigEndian, WriteBytesExt};
use crossbeam_channel::RecvTimeoutError;
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Opens the transport of a session within the given connect timeout.
type Connector = Box<dyn FnMut(Duration) -> Result<Box<dyn Transport>> + Send>;

/// Operating state reported by `STlms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Undefined,
    Initialization,
    Configuration,
    Idle,
    Rotated,
    InPreparation,
    Ready,
    ReadyForMeasurement,
    Unknown(u16),
}

impl DeviceStatus {
    pub fn from_code(code: u16) -> DeviceStatus {
        match code {
            0 => DeviceStatus::Undefined,
            1 => DeviceStatus::Initialization,
            2 => DeviceStatus::Configuration,
            3 => DeviceStatus::Idle,
            4 => DeviceStatus::Rotated,
            5 => DeviceStatus::InPreparation,
            6 => DeviceStatus::Ready,
            7 => DeviceStatus::ReadyForMeasurement,
            other => DeviceStatus::Unknown(other),
        }
    }
}

struct Inner {
    /// Owned here while configuring, by the reader while streaming.
    channel: Option<Channel<Lms5xxProtocol>>,
    reader: Option<ScanReader>,
    session: Session,
    config: DeviceConfig,
    timeouts: Timeouts,
    connector: Connector,
}

impl Inner {
    fn channel(&mut self) -> Result<&mut Channel<Lms5xxProtocol>> {
        match self.channel.as_mut() {
            Some(channel) => Ok(channel),
            None if self.reader.is_some() => Err(Error::config(
                "device is streaming, uninitialize and initialize again to reconfigure",
            )),
            None => Err(Error::config("device is not initialized")),
        }
    }

    /// Sends `request` and waits for its answer, skipping scans and stale answers.
    fn transact(&mut self, cancel: &AtomicBool, request: Telegram) -> Result<Telegram> {
        let deadline = Instant::now() + self.timeouts.config;
        let expected = request
            .method
            .answer()
            .ok_or_else(|| Error::config(format!("{} expects no answer", request.method)))?;
        let channel = self.channel()?;
        channel.write(&request)?;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::io("request cancelled by uninitialize"));
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("No answer to {} {}", request.method, request.name);
                return Err(Error::timeout(format!(
                    "no answer to {} {}",
                    request.method, request.name
                )));
            }

            match channel.read_until((deadline - now).min(POLL_INTERVAL))? {
                None => {}
                Some(answer) if answer.method == Method::Fault => {
                    warn!("Device rejected {} {}", request.method, request.name);
                    return Err(Error::config(format!(
                        "device rejected {} {} with error {}",
                        request.method,
                        request.name,
                        answer.fault_code().unwrap_or(0)
                    )));
                }
                Some(answer) if answer.method == expected && answer.name == request.name => {
                    return Ok(answer)
                }
                Some(other) => trace!("Skipping telegram {}", other),
            }
        }
    }

    fn call(&mut self, cancel: &AtomicBool, method: Method, name: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.transact(cancel, Telegram::new(method, name, args))
            .map(|answer| answer.args)
    }

    fn login(&mut self, cancel: &AtomicBool) -> Result<()> {
        let mut args = vec![LMS5XX_AUTHORIZED_CLIENT];
        args.write_u32::<BigEndian>(LMS5XX_AUTHORIZED_CLIENT_PASSWORD)?;
        let answer = self.call(cancel, Method::MethodCall, LMS5XX_SET_ACCESS_MODE, &args)?;
        if parse_u8("access mode answer", &answer)? != LMS5XX_METHOD_SUCCESS {
            return Err(Error::config("device refused authorized client login"));
        }
        debug!("Logged in as authorized client");
        Ok(())
    }

    fn read_echo_filter(&mut self, cancel: &AtomicBool) -> Result<EchoFilter> {
        let answer = self.call(cancel, Method::ReadByName, LMS5XX_ECHO_FILTER, &[])?;
        Ok(EchoFilter::from_code(parse_u8("echo filter", &answer)?))
    }

    fn read_data_format(&mut self, cancel: &AtomicBool) -> Result<ScanDataFormat> {
        let answer = self.call(cancel, Method::ReadByName, LMS5XX_SCAN_DATA_CONFIG, &[])?;
        Ok(ScanDataConfig::parse(&answer)?.format())
    }

    fn read_configuration(&mut self, cancel: &AtomicBool) -> Result<()> {
        self.login(cancel)?;

        let answer = self.call(cancel, Method::ReadByName, LMS5XX_SCAN_CONFIG, &[])?;
        let scan = ScanConfig::parse(&answer)?;
        self.config.scan_frequency = scan.frequency();
        self.config.scan_resolution = scan.resolution();
        self.config.start_angle = scan.start_angle;
        self.config.stop_angle = scan.stop_angle;
        self.config.echo_filter = self.read_echo_filter(cancel)?;
        self.config.scan_data_format = self.read_data_format(cancel)?;

        info!(
            "LMS 5xx at {:?} / {:?}, echo filter {:?}, format {:?}",
            self.config.scan_frequency,
            self.config.scan_resolution,
            self.config.echo_filter,
            self.config.scan_data_format
        );
        Ok(())
    }

    fn apply_scan_config(&mut self, cancel: &AtomicBool, requested: ScanConfig) -> Result<()> {
        let answer = self.call(
            cancel,
            Method::MethodCall,
            LMS5XX_SET_SCAN_CONFIG,
            &requested.encode()?,
        )?;
        let (status, applied) = ScanConfig::parse_set_answer(&answer)?;
        if status != LMS5XX_NO_ERROR {
            return Err(Error::config(format!(
                "device rejected scan config: {}",
                scan_config_error(status)
            )));
        }
        if applied.frequency != requested.frequency || applied.resolution != requested.resolution {
            return Err(Error::config(format!(
                "device applied {}/100 Hz at {}/10000 deg instead of {}/100 Hz at {}/10000 deg",
                applied.frequency, applied.resolution, requested.frequency, requested.resolution
            )));
        }
        Ok(())
    }

    fn apply_echo_filter(&mut self, cancel: &AtomicBool, filter: EchoFilter, code: u8) -> Result<()> {
        self.call(cancel, Method::WriteByName, LMS5XX_ECHO_FILTER, &[code])?;
        let applied = self.read_echo_filter(cancel)?;
        if applied != filter {
            return Err(Error::config(format!(
                "device reports echo filter {:?} after setting {:?}",
                applied, filter
            )));
        }
        Ok(())
    }

    fn apply_data_format(
        &mut self,
        cancel: &AtomicBool,
        format: ScanDataFormat,
        data_config: ScanDataConfig,
    ) -> Result<()> {
        self.call(
            cancel,
            Method::WriteByName,
            LMS5XX_SCAN_DATA_CONFIG,
            &data_config.encode()?,
        )?;
        let applied = self.read_data_format(cancel)?;
        if applied != format {
            return Err(Error::config(format!(
                "device reports scan data format {:?} after setting {:?}",
                applied, format
            )));
        }
        Ok(())
    }

    /// Starts continuous output and hands the channel to a reader thread.
    fn start_streaming(&mut self, cancel: &AtomicBool) -> Result<()> {
        let answer = self.call(cancel, Method::MethodCall, LMS5XX_START_MEASUREMENT, &[])?;
        if parse_u8("start measurement answer", &answer)? != LMS5XX_NO_ERROR {
            return Err(Error::config("device refused to start measuring"));
        }
        let answer = self.call(cancel, Method::MethodCall, LMS5XX_RUN, &[])?;
        if parse_u8("run answer", &answer)? != LMS5XX_METHOD_SUCCESS {
            return Err(Error::config("device refused to return to run mode"));
        }
        self.call(
            cancel,
            Method::EventRequest,
            LMS5XX_SCAN_DATA,
            &[LMS5XX_EVENT_START],
        )?;

        let channel = self.channel.take().ok_or_else(|| Error::config("device is not initialized"))?;
        self.reader = Some(ScanReader::spawn(channel)?);
        info!("Streaming scans");
        Ok(())
    }

    fn next_scan(&mut self, cancel: &AtomicBool) -> Result<ScanData> {
        let deadline = Instant::now() + self.timeouts.measurement;
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| Error::config("device is not streaming"))?;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::io("acquisition cancelled by uninitialize"));
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("No scan within {:?}", self.timeouts.measurement);
                return Err(Error::timeout(format!(
                    "no scan within {:?}",
                    self.timeouts.measurement
                )));
            }
            match reader.recv((deadline - now).min(POLL_INTERVAL)) {
                Ok(scan) => return scan,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::io("scan reader has stopped"))
                }
            }
        }
    }

    /// Stops the reader (if any), stops scan output if it was started and closes the transport.
    fn shutdown(&mut self, cancel: &AtomicBool) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            self.channel = reader.stop();
        }

        if self.channel.is_some() && self.session.state() == SessionState::Streaming {
            let stop = self
                .call(cancel, Method::EventRequest, LMS5XX_SCAN_DATA, &[LMS5XX_EVENT_STOP])
                .and_then(|_| self.call(cancel, Method::MethodCall, LMS5XX_STOP_MEASUREMENT, &[]));
            if let Err(e) = stop {
                warn!("Could not stop scan output: {}", e);
            }
        }

        let result = match self.channel.take() {
            Some(mut channel) => channel.close(),
            None => Ok(()),
        };
        self.session.close();
        self.config = DeviceConfig::default();
        result
    }
}

/// Handle to one LMS 5xx on the network.
///
/// All operations take `&self` and are serialized by an internal lock. Configuration is only
/// accepted until the first measurement is requested; after that the device streams and
/// must be uninitialized before it can be reconfigured.
///
/// # Example
/// ```no_run
/// # use sicklms::{Lms5xx, MeasurementSet, ScanDataFormat};
/// # fn main() -> sicklms::Result<()> {
/// let lms = Lms5xx::default();
/// lms.initialize()?;
/// lms.set_scan_data_format(ScanDataFormat::DistDoublePulseReflect16Bit)?;
///
/// let (mut first, mut second, mut remission) = ([0u32; 1082], [0u32; 1082], [0u32; 1082]);
/// let mut set = MeasurementSet::new()
///     .with_ranges(0, &mut first)
///     .with_ranges(1, &mut second)
///     .with_reflectance(0, &mut remission);
/// lms.get_measurements(&mut set)?;
///
/// lms.uninitialize()?;
/// # Ok(())
/// # }
/// ```
pub struct Lms5xx {
    inner: Mutex<Inner>,
    cancel: AtomicBool,
}

impl fmt::Debug for Lms5xx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Lms5xx")
            .field("state", &inner.session.state())
            .field("config", &inner.config)
            .finish()
    }
}

impl Default for Lms5xx {
    /// A handle for the factory default address `192.168.0.1:2111`.
    fn default() -> Lms5xx {
        Lms5xx::new(LMS5XX_DEFAULT_ADDRESS)
    }
}

impl Lms5xx {
    /// Creates a handle for the device at `addr` (`host:port`). Nothing is connected yet.
    pub fn new(addr: &str) -> Lms5xx {
        let addr = addr.to_owned();
        Lms5xx::with_connector(move |timeout| {
            TcpTransport::connect(&addr, timeout).map(|t| Box::new(t) as Box<dyn Transport>)
        })
    }

    /// Creates a handle that obtains its transport from `connector` on `initialize`.
    pub fn with_connector<F>(connector: F) -> Lms5xx
    where
        F: FnMut(Duration) -> Result<Box<dyn Transport>> + Send + 'static,
    {
        Lms5xx {
            inner: Mutex::new(Inner {
                channel: None,
                reader: None,
                session: Session::new(),
                config: DeviceConfig::default(),
                timeouts: Timeouts::lms5xx(),
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

    /// Connects, logs in and reads the current scan configuration, echo filter and format.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.session.begin_configuring()?;
        self.cancel.store(false, Ordering::SeqCst);
        info!("Initializing LMS 5xx");

        let connect_timeout = inner.timeouts.connect;
        let transport = match (inner.connector)(connect_timeout) {
            Ok(transport) => transport,
            Err(e) => {
                inner.session.close();
                return Err(e);
            }
        };
        inner.channel = Some(Channel::new(Lms5xxProtocol::new(), transport));
        inner.config = DeviceConfig::default();

        match inner.read_configuration(&self.cancel) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Initialization failed: {}", e);
                if let Err(close_err) = inner.shutdown(&self.cancel) {
                    warn!("Failed to close transport: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Sets mirror frequency and angular resolution, keeping the current scan area.
    pub fn set_scan_freq_and_res(
        &self,
        frequency: ScanFrequency,
        resolution: ScanResolution,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_configurable()?;
        let requested = match (frequency.as_centihertz(), resolution.as_ten_thousandths()) {
            (Some(f), Some(r)) if frequency.supports(resolution) => ScanConfig {
                frequency: f,
                resolution: r,
                start_angle: inner.config.start_angle,
                stop_angle: inner.config.stop_angle,
            },
            _ => {
                return Err(Error::config(format!(
                    "{:?} is not available at {:?}",
                    resolution, frequency
                )))
            }
        };

        let result = inner.apply_scan_config(&self.cancel, requested);
        inner.session.track(result, &self.cancel)?;
        inner.config.scan_frequency = frequency;
        inner.config.scan_resolution = resolution;
        debug!("Scan config set to {:?} / {:?}", frequency, resolution);
        Ok(())
    }

    /// Selects which echo(es) the device reports.
    pub fn set_echo_filter(&self, filter: EchoFilter) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_configurable()?;
        let code = filter
            .code()
            .ok_or_else(|| Error::config("echo filter must be specified"))?;

        let result = inner.apply_echo_filter(&self.cancel, filter, code);
        inner.session.track(result, &self.cancel)?;
        inner.config.echo_filter = filter;
        debug!("Echo filter set to {:?}", filter);
        Ok(())
    }

    /// Selects pulse channels and reflectance output. Must precede the first measurement.
    ///
    /// `ScanDataFormat::Unknown` keeps whatever format the device already uses.
    pub fn set_scan_data_format(&self, format: ScanDataFormat) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_configurable()?;
        let data_config = match ScanDataConfig::from_format(format) {
            Some(data_config) => data_config,
            None => {
                debug!(
                    "Keeping device scan data format {:?}",
                    inner.config.scan_data_format
                );
                return Ok(());
            }
        };

        let result = inner.apply_data_format(&self.cancel, format, data_config);
        inner.session.track(result, &self.cancel)?;
        inner.config.scan_data_format = format;
        debug!("Scan data format set to {:?}", format);
        Ok(())
    }

    /// Reads the device operating state. Only available while configuring.
    pub fn status(&self) -> Result<DeviceStatus> {
        let mut inner = self.lock();
        inner.session.ensure_configurable()?;
        let result = inner
            .call(&self.cancel, Method::ReadByName, LMS5XX_DEVICE_STATUS, &[])
            .and_then(|answer| parse_u16("device status", &answer));
        let code = inner.session.track(result, &self.cancel)?;
        Ok(DeviceStatus::from_code(code))
    }

    /// Copies the most recent scan into `set`, starting continuous output on the first call.
    pub fn get_measurements(&self, set: &mut MeasurementSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        inner.session.ensure_acquirable()?;
        if inner.reader.is_none() {
            let started = inner.start_streaming(&self.cancel);
            inner.session.track(started, &self.cancel)?;
            inner.session.begin_streaming();
        }

        let result = inner.next_scan(&self.cancel);
        let scan = inner.session.track(result, &self.cancel)?;
        trace!(
            "Scan {} at {}/100 Hz",
            scan.scan_counter,
            scan.scan_frequency
        );
        let status = scan.device_status as u32;
        set.fill(&scan.into_values(), status);
        Ok(())
    }

    /// Stops scan output (best effort) and closes the connection.
    ///
    /// Always leaves the handle uninitialized. Fails only if closing the connection fails.
    pub fn uninitialize(&self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        let mut inner = self.lock();
        self.cancel.store(false, Ordering::SeqCst);
        let result = inner.shutdown(&self.cancel);
        info!("LMS 5xx uninitialized");
        result
    }
}
