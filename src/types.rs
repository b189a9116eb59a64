use crate::internals::*;
use std::fmt;
use std::time::Duration;

/// Maximum number of echo channels a single scan can carry.
pub const MAX_ECHO_CHANNELS: usize = 5;

/// Serial line rates understood by the LMS 2xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baud {
    B9600,
    B19200,
    B38400,
    B500000,
    /// Anything else. Must be rejected before use.
    Unknown,
}

impl Baud {
    /// All usable rates, in the order they are probed when detecting the device.
    pub const DETECTION_ORDER: [Baud; 4] = [Baud::B9600, Baud::B19200, Baud::B38400, Baud::B500000];

    /// Returns the numeric line rate, or `None` for `Unknown`.
    pub fn as_u32(self) -> Option<u32> {
        match self {
            Baud::B9600 => Some(9600),
            Baud::B19200 => Some(19200),
            Baud::B38400 => Some(38400),
            Baud::B500000 => Some(500000),
            Baud::Unknown => None,
        }
    }
}

impl From<&str> for Baud {
    /// Parses `"9600"`, `"19200"`, `"38400"` or `"500000"`. Everything else is `Unknown`.
    fn from(text: &str) -> Baud {
        match text.trim() {
            "9600" => Baud::B9600,
            "19200" => Baud::B19200,
            "38400" => Baud::B38400,
            "500000" => Baud::B500000,
            _ => Baud::Unknown,
        }
    }
}

impl fmt::Display for Baud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u32() {
            Some(rate) => write!(f, "{}", rate),
            None => write!(f, "unknown"),
        }
    }
}

/// Field of view of an LMS 2xx variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAngle {
    Deg100,
    Deg180,
    Unknown,
}

impl ScanAngle {
    pub const ALL: [ScanAngle; 2] = [ScanAngle::Deg100, ScanAngle::Deg180];

    pub fn as_degrees(self) -> Option<u16> {
        match self {
            ScanAngle::Deg100 => Some(100),
            ScanAngle::Deg180 => Some(180),
            ScanAngle::Unknown => None,
        }
    }

    pub fn from_degrees(degrees: u16) -> ScanAngle {
        match degrees {
            100 => ScanAngle::Deg100,
            180 => ScanAngle::Deg180,
            _ => ScanAngle::Unknown,
        }
    }

    /// Whether the LMS 2xx offers this angle with `resolution`.
    pub fn supports(self, resolution: ScanResolution) -> bool {
        matches!(
            (self, resolution),
            (ScanAngle::Deg100, ScanResolution::Deg0_25)
                | (ScanAngle::Deg100, ScanResolution::Deg0_5)
                | (ScanAngle::Deg100, ScanResolution::Deg1_0)
                | (ScanAngle::Deg180, ScanResolution::Deg0_5)
                | (ScanAngle::Deg180, ScanResolution::Deg1_0)
        )
    }
}

/// Mirror rotation frequency of an LMS 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFrequency {
    Hz25,
    Hz35,
    Hz50,
    Hz75,
    Hz100,
    Unknown,
}

impl ScanFrequency {
    pub const ALL: [ScanFrequency; 5] = [
        ScanFrequency::Hz25,
        ScanFrequency::Hz35,
        ScanFrequency::Hz50,
        ScanFrequency::Hz75,
        ScanFrequency::Hz100,
    ];

    /// Frequency in 1/100 Hz as used on the wire.
    pub fn as_centihertz(self) -> Option<u32> {
        match self {
            ScanFrequency::Hz25 => Some(2500),
            ScanFrequency::Hz35 => Some(3500),
            ScanFrequency::Hz50 => Some(5000),
            ScanFrequency::Hz75 => Some(7500),
            ScanFrequency::Hz100 => Some(10000),
            ScanFrequency::Unknown => None,
        }
    }

    pub fn from_centihertz(value: u32) -> ScanFrequency {
        match value {
            2500 => ScanFrequency::Hz25,
            3500 => ScanFrequency::Hz35,
            5000 => ScanFrequency::Hz50,
            7500 => ScanFrequency::Hz75,
            10000 => ScanFrequency::Hz100,
            _ => ScanFrequency::Unknown,
        }
    }

    /// Duration of one mirror revolution.
    pub fn period(self) -> Option<Duration> {
        self.as_centihertz()
            .map(|centihertz| Duration::from_micros(100_000_000 / centihertz as u64))
    }

    /// Whether the LMS 5xx can run at this frequency with `resolution`.
    pub fn supports(self, resolution: ScanResolution) -> bool {
        use ScanResolution::*;
        match self {
            ScanFrequency::Hz25 => resolution != Unknown,
            ScanFrequency::Hz35 => matches!(resolution, Deg0_25 | Deg0_5 | Deg1_0),
            ScanFrequency::Hz50 => matches!(resolution, Deg0_3333 | Deg0_5 | Deg0_6667 | Deg1_0),
            ScanFrequency::Hz75 => matches!(resolution, Deg0_5 | Deg1_0),
            ScanFrequency::Hz100 => matches!(resolution, Deg0_6667 | Deg1_0),
            ScanFrequency::Unknown => false,
        }
    }
}

/// Angular step between two consecutive measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResolution {
    Deg0_1667,
    Deg0_25,
    Deg0_3333,
    Deg0_5,
    Deg0_6667,
    Deg1_0,
    Unknown,
}

impl ScanResolution {
    pub const ALL: [ScanResolution; 6] = [
        ScanResolution::Deg0_1667,
        ScanResolution::Deg0_25,
        ScanResolution::Deg0_3333,
        ScanResolution::Deg0_5,
        ScanResolution::Deg0_6667,
        ScanResolution::Deg1_0,
    ];

    /// Resolution in 1/10000 degree as used by the LMS 5xx.
    pub fn as_ten_thousandths(self) -> Option<u32> {
        match self {
            ScanResolution::Deg0_1667 => Some(1667),
            ScanResolution::Deg0_25 => Some(2500),
            ScanResolution::Deg0_3333 => Some(3333),
            ScanResolution::Deg0_5 => Some(5000),
            ScanResolution::Deg0_6667 => Some(6667),
            ScanResolution::Deg1_0 => Some(10000),
            ScanResolution::Unknown => None,
        }
    }

    pub fn from_ten_thousandths(value: u32) -> ScanResolution {
        match value {
            1667 => ScanResolution::Deg0_1667,
            2500 => ScanResolution::Deg0_25,
            3333 => ScanResolution::Deg0_3333,
            5000 => ScanResolution::Deg0_5,
            6667 => ScanResolution::Deg0_6667,
            10000 => ScanResolution::Deg1_0,
            _ => ScanResolution::Unknown,
        }
    }

    /// Resolution in 1/100 degree as used by the LMS 2xx. Only 0.25, 0.5 and 1.0 exist there.
    pub fn as_hundredths(self) -> Option<u16> {
        match self {
            ScanResolution::Deg0_25 => Some(25),
            ScanResolution::Deg0_5 => Some(50),
            ScanResolution::Deg1_0 => Some(100),
            _ => None,
        }
    }

    pub fn from_hundredths(value: u16) -> ScanResolution {
        match value {
            25 => ScanResolution::Deg0_25,
            50 => ScanResolution::Deg0_5,
            100 => ScanResolution::Deg1_0,
            _ => ScanResolution::Unknown,
        }
    }

    pub fn as_degrees(self) -> Option<f64> {
        self.as_ten_thousandths().map(|v| v as f64 / 10000.0)
    }
}

/// Which returns of a multi-echo pulse the LMS 5xx reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoFilter {
    FirstEcho,
    AllEchoes,
    LastEcho,
    StrongestEcho,
    Unknown,
}

impl EchoFilter {
    pub const ALL: [EchoFilter; 4] = [
        EchoFilter::FirstEcho,
        EchoFilter::AllEchoes,
        EchoFilter::LastEcho,
        EchoFilter::StrongestEcho,
    ];

    pub fn code(self) -> Option<u8> {
        match self {
            EchoFilter::FirstEcho => Some(0),
            EchoFilter::AllEchoes => Some(1),
            EchoFilter::LastEcho => Some(2),
            EchoFilter::StrongestEcho => Some(3),
            EchoFilter::Unknown => None,
        }
    }

    pub fn from_code(code: u8) -> EchoFilter {
        match code {
            0 => EchoFilter::FirstEcho,
            1 => EchoFilter::AllEchoes,
            2 => EchoFilter::LastEcho,
            3 => EchoFilter::StrongestEcho,
            _ => EchoFilter::Unknown,
        }
    }
}

/// Width of reflectance values in a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectanceResolution {
    EightBit,
    SixteenBit,
}

/// Contents of each scan: pulse channels times reflectance width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDataFormat {
    DistSinglePulseReflectNone,
    DistSinglePulseReflect8Bit,
    DistSinglePulseReflect16Bit,
    DistDoublePulseReflectNone,
    DistDoublePulseReflect8Bit,
    DistDoublePulseReflect16Bit,
    /// Unspecified, or a device setting outside the combinations above.
    Unknown,
}

impl ScanDataFormat {
    /// Every format except `Unknown`.
    pub const KNOWN: [ScanDataFormat; 6] = [
        ScanDataFormat::DistSinglePulseReflectNone,
        ScanDataFormat::DistSinglePulseReflect8Bit,
        ScanDataFormat::DistSinglePulseReflect16Bit,
        ScanDataFormat::DistDoublePulseReflectNone,
        ScanDataFormat::DistDoublePulseReflect8Bit,
        ScanDataFormat::DistDoublePulseReflect16Bit,
    ];

    /// Number of distance pulses per angular step (1 or 2), `None` if unknown.
    pub fn pulse_count(self) -> Option<u8> {
        use ScanDataFormat::*;
        match self {
            DistSinglePulseReflectNone | DistSinglePulseReflect8Bit | DistSinglePulseReflect16Bit => {
                Some(1)
            }
            DistDoublePulseReflectNone | DistDoublePulseReflect8Bit | DistDoublePulseReflect16Bit => {
                Some(2)
            }
            Unknown => None,
        }
    }

    /// Reflectance width, `None` when the format carries no reflectance (or is unknown).
    pub fn reflectance(self) -> Option<ReflectanceResolution> {
        use ScanDataFormat::*;
        match self {
            DistSinglePulseReflect8Bit | DistDoublePulseReflect8Bit => {
                Some(ReflectanceResolution::EightBit)
            }
            DistSinglePulseReflect16Bit | DistDoublePulseReflect16Bit => {
                Some(ReflectanceResolution::SixteenBit)
            }
            _ => None,
        }
    }

    /// Finds the format with the given pulse count and reflectance setting.
    pub fn from_parts(pulses: u8, reflectance: Option<ReflectanceResolution>) -> ScanDataFormat {
        Self::KNOWN
            .iter()
            .copied()
            .find(|f| f.pulse_count() == Some(pulses) && f.reflectance() == reflectance)
            .unwrap_or(ScanDataFormat::Unknown)
    }
}

/// Snapshot of the device configuration held by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Session line rate (LMS 2xx).
    pub baud: Baud,
    /// Field of view (LMS 2xx).
    pub scan_angle: ScanAngle,
    /// Mirror frequency (LMS 5xx).
    pub scan_frequency: ScanFrequency,
    pub scan_resolution: ScanResolution,
    /// Echo selection (LMS 5xx).
    pub echo_filter: EchoFilter,
    /// Scan contents (LMS 5xx).
    pub scan_data_format: ScanDataFormat,
    /// First beam angle in 1/10000 degree (LMS 5xx).
    pub start_angle: i32,
    /// Last beam angle in 1/10000 degree (LMS 5xx).
    pub stop_angle: i32,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            baud: Baud::Unknown,
            scan_angle: ScanAngle::Unknown,
            scan_frequency: ScanFrequency::Unknown,
            scan_resolution: ScanResolution::Unknown,
            echo_filter: EchoFilter::Unknown,
            scan_data_format: ScanDataFormat::Unknown,
            start_angle: LMS5XX_DEFAULT_START_ANGLE,
            stop_angle: LMS5XX_DEFAULT_STOP_ANGLE,
        }
    }
}

/// Time limits for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Waiting for a configuration acknowledgement.
    pub config: Duration,
    /// Waiting for a complete scan.
    pub measurement: Duration,
    /// Establishing the transport.
    pub connect: Duration,
}

impl Default for Timeouts {
    /// The LMS 2xx defaults, the more conservative of the two families.
    fn default() -> Timeouts {
        Timeouts::lms2xx()
    }
}

impl Timeouts {
    /// Defaults for the serial LMS 2xx family.
    pub fn lms2xx() -> Timeouts {
        Timeouts {
            config: LMS2XX_DEFAULT_CONFIG_TIMEOUT,
            measurement: LMS2XX_DEFAULT_MEASUREMENT_TIMEOUT,
            connect: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Defaults for the Ethernet LMS 5xx family.
    pub fn lms5xx() -> Timeouts {
        Timeouts {
            config: LMS5XX_DEFAULT_CONFIG_TIMEOUT,
            measurement: LMS5XX_DEFAULT_MEASUREMENT_TIMEOUT,
            connect: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Caller-owned output buffers for one scan.
///
/// Up to five range buffers (one per echo channel) and five matching reflectance buffers
/// may be attached. The driver writes at most as many entries as the smallest buffer the
/// scan fills holds; when the device reported more, the set is marked as overflowed.
/// Buffers of channels or values the scan does not carry are left untouched and read back
/// as `None`.
///
/// # Example
/// ```
/// # use sicklms::MeasurementSet;
/// let mut ranges = [0u32; 1082];
/// let mut reflect = [0u32; 1082];
/// let set = MeasurementSet::new()
///     .with_ranges(0, &mut ranges)
///     .with_reflectance(0, &mut reflect);
/// assert_eq!(set.num_measurements(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MeasurementSet<'a> {
    ranges: [Option<&'a mut [u32]>; MAX_ECHO_CHANNELS],
    reflectance: [Option<&'a mut [u32]>; MAX_ECHO_CHANNELS],
    /// Channels the last scan wrote into.
    filled_ranges: [bool; MAX_ECHO_CHANNELS],
    filled_reflectance: [bool; MAX_ECHO_CHANNELS],
    num_measurements: usize,
    status: u32,
    overflow: bool,
    start_angle: i32,
    angular_step: u32,
}

impl<'a> MeasurementSet<'a> {
    pub fn new() -> MeasurementSet<'a> {
        MeasurementSet::default()
    }

    /// Attaches a range buffer for echo `channel`.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= MAX_ECHO_CHANNELS`.
    pub fn with_ranges(mut self, channel: usize, buf: &'a mut [u32]) -> MeasurementSet<'a> {
        self.ranges[channel] = Some(buf);
        self
    }

    /// Attaches a reflectance buffer for echo `channel`.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= MAX_ECHO_CHANNELS`.
    pub fn with_reflectance(mut self, channel: usize, buf: &'a mut [u32]) -> MeasurementSet<'a> {
        self.reflectance[channel] = Some(buf);
        self
    }

    /// Number of entries written into each filled buffer by the last acquisition.
    pub fn num_measurements(&self) -> usize {
        self.num_measurements
    }

    /// Device status reported with the last scan.
    pub fn status(&self) -> u32 {
        self.status
    }

    /// `true` if the device reported more values than the attached buffers could hold.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Angle of the first value in 1/10000 degree, when the device reports it.
    pub fn start_angle(&self) -> i32 {
        self.start_angle
    }

    /// Angle between consecutive values in 1/10000 degree, when the device reports it.
    pub fn angular_step(&self) -> u32 {
        self.angular_step
    }

    /// Written range values of `channel`, `None` unless the last scan carried it.
    pub fn ranges(&self, channel: usize) -> Option<&[u32]> {
        filled_values(&self.ranges, &self.filled_ranges, channel, self.num_measurements)
    }

    /// Written reflectance values of `channel`, `None` unless the last scan carried it.
    pub fn reflectance(&self, channel: usize) -> Option<&[u32]> {
        filled_values(
            &self.reflectance,
            &self.filled_reflectance,
            channel,
            self.num_measurements,
        )
    }

    /// Smallest attached buffer among those `scan` has values for.
    fn capacity(&self, scan: &ScanValues) -> Option<usize> {
        let ranges = self.ranges.iter().zip(scan.ranges.iter());
        let reflectance = self.reflectance.iter().zip(scan.reflectance.iter());
        ranges
            .chain(reflectance)
            .filter(|(_, values)| values.is_some())
            .filter_map(|(buf, _)| buf.as_ref().map(|b| b.len()))
            .min()
    }

    /// Copies one scan into the attached buffers, never past their length.
    ///
    /// `reported` is the number of values per channel the device announced.
    pub(crate) fn fill(&mut self, scan: &ScanValues, status: u32) {
        let written = match self.capacity(scan) {
            Some(capacity) => scan.reported.min(capacity),
            None => scan.reported,
        };
        self.num_measurements = written;
        self.overflow = written < scan.reported;
        self.status = status;
        self.start_angle = scan.start_angle;
        self.angular_step = scan.angular_step;

        for ((buf, values), filled) in self
            .ranges
            .iter_mut()
            .zip(scan.ranges.iter())
            .zip(self.filled_ranges.iter_mut())
        {
            *filled = copy_values(buf, values, written);
        }
        for ((buf, values), filled) in self
            .reflectance
            .iter_mut()
            .zip(scan.reflectance.iter())
            .zip(self.filled_reflectance.iter_mut())
        {
            *filled = copy_values(buf, values, written);
        }
    }
}

/// Copies up to `written` values; returns whether anything was attached and carried.
fn copy_values(buf: &mut Option<&mut [u32]>, values: &Option<Vec<u32>>, written: usize) -> bool {
    match (buf, values) {
        (Some(buf), Some(values)) => {
            let buf: &mut [u32] = buf;
            let n = written.min(values.len()).min(buf.len());
            buf[..n].copy_from_slice(&values[..n]);
            true
        }
        _ => false,
    }
}

fn filled_values<'s>(
    bufs: &'s [Option<&mut [u32]>; MAX_ECHO_CHANNELS],
    filled: &[bool; MAX_ECHO_CHANNELS],
    channel: usize,
    num_measurements: usize,
) -> Option<&'s [u32]> {
    if !filled.get(channel).copied().unwrap_or(false) {
        return None;
    }
    bufs[channel]
        .as_deref()
        .map(|b| &b[..num_measurements.min(b.len())])
}

/// One reassembled scan before it is copied into a `MeasurementSet`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ScanValues {
    pub reported: usize,
    pub ranges: [Option<Vec<u32>>; MAX_ECHO_CHANNELS],
    pub reflectance: [Option<Vec<u32>>; MAX_ECHO_CHANNELS],
    pub start_angle: i32,
    pub angular_step: u32,
}
