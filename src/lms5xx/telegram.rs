//! Arguments of the LMS 5xx configuration telegrams and the `LMDscandata` layout.

use super::cmds::*;
use crate::base::{Error, Result};
use crate::types::{
    ReflectanceResolution, ScanDataFormat, ScanFrequency, ScanResolution, ScanValues,
    MAX_ECHO_CHANNELS,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::trace;
use std::io::{self, Cursor, Read};

/// Sequential big-endian reader over telegram arguments.
struct Fields<'a> {
    what: &'static str,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Fields<'a> {
    fn new(what: &'static str, args: &'a [u8]) -> Fields<'a> {
        Fields {
            what,
            cursor: Cursor::new(args),
        }
    }

    fn short(&self, e: io::Error) -> Error {
        Error::io(format!(
            "{} truncated at byte {}: {}",
            self.what,
            self.cursor.position(),
            e
        ))
    }

    fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|e| self.short(e))
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<BigEndian>().map_err(|e| self.short(e))
    }

    fn i16(&mut self) -> Result<i16> {
        self.cursor.read_i16::<BigEndian>().map_err(|e| self.short(e))
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<BigEndian>().map_err(|e| self.short(e))
    }

    fn i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<BigEndian>().map_err(|e| self.short(e))
    }

    fn f32(&mut self) -> Result<f32> {
        self.cursor.read_f32::<BigEndian>().map_err(|e| self.short(e))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0; n];
        self.cursor.read_exact(&mut out).map_err(|e| self.short(e))?;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }
}

/// Measurement area, frequency and resolution (`LMPscancfg`, `mLMPsetscancfg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanConfig {
    /// 1/100 Hz.
    pub frequency: u32,
    /// 1/10000 degree.
    pub resolution: u32,
    /// 1/10000 degree.
    pub start_angle: i32,
    pub stop_angle: i32,
}

impl ScanConfig {
    pub fn frequency(&self) -> ScanFrequency {
        ScanFrequency::from_centihertz(self.frequency)
    }

    pub fn resolution(&self) -> ScanResolution {
        ScanResolution::from_ten_thousandths(self.resolution)
    }

    /// `frequency u32, sectors i16 (1), resolution u32, start i32, stop i32`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut args = Vec::with_capacity(18);
        args.write_u32::<BigEndian>(self.frequency)?;
        args.write_i16::<BigEndian>(1)?;
        args.write_u32::<BigEndian>(self.resolution)?;
        args.write_i32::<BigEndian>(self.start_angle)?;
        args.write_i32::<BigEndian>(self.stop_angle)?;
        Ok(args)
    }

    /// Parses the sector layout shared by the read answer and the set answer.
    fn parse_fields(fields: &mut Fields<'_>) -> Result<ScanConfig> {
        let frequency = fields.u32()?;
        let sectors = fields.i16()?;
        if sectors < 1 {
            return Err(Error::io(format!("scan config reports {} sectors", sectors)));
        }
        Ok(ScanConfig {
            frequency,
            resolution: fields.u32()?,
            start_angle: fields.i32()?,
            stop_angle: fields.i32()?,
        })
    }

    /// Answer of `sRN LMPscancfg`.
    pub fn parse(args: &[u8]) -> Result<ScanConfig> {
        ScanConfig::parse_fields(&mut Fields::new("scan config", args))
    }

    /// Answer of `sMN mLMPsetscancfg`: a status code followed by the applied config.
    pub fn parse_set_answer(args: &[u8]) -> Result<(u8, ScanConfig)> {
        let mut fields = Fields::new("set scan config answer", args);
        let status = fields.u8()?;
        let config = ScanConfig::parse_fields(&mut fields)?;
        Ok((status, config))
    }
}

/// Output selection (`LMDscandatacfg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanDataConfig {
    pub channels: u16,
    pub remission: bool,
    pub remission_resolution: u8,
}

impl ScanDataConfig {
    /// Returns `None` for `ScanDataFormat::Unknown`.
    pub fn from_format(format: ScanDataFormat) -> Option<ScanDataConfig> {
        let channels = match format.pulse_count()? {
            1 => LMS5XX_CHANNELS_SINGLE_PULSE,
            _ => LMS5XX_CHANNELS_DOUBLE_PULSE,
        };
        let reflectance = format.reflectance();
        Some(ScanDataConfig {
            channels,
            remission: reflectance.is_some(),
            remission_resolution: match reflectance {
                Some(ReflectanceResolution::SixteenBit) => LMS5XX_REMISSION_16BIT,
                _ => LMS5XX_REMISSION_8BIT,
            },
        })
    }

    pub fn format(&self) -> ScanDataFormat {
        let pulses = match self.channels {
            LMS5XX_CHANNELS_SINGLE_PULSE => 1,
            LMS5XX_CHANNELS_DOUBLE_PULSE => 2,
            _ => return ScanDataFormat::Unknown,
        };
        let reflectance = match (self.remission, self.remission_resolution) {
            (false, _) => None,
            (true, LMS5XX_REMISSION_8BIT) => Some(ReflectanceResolution::EightBit),
            (true, LMS5XX_REMISSION_16BIT) => Some(ReflectanceResolution::SixteenBit),
            (true, _) => return ScanDataFormat::Unknown,
        };
        ScanDataFormat::from_parts(pulses, reflectance)
    }

    /// `channels u16, remission u8, resolution u8, unit u8, encoder u16, position u8,
    /// name u8, comment u8, time u8, interval u16`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut args = Vec::with_capacity(13);
        args.write_u16::<BigEndian>(self.channels)?;
        args.write_u8(self.remission as u8)?;
        args.write_u8(self.remission_resolution)?;
        args.write_u8(LMS5XX_REMISSION_UNIT_DIGITS)?;
        args.write_u16::<BigEndian>(0)?;
        args.write_u8(0)?;
        args.write_u8(0)?;
        args.write_u8(0)?;
        args.write_u8(0)?;
        args.write_u16::<BigEndian>(LMS5XX_OUTPUT_INTERVAL)?;
        Ok(args)
    }

    pub fn parse(args: &[u8]) -> Result<ScanDataConfig> {
        let mut fields = Fields::new("scan data config", args);
        Ok(ScanDataConfig {
            channels: fields.u16()?,
            remission: fields.u8()? != 0,
            remission_resolution: fields.u8()?,
        })
    }
}

/// Parses a single-byte answer such as `FREchoFilter` or `Run`.
pub(crate) fn parse_u8(what: &'static str, args: &[u8]) -> Result<u8> {
    Fields::new(what, args).u8()
}

/// Parses the leading status word of `STlms`.
pub(crate) fn parse_u16(what: &'static str, args: &[u8]) -> Result<u16> {
    Fields::new(what, args).u16()
}

/// What a scan data channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelContent {
    Distance(usize),
    Remission(usize),
    Other,
}

impl ChannelContent {
    fn parse(content: &[u8]) -> ChannelContent {
        let text = match std::str::from_utf8(content) {
            Ok(text) if text.len() == LMS5XX_CONTENT_LEN => text,
            _ => return ChannelContent::Other,
        };
        let (kind, index) = text.split_at(LMS5XX_CONTENT_LEN - 1);
        let index = match index.parse::<usize>() {
            Ok(i) if i >= 1 && i <= MAX_ECHO_CHANNELS => i - 1,
            _ => return ChannelContent::Other,
        };
        match kind {
            LMS5XX_CONTENT_DIST => ChannelContent::Distance(index),
            LMS5XX_CONTENT_RSSI => ChannelContent::Remission(index),
            _ => ChannelContent::Other,
        }
    }
}

/// One output channel of a scan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChannelData {
    pub content: ChannelContent,
    /// 1/10000 degree.
    pub start_angle: i32,
    /// 1/10000 degree.
    pub angular_step: u16,
    /// Distances in millimetres after scaling, remission in digits.
    pub values: Vec<u32>,
}

/// One decoded `LMDscandata` telegram.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScanData {
    pub device_status: u16,
    pub telegram_counter: u16,
    pub scan_counter: u16,
    /// 1/100 Hz.
    pub scan_frequency: u32,
    pub channels: Vec<ChannelData>,
}

impl ScanData {
    pub fn parse(args: &[u8]) -> Result<ScanData> {
        let mut fields = Fields::new("scan data", args);

        let _version = fields.u16()?;
        let _device_number = fields.u16()?;
        let _serial = fields.u32()?;
        let device_status = u16::from_be_bytes([fields.u8()?, fields.u8()?]);
        let telegram_counter = fields.u16()?;
        let scan_counter = fields.u16()?;
        let _time_since_start = fields.u32()?;
        let _time_of_transmission = fields.u32()?;
        // Input status, output status, reserved.
        fields.skip(6)?;
        let scan_frequency = fields.u32()?;
        let _measurement_frequency = fields.u32()?;

        let encoders = fields.u16()? as usize;
        fields.skip(encoders * 6)?;

        let mut channels = Vec::new();
        for wide in [true, false].iter() {
            let count = fields.u16()?;
            for _ in 0..count {
                channels.push(ScanData::parse_channel(&mut fields, *wide)?);
            }
        }

        trace!(
            "Scan {} (telegram {}): {} channels, status {:04X}",
            scan_counter,
            telegram_counter,
            channels.len(),
            device_status
        );
        Ok(ScanData {
            device_status,
            telegram_counter,
            scan_counter,
            scan_frequency,
            channels,
        })
    }

    fn parse_channel(fields: &mut Fields<'_>, wide: bool) -> Result<ChannelData> {
        let content = ChannelContent::parse(&fields.bytes(LMS5XX_CONTENT_LEN)?);
        let scale = fields.f32()?;
        let offset = fields.f32()?;
        let start_angle = fields.i32()?;
        let angular_step = fields.u16()?;
        let count = fields.u16()? as usize;

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = if wide { fields.u16()? } else { fields.u8()? as u16 };
            values.push(raw as u32);
        }
        if let ChannelContent::Distance(_) = content {
            for value in values.iter_mut() {
                *value = (*value as f32 * scale + offset).round().max(0.0) as u32;
            }
        }
        Ok(ChannelData {
            content,
            start_angle,
            angular_step,
            values,
        })
    }

    /// Arranges the channels by echo index.
    pub fn into_values(self) -> ScanValues {
        let mut scan = ScanValues::default();
        let mut first_distance = true;
        for channel in self.channels {
            match channel.content {
                ChannelContent::Distance(index) => {
                    if first_distance {
                        scan.reported = channel.values.len();
                        scan.start_angle = channel.start_angle;
                        scan.angular_step = channel.angular_step as u32;
                        first_distance = false;
                    }
                    scan.ranges[index] = Some(channel.values);
                }
                ChannelContent::Remission(index) => {
                    if first_distance {
                        scan.reported = scan.reported.max(channel.values.len());
                    }
                    scan.reflectance[index] = Some(channel.values);
                }
                ChannelContent::Other => {}
            }
        }
        scan
    }
}
