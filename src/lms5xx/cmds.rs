// Framing

/// Every CoLa-B telegram starts with four of these.
pub const LMS5XX_STX: u8 = 0x02;
pub const LMS5XX_STX_COUNT: usize = 4;

/// Start sequence + big-endian payload length.
pub const LMS5XX_HEADER_LEN: usize = 8;

/// XOR checksum over the payload.
pub const LMS5XX_TRAILER_LEN: usize = 1;

/// Largest payload accepted in either direction.
pub const LMS5XX_MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// Separates method, name and arguments inside the payload.
pub const LMS5XX_SEPARATOR: u8 = b' ';

// Command names

pub const LMS5XX_SET_ACCESS_MODE: &str = "SetAccessMode";
pub const LMS5XX_SCAN_CONFIG: &str = "LMPscancfg";
pub const LMS5XX_SET_SCAN_CONFIG: &str = "mLMPsetscancfg";
pub const LMS5XX_ECHO_FILTER: &str = "FREchoFilter";
pub const LMS5XX_SCAN_DATA_CONFIG: &str = "LMDscandatacfg";
pub const LMS5XX_START_MEASUREMENT: &str = "LMCstartmeas";
pub const LMS5XX_STOP_MEASUREMENT: &str = "LMCstopmeas";
pub const LMS5XX_RUN: &str = "Run";
pub const LMS5XX_SCAN_DATA: &str = "LMDscandata";
pub const LMS5XX_DEVICE_STATUS: &str = "STlms";

// Login

/// User level allowed to change the measurement configuration.
pub const LMS5XX_AUTHORIZED_CLIENT: u8 = 0x03;

/// Factory password of the authorized client level.
pub const LMS5XX_AUTHORIZED_CLIENT_PASSWORD: u32 = 0xF472_4744;

// Reply codes

/// `SetAccessMode` and `Run` answer with 1 on success.
pub const LMS5XX_METHOD_SUCCESS: u8 = 0x01;

/// `mLMPsetscancfg` and `LMCstartmeas` answer with 0 on success.
pub const LMS5XX_NO_ERROR: u8 = 0x00;

/// Arguments of `sEN LMDscandata`.
pub const LMS5XX_EVENT_START: u8 = 0x01;
pub const LMS5XX_EVENT_STOP: u8 = 0x00;

// Scan data configuration

/// Output channel bits: first pulse only, or first and second pulse.
pub const LMS5XX_CHANNELS_SINGLE_PULSE: u16 = 0x0001;
pub const LMS5XX_CHANNELS_DOUBLE_PULSE: u16 = 0x0003;

/// Remission resolution selector.
pub const LMS5XX_REMISSION_8BIT: u8 = 0x00;
pub const LMS5XX_REMISSION_16BIT: u8 = 0x01;

/// Remission values in digits.
pub const LMS5XX_REMISSION_UNIT_DIGITS: u8 = 0x01;

/// Send every scan.
pub const LMS5XX_OUTPUT_INTERVAL: u16 = 1;

/// Channel content prefixes in scan data.
pub const LMS5XX_CONTENT_DIST: &str = "DIST";
pub const LMS5XX_CONTENT_RSSI: &str = "RSSI";
pub const LMS5XX_CONTENT_LEN: usize = 5;

/// Returns a description of a `mLMPsetscancfg` status code.
pub fn scan_config_error(code: u8) -> &'static str {
    match code {
        1 => "frequency not supported",
        2 => "resolution not supported",
        3 => "frequency and resolution combination not supported",
        4 => "scan area not supported",
        _ => "unspecified error",
    }
}
