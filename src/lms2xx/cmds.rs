// Framing

/// Start of every telegram.
pub const LMS2XX_STX: u8 = 0x02;

/// Single byte the device sends when it accepts a request.
pub const LMS2XX_ACK: u8 = 0x06;

/// Single byte the device sends when it rejects a request.
pub const LMS2XX_NACK: u8 = 0x15;

/// Address used by the host (broadcast).
pub const LMS2XX_HOST_ADDRESS: u8 = 0x00;

/// Address the device answers from.
pub const LMS2XX_DEVICE_ADDRESS: u8 = 0x80;

/// Largest value of the length field (command byte + data) in an 812-byte telegram.
pub const LMS2XX_MAX_PAYLOAD_LEN: usize = 806;

/// STX + address + length field.
pub const LMS2XX_HEADER_LEN: usize = 4;

/// CRC trailer.
pub const LMS2XX_TRAILER_LEN: usize = 2;

/// Replies carry the request code with the high bit set.
pub const LMS2XX_REPLY_FLAG: u8 = 0x80;

// Requests

/// Switch operating mode. Data: one mode byte.
pub const LMS2XX_CMD_SWITCH_MODE: u8 = 0x20;

/// Request measured values. Data: 0x01 (all values of one scan).
pub const LMS2XX_CMD_REQUEST_MEASURED_VALUES: u8 = 0x30;

/// Request status.
pub const LMS2XX_CMD_REQUEST_STATUS: u8 = 0x31;

/// Request mean values. Data: averaging count.
pub const LMS2XX_CMD_REQUEST_MEAN_VALUES: u8 = 0x36;

/// Request device type string.
pub const LMS2XX_CMD_REQUEST_TYPE: u8 = 0x3A;

/// Switch variant (scan angle and angular resolution).
pub const LMS2XX_CMD_SWITCH_VARIANT: u8 = 0x3B;

/// Data selector for `LMS2XX_CMD_REQUEST_MEASURED_VALUES`.
pub const LMS2XX_MEASURED_VALUES_ALL: u8 = 0x01;

/// Line rate the device uses after power-up.
pub const LMS2XX_POWER_ON_BAUD: u32 = 9600;

// Operating modes used to change the session baud rate
pub const LMS2XX_MODE_BAUD_38400: u8 = 0x40;
pub const LMS2XX_MODE_BAUD_19200: u8 = 0x41;
pub const LMS2XX_MODE_BAUD_9600: u8 = 0x42;
pub const LMS2XX_MODE_BAUD_500000: u8 = 0x48;

/// Switch mode reply status meaning "accepted".
pub const LMS2XX_SWITCH_MODE_OK: u8 = 0x00;

/// Switch variant reply status meaning "accepted".
pub const LMS2XX_SWITCH_VARIANT_OK: u8 = 0x01;

// Measured value layout

/// Bits 0-9 of the count word hold the number of values in this frame.
pub const LMS2XX_COUNT_MASK: u16 = 0x03FF;

/// Bits 11-12 of the count word hold the fragment index.
pub const LMS2XX_FRAGMENT_SHIFT: u16 = 11;
pub const LMS2XX_FRAGMENT_MASK: u16 = 0x3;

/// Bit 13 of the count word is set while more fragments of the scan follow.
pub const LMS2XX_MORE_FRAGMENTS: u16 = 1 << 13;

/// Low 13 bits of each value word carry the range.
pub const LMS2XX_RANGE_MASK: u16 = 0x1FFF;

/// Bytes of a measured value: one little-endian word.
pub const LMS2XX_VALUE_SIZE: usize = 2;

/// Returns the reply code paired with a request code.
#[inline]
pub fn reply_code(cmd: u8) -> u8 {
    cmd | LMS2XX_REPLY_FLAG
}
