/// Calculates the 8-bit XOR checksum trailing every CoLa-B telegram.
pub struct Checksum {
    current: u8,
}

impl Checksum {
    /// Creates a new `Checksum` instance, initialized to 0.
    #[inline]
    pub fn new() -> Checksum {
        Checksum { current: 0 }
    }

    /// Includes a slice of bytes in the checksum calculation.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        for d in data {
            self.current ^= d;
        }
    }

    /// Returns the calculated checksum value.
    #[inline]
    pub fn checksum(&self) -> u8 {
        self.current
    }
}

const CRC16_GEN_POL: u16 = 0x8005;

/// The CRC-16 used by the LMS 2xx telegram trailer.
///
/// Each step shifts the register, folds in the generator on carry, then XORs the current
/// byte together with the previous one.
pub struct Crc16 {
    current: u16,
    prev_byte: u8,
}

impl Crc16 {
    #[inline]
    pub fn new() -> Crc16 {
        Crc16 {
            current: 0,
            prev_byte: 0,
        }
    }

    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        for &d in data {
            if self.current & 0x8000 != 0 {
                self.current = ((self.current & 0x7fff) << 1) ^ CRC16_GEN_POL;
            } else {
                self.current <<= 1;
            }
            self.current ^= (d as u16) | ((self.prev_byte as u16) << 8);
            self.prev_byte = d;
        }
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_checksum() {
        let mut checksum = Checksum::new();
        checksum.push_slice(&[0x73, 0x52, 0x4e]);
        assert_eq!(checksum.checksum(), 0x73 ^ 0x52 ^ 0x4e);
    }

    #[test]
    fn crc16_is_split_invariant() {
        let data = [0x02, 0x00, 0x02, 0x00, 0x20, 0x42];
        let mut whole = Crc16::new();
        whole.push_slice(&data);

        let mut split = Crc16::new();
        split.push_slice(&data[..3]);
        split.push_slice(&data[3..]);
        assert_eq!(whole.checksum(), split.checksum());
    }

    #[test]
    fn crc16_detects_single_byte_change() {
        let mut a = Crc16::new();
        a.push_slice(&[0x02, 0x80, 0x03, 0x00, 0xA0, 0x00, 0x10]);
        let mut b = Crc16::new();
        b.push_slice(&[0x02, 0x80, 0x03, 0x00, 0xA0, 0x01, 0x10]);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn crc16_first_step() {
        // Empty register, no carry: result is just the first byte.
        let mut crc = Crc16::new();
        crc.push_slice(&[0x02]);
        assert_eq!(crc.checksum(), 0x0002);
        // Second step shifts and folds in the previous byte.
        crc.push_slice(&[0x00]);
        assert_eq!(crc.checksum(), (0x0002 << 1) ^ 0x0200);
    }
}
