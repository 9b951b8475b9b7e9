use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::constants::*;

/// One decoded 40-byte line record, one fifth of a sample.
///
/// The asic and half bytes are magic markers on the wire; anything that does
/// not match a marker decodes to [INVALID_ID] and the line will simply never
/// form part of a completed group.
#[derive(Debug, Clone)]
pub struct Line {
    pub device: u8,
    pub asic: u8,
    pub half: u8,
    pub line_number: u8,
    pub timestamp: u32,
    pub words: [u32; WORDS_PER_LINE],
}

fn decode_asic(asic_byte: u8) -> u8 {
    match asic_byte {
        ASIC_0_MARKER => 0,
        ASIC_1_MARKER => 1,
        _ => INVALID_ID,
    }
}

fn decode_half(half_byte: u8) -> u8 {
    match half_byte {
        HALF_0_MARKER => 0,
        HALF_1_MARKER => 1,
        _ => INVALID_ID,
    }
}

impl Line {
    /// Decode one line record from a 40-byte slice.
    ///
    /// Never fails; malformed identifier bytes map to [INVALID_ID]. The
    /// timestamp is big-endian, the payload words little-endian.
    pub fn decode(buffer: &[u8]) -> Self {
        let mut words = [0u32; WORDS_PER_LINE];
        for (idx, word) in words.iter_mut().enumerate() {
            *word = LittleEndian::read_u32(&buffer[8 + idx * 4..12 + idx * 4]);
        }
        Self {
            asic: decode_asic(buffer[0]),
            device: buffer[1],
            half: decode_half(buffer[2]),
            line_number: buffer[3],
            timestamp: BigEndian::read_u32(&buffer[4..8]),
            words,
        }
    }

    /// An idle line carries no data and a zero timestamp
    pub fn is_idle(&self) -> bool {
        self.timestamp == 0
    }

    pub fn is_valid(&self) -> bool {
        self.asic != INVALID_ID && self.half != INVALID_ID && (self.line_number as usize) < LINES_PER_SAMPLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_line(asic: u8, device: u8, half: u8, number: u8, timestamp: u32) -> [u8; LINE_SIZE] {
        let mut buf = [0u8; LINE_SIZE];
        buf[0] = asic;
        buf[1] = device;
        buf[2] = half;
        buf[3] = number;
        BigEndian::write_u32(&mut buf[4..8], timestamp);
        for word in 0..WORDS_PER_LINE {
            LittleEndian::write_u32(&mut buf[8 + word * 4..12 + word * 4], 0x1000 + word as u32);
        }
        buf
    }

    #[test]
    fn test_decode_line() {
        let buf = raw_line(ASIC_1_MARKER, 2, HALF_0_MARKER, 3, 0xDEADBEEF);
        let line = Line::decode(&buf);
        assert_eq!(line.asic, 1);
        assert_eq!(line.device, 2);
        assert_eq!(line.half, 0);
        assert_eq!(line.line_number, 3);
        assert_eq!(line.timestamp, 0xDEADBEEF);
        assert_eq!(line.words[0], 0x1000);
        assert_eq!(line.words[7], 0x1007);
        assert!(line.is_valid());
        assert!(!line.is_idle());
    }

    #[test]
    fn test_invalid_markers_map_to_sentinel() {
        let buf = raw_line(0x00, 0, 0x00, 0, 100);
        let line = Line::decode(&buf);
        assert_eq!(line.asic, INVALID_ID);
        assert_eq!(line.half, INVALID_ID);
        assert!(!line.is_valid());
    }

    #[test]
    fn test_idle_line() {
        let buf = raw_line(ASIC_0_MARKER, 0, HALF_1_MARKER, 0, 0);
        assert!(Line::decode(&buf).is_idle());
    }
}
