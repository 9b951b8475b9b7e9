use super::constants::*;
use super::line_builder::LineGroup;

/// One fully decoded timestep of 36 channels for one (device, asic, half).
#[derive(Debug, Clone)]
pub struct Sample {
    pub device: u8,
    pub asic: u8,
    pub half: u8,
    pub timestamp: u32,
    pub bunch_counter: u32,
    pub event_counter: u32,
    pub orbit_counter: u32,
    pub hamming_code: u32,
    pub common_mode: u32,
    pub calibration: u32,
    pub crc: u32,
    /// How many of the two framing nibbles missed the alignment marker (0-2).
    /// Purely diagnostic; a slipped sample is still usable.
    pub slipped_nibbles: u8,
    pub adc: [u32; CHANNELS_PER_SAMPLE],
    pub toa: [u32; CHANNELS_PER_SAMPLE],
    pub tot: [u32; CHANNELS_PER_SAMPLE],
}

/// Words of the 5x8 grid that carry header/calibration/CRC data rather than
/// channel triples: (line, word) pairs.
const RESERVED_WORDS: [(usize, usize); 4] = [(0, 0), (0, 1), (2, 4), (4, 7)];

/// TOT is a 12-bit counter sent as 10 bits. If the most significant bit is
/// set the lower bits were dropped and the value is shifted back up.
pub fn decode_tot(raw: u32) -> u32 {
    if raw & 0x200 != 0 {
        (raw & 0x1FF) << 3
    } else {
        raw
    }
}

impl Sample {
    /// Decode a complete line group into a sample.
    ///
    /// Returns None if any line slot is missing; the caller decides whether
    /// that is worth logging. Framing-nibble mismatches are recorded in
    /// `slipped_nibbles`, never fatal.
    pub fn from_group(group: &LineGroup, truncate_adc: bool) -> Option<Self> {
        let mut lines: [Option<&super::line::Line>; LINES_PER_SAMPLE] = [None; LINES_PER_SAMPLE];
        for (idx, slot) in group.slots.iter().enumerate() {
            lines[idx] = slot.as_ref();
        }
        if lines.iter().any(|l| l.is_none()) {
            return None;
        }
        let lines = lines.map(|l| l.unwrap());

        // Case-4 data format from the datasheet:
        // [start][12b bunch][6b event][3b orbit][3b hamming][4b end]
        let header = lines[0].words[0];
        let mut slipped = 0;
        if header >> 28 != ALIGNMENT_MARKER {
            slipped += 1;
        }
        if header & 0b1111 != ALIGNMENT_MARKER {
            slipped += 1;
        }

        let mut sample = Self {
            device: group.key.device,
            asic: group.key.asic,
            half: group.key.half,
            timestamp: group.key.timestamp,
            bunch_counter: (header >> 16) & 0xFFF,
            event_counter: (header >> 10) & 0x3F,
            orbit_counter: (header >> 7) & 0x7,
            hamming_code: (header >> 4) & 0x7,
            common_mode: lines[0].words[1],
            calibration: lines[2].words[4],
            crc: lines[4].words[7],
            slipped_nibbles: slipped,
            adc: [0; CHANNELS_PER_SAMPLE],
            toa: [0; CHANNELS_PER_SAMPLE],
            tot: [0; CHANNELS_PER_SAMPLE],
        };

        // [Tc][Tp][10b ADC][10b TOT][10b TOA]
        let mut channel = 0;
        for line in 0..LINES_PER_SAMPLE {
            for word in 0..WORDS_PER_LINE {
                if RESERVED_WORDS.contains(&(line, word)) {
                    continue;
                }
                let raw = lines[line].words[word];
                let mut adc = (raw >> 20) & 0x3FF;
                if truncate_adc {
                    adc &= 0b1111111100;
                }
                sample.adc[channel] = adc;
                sample.tot[channel] = decode_tot((raw >> 10) & 0x3FF);
                sample.toa[channel] = raw & 0x3FF;
                channel += 1;
            }
        }
        debug_assert_eq!(channel, CHANNELS_PER_SAMPLE);
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tot_passthrough() {
        // Bit 9 clear: raw 10-bit value unchanged
        assert_eq!(decode_tot(0), 0);
        assert_eq!(decode_tot(0x1FF), 0x1FF);
        assert_eq!(decode_tot(0x123), 0x123);
    }

    #[test]
    fn test_tot_decompression() {
        // Bit 9 set: lower 9 bits shifted up by 3
        assert_eq!(decode_tot(0x200), 0);
        assert_eq!(decode_tot(0x200 | 0x5), 0x5 << 3);
        assert_eq!(decode_tot(0x3FF), 0x1FF << 3);
    }
}
