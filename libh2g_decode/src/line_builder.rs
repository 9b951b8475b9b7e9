use std::collections::VecDeque;
use std::sync::Arc;

use fxhash::FxHashMap;
use spdlog::Logger;

use super::constants::*;
use super::error::LineAssemblerError;
use super::line::Line;
use super::sample::Sample;

/// Identity of one line group: every line of a sample shares these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub device: u8,
    pub asic: u8,
    pub half: u8,
    pub timestamp: u32,
}

/// Up to five lines awaiting completion under one key.
///
/// A slot is written at most once; a repeat write is a protocol error.
#[derive(Debug)]
pub struct LineGroup {
    pub key: GroupKey,
    pub slots: [Option<Line>; LINES_PER_SAMPLE],
    found: u8,
}

impl LineGroup {
    fn new(key: GroupKey) -> Self {
        Self {
            key,
            slots: Default::default(),
            found: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.found as usize == LINES_PER_SAMPLE
    }
}

/// LineAssembler parses frames into lines and reassembles them into samples.
///
/// In-progress groups live in a map keyed by (device, asic, half, timestamp),
/// with an insertion-age queue bounding memory: groups that never complete are
/// evicted oldest-first once more than `max_open_groups` are open. Completed
/// groups are drained into per-device sample queues by [Self::process_complete].
pub struct LineAssembler {
    num_devices: usize,
    max_open_groups: usize,
    truncate_adc: bool,
    in_progress: FxHashMap<GroupKey, LineGroup>,
    age: VecDeque<GroupKey>,
    complete: Vec<LineGroup>,
    samples: Vec<VecDeque<Sample>>,
    groups_completed: u64,
    groups_aborted: u64,
    bit_slips: u64,
    /// Valid lines seen, indexed by device * 4 + asic * 2 + half. A raw
    /// link-health measure: lines count whether or not their group completes.
    lines_seen: Vec<u64>,
    /// Groups drained into samples, same quadrant indexing as `lines_seen`
    completed_per_quadrant: Vec<u64>,
    /// Groups evicted or dropped, counted only where the quadrant is known
    aborted_per_quadrant: Vec<u64>,
    logger: Arc<Logger>,
}

impl LineAssembler {
    pub fn new(
        num_devices: usize,
        max_open_groups: usize,
        truncate_adc: bool,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            num_devices,
            max_open_groups,
            truncate_adc,
            in_progress: FxHashMap::default(),
            age: VecDeque::new(),
            complete: Vec::new(),
            samples: (0..num_devices).map(|_| VecDeque::new()).collect(),
            groups_completed: 0,
            groups_aborted: 0,
            bit_slips: 0,
            lines_seen: vec![0; num_devices * QUADRANTS_PER_DEVICE],
            completed_per_quadrant: vec![0; num_devices * QUADRANTS_PER_DEVICE],
            aborted_per_quadrant: vec![0; num_devices * QUADRANTS_PER_DEVICE],
            logger,
        }
    }

    fn quadrant_index(&self, key: &GroupKey) -> Option<usize> {
        if key.asic < 2 && key.half < 2 && (key.device as usize) < self.num_devices {
            Some(
                key.device as usize * QUADRANTS_PER_DEVICE
                    + key.asic as usize * 2
                    + key.half as usize,
            )
        } else {
            None
        }
    }

    /// Parse one frame and fold its lines into the in-progress groups.
    ///
    /// A duplicate line (same key, same slot, slot already filled) indicates
    /// non-recoverable stream corruption and aborts processing of this frame;
    /// the run continues with the next frame.
    pub fn process_frame(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), LineAssemblerError> {
        for slot in 0..LINES_PER_FRAME {
            let start = FRAME_HEADER_SIZE + slot * LINE_SIZE;
            let line = Line::decode(&frame[start..start + LINE_SIZE]);
            if line.is_idle() {
                continue;
            }
            if (line.device as usize) < self.num_devices && line.asic < 2 && line.half < 2 {
                let quadrant = line.asic as usize * 2 + line.half as usize;
                self.lines_seen[line.device as usize * QUADRANTS_PER_DEVICE + quadrant] += 1;
            }
            if (line.line_number as usize) >= LINES_PER_SAMPLE {
                spdlog::warn!(
                    logger: self.logger,
                    "Dropping line with out of range index {} for device {}",
                    line.line_number,
                    line.device
                );
                continue;
            }
            self.insert_line(line)?;
        }
        Ok(())
    }

    fn insert_line(&mut self, line: Line) -> Result<(), LineAssemblerError> {
        let key = GroupKey {
            device: line.device,
            asic: line.asic,
            half: line.half,
            timestamp: line.timestamp,
        };
        let number = line.line_number as usize;
        let Some(group) = self.in_progress.get_mut(&key) else {
            let mut group = LineGroup::new(key);
            group.slots[number] = Some(line);
            group.found = 1;
            self.in_progress.insert(key, group);
            self.age.push_back(key);
            // Bound memory against groups that will never complete
            while self.in_progress.len() > self.max_open_groups {
                self.evict_oldest();
            }
            return Ok(());
        };
        if group.slots[number].is_some() {
            return Err(LineAssemblerError::DuplicateLine {
                device: key.device,
                asic: key.asic,
                half: key.half,
                line_number: line.line_number,
                timestamp: key.timestamp,
            });
        }
        group.slots[number] = Some(line);
        group.found += 1;
        if group.is_complete() {
            let group = self
                .in_progress
                .remove(&key)
                .expect("group present; just matched");
            self.complete.push(group);
        }
        Ok(())
    }

    fn evict_oldest(&mut self) {
        while let Some(key) = self.age.pop_front() {
            // Keys whose group already completed are stale in the age queue
            if self.in_progress.remove(&key).is_some() {
                self.groups_aborted += 1;
                if let Some(quadrant) = self.quadrant_index(&key) {
                    self.aborted_per_quadrant[quadrant] += 1;
                }
                spdlog::debug!(
                    logger: self.logger,
                    "Evicting incomplete line group for device {} at timestamp {}",
                    key.device,
                    key.timestamp
                );
                return;
            }
        }
    }

    /// Drain completed groups into their device's sample queue.
    pub fn process_complete(&mut self) {
        for group in std::mem::take(&mut self.complete) {
            let Some(quadrant) = self.quadrant_index(&group.key) else {
                spdlog::warn!(
                    logger: self.logger,
                    "Dropping completed group with invalid identity: device {} asic {} half {}",
                    group.key.device,
                    group.key.asic,
                    group.key.half
                );
                self.groups_aborted += 1;
                continue;
            };
            let Some(sample) = Sample::from_group(&group, self.truncate_adc) else {
                spdlog::error!(
                    logger: self.logger,
                    "Completed group for device {} at timestamp {} is missing a line",
                    group.key.device,
                    group.key.timestamp
                );
                self.groups_aborted += 1;
                self.aborted_per_quadrant[quadrant] += 1;
                continue;
            };
            if sample.slipped_nibbles > 0 {
                self.bit_slips += sample.slipped_nibbles as u64;
                spdlog::trace!(
                    logger: self.logger,
                    "Sample for device {} at timestamp {} has {} slipped framing nibbles",
                    sample.device,
                    sample.timestamp,
                    sample.slipped_nibbles
                );
            }
            self.groups_completed += 1;
            self.completed_per_quadrant[quadrant] += 1;
            self.samples[group.key.device as usize].push_back(sample);
        }
    }

    /// The pending sample queue for one device, consumed by its waveform builder
    pub fn samples_mut(&mut self, device: usize) -> &mut VecDeque<Sample> {
        &mut self.samples[device]
    }

    pub fn groups_completed(&self) -> u64 {
        self.groups_completed
    }

    /// Aborted count includes groups still open; they will never complete once
    /// the run is over.
    pub fn groups_aborted(&self) -> u64 {
        self.groups_aborted + self.in_progress.len() as u64
    }

    pub fn bit_slips(&self) -> u64 {
        self.bit_slips
    }

    pub fn lines_seen(&self, device: usize, asic: usize, half: usize) -> u64 {
        self.lines_seen[device * QUADRANTS_PER_DEVICE + asic * 2 + half]
    }

    pub fn completed_in(&self, device: usize, asic: usize, half: usize) -> u64 {
        self.completed_per_quadrant[device * QUADRANTS_PER_DEVICE + asic * 2 + half]
    }

    pub fn aborted_in(&self, device: usize, asic: usize, half: usize) -> u64 {
        self.aborted_per_quadrant[device * QUADRANTS_PER_DEVICE + asic * 2 + half]
    }

    pub fn open_groups(&self) -> usize {
        self.in_progress.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    fn quiet_logger() -> Arc<Logger> {
        Arc::new(Logger::builder().build().unwrap())
    }

    pub(crate) fn write_line(
        frame: &mut [u8; FRAME_SIZE],
        slot: usize,
        device: u8,
        asic: u8,
        half: u8,
        number: u8,
        timestamp: u32,
        words: [u32; WORDS_PER_LINE],
    ) {
        let start = FRAME_HEADER_SIZE + slot * LINE_SIZE;
        let buf = &mut frame[start..start + LINE_SIZE];
        buf[0] = if asic == 0 { ASIC_0_MARKER } else { ASIC_1_MARKER };
        buf[1] = device;
        buf[2] = if half == 0 { HALF_0_MARKER } else { HALF_1_MARKER };
        buf[3] = number;
        BigEndian::write_u32(&mut buf[4..8], timestamp);
        for (idx, word) in words.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[8 + idx * 4..12 + idx * 4], *word);
        }
    }

    /// A header word with good framing nibbles and the given counters
    pub(crate) fn header_word(bunch: u32, event: u32, orbit: u32) -> u32 {
        (ALIGNMENT_MARKER << 28)
            | ((bunch & 0xFFF) << 16)
            | ((event & 0x3F) << 10)
            | ((orbit & 0x7) << 7)
            | ALIGNMENT_MARKER
    }

    /// A channel word carrying the given ADC/TOT/TOA triple
    pub(crate) fn channel_word(adc: u32, tot: u32, toa: u32) -> u32 {
        ((adc & 0x3FF) << 20) | ((tot & 0x3FF) << 10) | (toa & 0x3FF)
    }

    /// Build a frame holding the full five lines of one sample
    pub(crate) fn sample_frame(device: u8, asic: u8, half: u8, timestamp: u32, event: u32) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        for number in 0..LINES_PER_SAMPLE as u8 {
            let mut words = [channel_word(100 + number as u32, 7, 3); WORDS_PER_LINE];
            if number == 0 {
                words[0] = header_word(9, event, 2);
            }
            write_line(&mut frame, number as usize, device, asic, half, number, timestamp, words);
        }
        frame
    }

    #[test]
    fn test_complete_group_yields_sample() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        let frame = sample_frame(0, 0, 0, 1000, 17);
        assembler.process_frame(&frame).unwrap();
        assembler.process_complete();
        assert_eq!(assembler.groups_completed(), 1);
        let sample = assembler.samples_mut(0).pop_front().unwrap();
        assert_eq!(sample.timestamp, 1000);
        assert_eq!(sample.event_counter, 17);
        assert_eq!(sample.bunch_counter, 9);
        assert_eq!(sample.orbit_counter, 2);
        assert_eq!(sample.slipped_nibbles, 0);
        // Channels from line 0 skip the two reserved header words
        assert_eq!(sample.adc[0], 100);
        assert_eq!(sample.adc[35], 104);
        assert_eq!(sample.toa[0], 3);
    }

    #[test]
    fn test_lines_accumulate_under_one_key() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        let mut frame = [0u8; FRAME_SIZE];
        let words = [channel_word(1, 2, 3); WORDS_PER_LINE];
        // Two different line numbers of the same sample, group stays open
        write_line(&mut frame, 0, 0, 1, 0, 0, 800, words);
        write_line(&mut frame, 1, 0, 1, 0, 3, 800, words);
        assembler.process_frame(&frame).unwrap();
        assert_eq!(assembler.open_groups(), 1);
        assembler.process_complete();
        assert_eq!(assembler.groups_completed(), 0);
    }

    #[test]
    fn test_per_quadrant_accounting() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        assembler.process_frame(&sample_frame(0, 1, 0, 900, 4)).unwrap();
        // A second group on another quadrant that never completes
        let mut frame = [0u8; FRAME_SIZE];
        write_line(&mut frame, 0, 0, 0, 1, 0, 901, [0u32; WORDS_PER_LINE]);
        assembler.process_frame(&frame).unwrap();
        assembler.process_complete();
        assert_eq!(assembler.completed_in(0, 1, 0), 1);
        assert_eq!(assembler.completed_in(0, 0, 1), 0);
        assert_eq!(assembler.aborted_in(0, 1, 0), 0);
    }

    #[test]
    fn test_duplicate_line_is_protocol_error() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        let mut frame = [0u8; FRAME_SIZE];
        let words = [channel_word(1, 2, 3); WORDS_PER_LINE];
        write_line(&mut frame, 0, 0, 0, 0, 2, 500, words);
        write_line(&mut frame, 1, 0, 0, 0, 2, 500, words);
        match assembler.process_frame(&frame) {
            Err(LineAssemblerError::DuplicateLine { line_number: 2, timestamp: 500, .. }) => (),
            other => panic!("expected duplicate line error, got {other:?}"),
        }
    }

    #[test]
    fn test_bounded_memory() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        // 120 groups that can never complete, 4 to a frame
        let mut inserted = 0u32;
        for _ in 0..30 {
            let mut frame = [0u8; FRAME_SIZE];
            for slot in 0..4 {
                inserted += 1;
                let words = [0u32; WORDS_PER_LINE];
                write_line(&mut frame, slot, 0, 0, 0, 0, 10_000 + inserted, words);
            }
            assembler.process_frame(&frame).unwrap();
            assert!(assembler.open_groups() <= DEFAULT_MAX_OPEN_GROUPS);
        }
        assembler.process_complete();
        assert_eq!(assembler.groups_completed(), 0);
        // Evictions plus the groups still open at end of run
        assert_eq!(
            assembler.groups_aborted(),
            inserted as u64 - DEFAULT_MAX_OPEN_GROUPS as u64 + assembler.open_groups() as u64
        );
        assert_eq!(assembler.open_groups(), DEFAULT_MAX_OPEN_GROUPS);
    }

    #[test]
    fn test_bit_slip_is_soft() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        let mut frame = [0u8; FRAME_SIZE];
        for number in 0..LINES_PER_SAMPLE as u8 {
            let mut words = [channel_word(5, 5, 5); WORDS_PER_LINE];
            if number == 0 {
                // Bad start nibble, good end nibble
                words[0] = header_word(0, 1, 0) & 0x0FFF_FFFF;
            }
            write_line(&mut frame, number as usize, 0, 0, 1, number, 77, words);
        }
        assembler.process_frame(&frame).unwrap();
        assembler.process_complete();
        assert_eq!(assembler.groups_completed(), 1);
        assert_eq!(assembler.bit_slips(), 1);
        let sample = assembler.samples_mut(0).pop_front().unwrap();
        assert_eq!(sample.slipped_nibbles, 1);
    }

    #[test]
    fn test_idle_lines_dropped() {
        let mut assembler = LineAssembler::new(1, DEFAULT_MAX_OPEN_GROUPS, false, quiet_logger());
        let frame = [0u8; FRAME_SIZE];
        assembler.process_frame(&frame).unwrap();
        assert_eq!(assembler.open_groups(), 0);
    }
}
