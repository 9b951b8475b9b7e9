use std::collections::VecDeque;
use std::sync::Arc;

use ndarray::Array2;
use spdlog::Logger;

use super::constants::*;
use super::counters::CounterUnwrapper;
use super::sample::Sample;

/// Per-timestamp bookkeeping of one window slot.
#[derive(Debug, Clone, Default, PartialEq)]
struct SlotHeader {
    timestamp: u32,
    bunch_counter: u32,
    event_counter: u32,
    orbit_counter: u32,
    hamming_code: u32,
    /// Bitmask of quadrants (2 * asic + half) written into this slot
    quadrants: u8,
}

/// A device's reconstructed multi-channel waveform window.
///
/// Slots cover `num_samples` consecutive timestamps; each slot needs all four
/// (asic, half) quadrants before the window is complete. Waveform storage is
/// channel-major: row = global device channel, column = slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    device: u8,
    num_samples: usize,
    slots: VecDeque<SlotHeader>,
    added: usize,
    adc: Array2<u32>,
    toa: Array2<u32>,
    tot: Array2<u32>,
    /// Monotonic keys assigned when the window is promoted to complete
    pub unwrapped_timestamp: i64,
    pub unwrapped_event_number: i64,
}

/// Where a sample landed relative to one window.
#[derive(Debug, Clone, Copy, PartialEq)]
enum InsertOutcome {
    /// Written into this window
    Inserted,
    /// Belongs to this window eventually, but not adjacent yet; retry later
    Defer,
    /// Would shift the window past its capacity; stop searching
    Overflow,
    /// Not related to this window
    NoMatch,
}

fn quadrant_offset(sample: &Sample) -> usize {
    2 * CHANNELS_PER_SAMPLE * sample.asic as usize + CHANNELS_PER_SAMPLE * sample.half as usize
}

impl DeviceEvent {
    fn new(device: u8, num_samples: usize, seed: &Sample) -> Self {
        let mut event = Self {
            device,
            num_samples,
            slots: VecDeque::with_capacity(num_samples),
            added: 0,
            adc: Array2::zeros((CHANNELS_PER_DEVICE, num_samples)),
            toa: Array2::zeros((CHANNELS_PER_DEVICE, num_samples)),
            tot: Array2::zeros((CHANNELS_PER_DEVICE, num_samples)),
            unwrapped_timestamp: 0,
            unwrapped_event_number: 0,
        };
        event.slots.push_back(SlotHeader {
            timestamp: seed.timestamp,
            ..Default::default()
        });
        event.write_quadrant(0, seed);
        event
    }

    /// Write a sample's 36 channels into its quadrant of one slot. Headers are
    /// adopted only from the canonical quadrant (asic 0, half 0). A repeat
    /// write of the same quadrant overwrites but does not double-count.
    fn write_quadrant(&mut self, slot: usize, sample: &Sample) {
        let offset = quadrant_offset(sample);
        for channel in 0..CHANNELS_PER_SAMPLE {
            self.adc[[offset + channel, slot]] = sample.adc[channel];
            self.toa[[offset + channel, slot]] = sample.toa[channel];
            self.tot[[offset + channel, slot]] = sample.tot[channel];
        }
        if sample.asic == 0 && sample.half == 0 {
            let header = &mut self.slots[slot];
            header.bunch_counter = sample.bunch_counter;
            header.event_counter = sample.event_counter;
            header.orbit_counter = sample.orbit_counter;
            header.hamming_code = sample.hamming_code;
        }
        let bit = 1u8 << (2 * sample.asic + sample.half);
        let header = &mut self.slots[slot];
        if header.quadrants & bit == 0 {
            header.quadrants |= bit;
            self.added += 1;
        }
    }

    /// Shift every slot `shift_by` positions later, interpolating placeholder
    /// slots behind the new head so a same-timestamp sample can still find
    /// them, then seed slot 0 from the sample.
    fn prepend(&mut self, shift_by: usize, sample: &Sample, tick_period: u32) {
        let old_len = self.slots.len();
        for channel in 0..CHANNELS_PER_DEVICE {
            for slot in (0..old_len).rev() {
                self.adc[[channel, slot + shift_by]] = self.adc[[channel, slot]];
                self.toa[[channel, slot + shift_by]] = self.toa[[channel, slot]];
                self.tot[[channel, slot + shift_by]] = self.tot[[channel, slot]];
            }
            for slot in 0..shift_by {
                self.adc[[channel, slot]] = 0;
                self.toa[[channel, slot]] = 0;
                self.tot[[channel, slot]] = 0;
            }
        }
        for hole in (1..shift_by).rev() {
            self.slots.push_front(SlotHeader {
                timestamp: sample.timestamp + hole as u32 * tick_period,
                ..Default::default()
            });
        }
        self.slots.push_front(SlotHeader {
            timestamp: sample.timestamp,
            ..Default::default()
        });
        self.write_quadrant(0, sample);
    }

    fn try_insert(&mut self, sample: &Sample, tick_period: u32, jitter: u32) -> InsertOutcome {
        // Same slot, allowing for some timestamp jitter
        for slot in 0..self.slots.len() {
            if self.slots[slot].timestamp.abs_diff(sample.timestamp) <= jitter {
                self.write_quadrant(slot, sample);
                return InsertOutcome::Inserted;
            }
        }

        let first = self.slots.front().expect("window never empty").timestamp;
        let last = self.slots.back().expect("window never empty").timestamp;
        let capacity_left = (self.num_samples - self.slots.len()) as u32;

        // Before the start of the window
        if sample.timestamp < first
            && first - sample.timestamp <= tick_period * capacity_left
        {
            let shift_by = ((first - sample.timestamp + tick_period / 2) / tick_period) as usize;
            if shift_by == 0 {
                return InsertOutcome::NoMatch;
            }
            if self.slots.len() + shift_by > self.num_samples {
                return InsertOutcome::Overflow;
            }
            self.prepend(shift_by, sample, tick_period);
            return InsertOutcome::Inserted;
        }

        if sample.timestamp > last {
            let gap = sample.timestamp - last;
            // The next slot of the window
            if gap <= tick_period && self.slots.len() < self.num_samples {
                self.slots.push_back(SlotHeader {
                    timestamp: sample.timestamp,
                    ..Default::default()
                });
                self.write_quadrant(self.slots.len() - 1, sample);
                return InsertOutcome::Inserted;
            }
            // Further out, but still inside the window's eventual span
            if gap <= tick_period * capacity_left {
                return InsertOutcome::Defer;
            }
        }
        InsertOutcome::NoMatch
    }

    pub fn is_complete(&self) -> bool {
        self.added == self.num_samples * QUADRANTS_PER_DEVICE
    }

    /// Event counters of consecutive slots must step by exactly +1 mod 64.
    pub fn is_ordered(&self) -> bool {
        for pair in self.slots.iter().zip(self.slots.iter().skip(1)) {
            if pair.1.event_counter != (pair.0.event_counter + 1) % EVENT_COUNTER_MODULUS as u32 {
                return false;
            }
        }
        true
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Raw hardware timestamp of the first slot (wrapping, 30 bits)
    pub fn raw_timestamp(&self) -> u32 {
        self.slots.front().map(|s| s.timestamp).unwrap_or(0)
    }

    /// Raw event counter of the first slot (wrapping, 6 bits)
    pub fn raw_event_counter(&self) -> u32 {
        self.slots.front().map(|s| s.event_counter).unwrap_or(0)
    }

    pub fn adc(&self, channel: usize, slot: usize) -> u32 {
        self.adc[[channel, slot]]
    }

    pub fn toa(&self, channel: usize, slot: usize) -> u32 {
        self.toa[[channel, slot]]
    }

    pub fn tot(&self, channel: usize, slot: usize) -> u32 {
        self.tot[[channel, slot]]
    }
}

#[cfg(test)]
impl DeviceEvent {
    /// A minimal one-slot event with preset monotonic keys, for aligner tests
    pub(crate) fn synthetic(
        device: u8,
        unwrapped_event_number: i64,
        unwrapped_timestamp: i64,
    ) -> Self {
        let mut slots = VecDeque::new();
        slots.push_back(SlotHeader {
            timestamp: unwrapped_timestamp as u32,
            event_counter: unwrapped_event_number as u32 % EVENT_COUNTER_MODULUS as u32,
            ..Default::default()
        });
        Self {
            device,
            num_samples: 1,
            slots,
            added: QUADRANTS_PER_DEVICE,
            adc: Array2::zeros((CHANNELS_PER_DEVICE, 1)),
            toa: Array2::zeros((CHANNELS_PER_DEVICE, 1)),
            tot: Array2::zeros((CHANNELS_PER_DEVICE, 1)),
            unwrapped_timestamp,
            unwrapped_event_number,
        }
    }
}

/// WaveformBuilder assembles one device's samples into [DeviceEvent] windows.
///
/// Samples arrive out of strict order; windows are searched newest-first and a
/// sample either lands in an existing slot, extends the window at either end,
/// is deferred for a later pass, or opens a new window. The in-progress set is
/// capped, evicting the oldest window as lost.
pub struct WaveformBuilder {
    device: u8,
    num_samples: usize,
    tick_period: u32,
    jitter: u32,
    max_open_windows: usize,
    attempted: u64,
    completed: u64,
    aborted: u64,
    in_order: u64,
    in_progress: VecDeque<DeviceEvent>,
    complete: VecDeque<DeviceEvent>,
    unwrapper: CounterUnwrapper,
    logger: Arc<Logger>,
}

impl WaveformBuilder {
    pub fn new(
        device: u8,
        num_samples: usize,
        tick_period: u32,
        jitter: u32,
        max_open_windows: usize,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            device,
            num_samples,
            tick_period,
            jitter,
            max_open_windows,
            attempted: 0,
            completed: 0,
            aborted: 0,
            in_order: 0,
            in_progress: VecDeque::new(),
            complete: VecDeque::new(),
            unwrapper: CounterUnwrapper::new(),
            logger,
        }
    }

    /// Fold the pending samples into the in-progress windows.
    ///
    /// Deferred samples are requeued at the back and retried within the same
    /// pass; the pass ends once every remaining sample has deferred in
    /// succession, leaving them for the next call.
    pub fn build(&mut self, samples: &mut VecDeque<Sample>) {
        let mut defer_streak = 0;
        while defer_streak < samples.len() {
            let Some(sample) = samples.pop_front() else {
                break;
            };
            let mut outcome = InsertOutcome::NoMatch;
            let mut matched = None;
            for idx in (0..self.in_progress.len()).rev() {
                match self.in_progress[idx].try_insert(&sample, self.tick_period, self.jitter) {
                    InsertOutcome::NoMatch => continue,
                    result => {
                        matched = Some(idx);
                        outcome = result;
                        break;
                    }
                }
            }
            match outcome {
                InsertOutcome::Inserted => {
                    defer_streak = 0;
                    let idx = matched.expect("matched window index");
                    if self.in_progress[idx].is_complete() {
                        let window = self.in_progress.remove(idx).expect("index in range");
                        self.promote(window);
                    }
                }
                InsertOutcome::Defer => {
                    defer_streak += 1;
                    samples.push_back(sample);
                }
                InsertOutcome::NoMatch | InsertOutcome::Overflow => {
                    defer_streak = 0;
                    self.attempted += 1;
                    self.in_progress
                        .push_back(DeviceEvent::new(self.device, self.num_samples, &sample));
                }
            }
        }

        while self.in_progress.len() > self.max_open_windows {
            self.in_progress.pop_front();
            self.aborted += 1;
            spdlog::debug!(
                logger: self.logger,
                "Device {} window queue over capacity, evicting oldest",
                self.device
            );
        }
    }

    /// A complete window is promoted only if its event counters are in order;
    /// otherwise it is discarded rather than emitting corrupt data.
    fn promote(&mut self, mut window: DeviceEvent) {
        if !window.is_ordered() {
            self.aborted += 1;
            spdlog::debug!(
                logger: self.logger,
                "Device {} window at timestamp {} out of order, discarding",
                self.device,
                window.raw_timestamp()
            );
            return;
        }
        let (event_number, timestamp) = self
            .unwrapper
            .unwrap(window.raw_event_counter(), window.raw_timestamp());
        window.unwrapped_event_number = event_number;
        window.unwrapped_timestamp = timestamp;
        self.completed += 1;
        self.in_order += 1;
        self.complete.push_back(window);
    }

    /// Pop the next completed-and-unwrapped window, in promotion order
    pub fn pop_complete(&mut self) -> Option<DeviceEvent> {
        self.complete.pop_front()
    }

    pub fn num_attempted(&self) -> u64 {
        self.attempted
    }

    pub fn num_completed(&self) -> u64 {
        self.completed
    }

    /// Aborted count includes windows still open; they will never complete
    /// once the run is over.
    pub fn num_aborted(&self) -> u64 {
        self.aborted + self.in_progress.len() as u64
    }

    pub fn num_in_order(&self) -> u64 {
        self.in_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_logger() -> Arc<Logger> {
        Arc::new(Logger::builder().build().unwrap())
    }

    fn builder(num_samples: usize, cap: usize) -> WaveformBuilder {
        WaveformBuilder::new(
            0,
            num_samples,
            DEFAULT_TICK_PERIOD,
            DEFAULT_JITTER,
            cap,
            quiet_logger(),
        )
    }

    /// One quadrant's sample with recognizable channel values
    fn sample(asic: u8, half: u8, timestamp: u32, event_counter: u32) -> Sample {
        let mut adc = [0u32; CHANNELS_PER_SAMPLE];
        for (idx, value) in adc.iter_mut().enumerate() {
            *value = timestamp + 10 * asic as u32 + 5 * half as u32 + idx as u32;
        }
        Sample {
            device: 0,
            asic,
            half,
            timestamp,
            bunch_counter: 1,
            event_counter,
            orbit_counter: 0,
            hamming_code: 0,
            common_mode: 0,
            calibration: 0,
            crc: 0,
            slipped_nibbles: 0,
            adc,
            toa: [9; CHANNELS_PER_SAMPLE],
            tot: [4; CHANNELS_PER_SAMPLE],
        }
    }

    /// All 12 samples of a 3-deep window, timestamps 41 apart
    fn full_window(base_ts: u32, base_ec: u32) -> Vec<Sample> {
        let mut samples = Vec::new();
        for slot in 0..3u32 {
            for (asic, half) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                samples.push(sample(
                    asic,
                    half,
                    base_ts + slot * DEFAULT_TICK_PERIOD,
                    (base_ec + slot) % 64,
                ));
            }
        }
        samples
    }

    fn build_one(samples: Vec<Sample>) -> DeviceEvent {
        let mut wb = builder(3, DEFAULT_MAX_OPEN_WINDOWS);
        let mut queue: VecDeque<Sample> = samples.into();
        wb.build(&mut queue);
        assert!(queue.is_empty(), "all samples should be consumed");
        assert_eq!(wb.num_completed(), 1);
        wb.pop_complete().unwrap()
    }

    #[test]
    fn test_forward_assembly() {
        let event = build_one(full_window(1000, 10));
        assert!(event.is_complete());
        assert_eq!(event.raw_timestamp(), 1000);
        assert_eq!(event.raw_event_counter(), 10);
        // Canonical quadrant channel 0 in slot 1
        assert_eq!(event.adc(0, 1), 1041);
        // Asic 1 half 1 quadrant lands at offset 108
        assert_eq!(event.adc(108, 0), 1015);
    }

    #[test]
    fn test_assembly_is_order_independent() {
        let forward = build_one(full_window(1000, 10));

        let mut reversed = full_window(1000, 10);
        reversed.reverse();
        let backward = build_one(reversed);

        // A permutation exercising prepend, defer, and append paths
        let all = full_window(1000, 10);
        let order = [0usize, 8, 4, 1, 9, 5, 2, 6, 10, 3, 7, 11];
        let shuffled: Vec<Sample> = order.iter().map(|&i| all[i].clone()).collect();
        let permuted = build_one(shuffled);

        assert_eq!(forward, backward);
        assert_eq!(forward, permuted);
    }

    #[test]
    fn test_out_of_order_window_discarded() {
        // Event counters skip a step: 10, 12, 13
        let mut samples = full_window(1000, 10);
        for s in samples.iter_mut() {
            if s.timestamp > 1000 {
                s.event_counter += 1;
            }
        }
        let mut wb = builder(3, DEFAULT_MAX_OPEN_WINDOWS);
        let mut queue: VecDeque<Sample> = samples.into();
        wb.build(&mut queue);
        assert_eq!(wb.num_completed(), 0);
        assert_eq!(wb.num_aborted(), 1);
        assert!(wb.pop_complete().is_none());
    }

    #[test]
    fn test_window_queue_is_bounded() {
        let mut wb = builder(3, 5);
        // Timestamps far enough apart that every sample opens a new window
        let mut queue: VecDeque<Sample> = (0..20u32)
            .map(|n| sample(0, 0, 1_000_000 + n * 100_000, 0))
            .collect();
        wb.build(&mut queue);
        assert_eq!(wb.num_attempted(), 20);
        assert_eq!(wb.num_aborted(), 20);
    }

    #[test]
    fn test_jitter_tolerated_in_same_slot() {
        let mut samples = full_window(1000, 10);
        // Nudge one non-canonical quadrant by one tick of jitter
        for s in samples.iter_mut() {
            if s.asic == 1 && s.half == 1 && s.timestamp == 1041 {
                s.timestamp = 1042;
            }
        }
        let event = build_one(samples);
        assert!(event.is_complete());
    }

    #[test]
    fn test_unwrapped_keys_assigned_in_promotion_order() {
        let mut wb = builder(3, DEFAULT_MAX_OPEN_WINDOWS);
        for (base_ts, base_ec) in [(1000u32, 62u32), (2000, 1)] {
            let mut queue: VecDeque<Sample> = full_window(base_ts, base_ec).into();
            wb.build(&mut queue);
        }
        let first = wb.pop_complete().unwrap();
        let second = wb.pop_complete().unwrap();
        assert_eq!(first.unwrapped_event_number, 62);
        // 1 < 62, so the event counter wrapped
        assert_eq!(second.unwrapped_event_number, 64 + 1);
        assert!(second.unwrapped_timestamp > first.unwrapped_timestamp);
    }
}
