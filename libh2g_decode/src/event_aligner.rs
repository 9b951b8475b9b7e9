use std::collections::VecDeque;
use std::sync::Arc;

use spdlog::Logger;

use super::error::AlignerError;
use super::waveform_builder::DeviceEvent;

/// One synchronized event spanning every device.
///
/// Owns its device events outright; index = device id.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedEvent {
    events: Vec<DeviceEvent>,
}

impl AlignedEvent {
    pub fn num_devices(&self) -> usize {
        self.events.len()
    }

    pub fn event(&self, device: usize) -> &DeviceEvent {
        &self.events[device]
    }

    /// Raw hardware timestamp of one device's event
    pub fn timestamp(&self, device: usize) -> u32 {
        self.events[device].raw_timestamp()
    }
}

/// EventAligner merges per-device streams of completed [DeviceEvent]s into
/// [AlignedEvent]s.
///
/// The ordering key is the unwrapped event number; timestamps carry an
/// arbitrary per-device clock offset and are never compared across devices.
/// Each device advances an independent cursor over its pending queue. Per
/// iteration the per-device key deltas since the last aligned event are
/// compared against their mean; if every device agrees within the tolerance
/// one aligned event is emitted, otherwise the farthest-off device (or
/// everyone else, if it is running ahead) skips forward. The heuristic assumes
/// at most one device is anomalous per iteration, and makes progress every
/// iteration.
pub struct EventAligner {
    num_devices: usize,
    tolerance: f64,
    pending: Vec<VecDeque<DeviceEvent>>,
    /// Key of each device's last aligned event; None until the device's first
    /// event seeds it
    last_aligned: Vec<Option<i64>>,
    skipped: Vec<u64>,
    aligned_count: u64,
    complete: VecDeque<AlignedEvent>,
    logger: Arc<Logger>,
}

impl EventAligner {
    pub fn new(
        num_devices: usize,
        tolerance: f64,
        logger: Arc<Logger>,
    ) -> Result<Self, AlignerError> {
        if num_devices == 0 {
            return Err(AlignerError::NoDevices(num_devices));
        }
        Ok(Self {
            num_devices,
            tolerance,
            pending: vec![VecDeque::new(); num_devices],
            last_aligned: vec![None; num_devices],
            skipped: vec![0; num_devices],
            aligned_count: 0,
            complete: VecDeque::new(),
            logger,
        })
    }

    /// Queue a completed device event for alignment. Events must arrive in
    /// each device's promotion order.
    pub fn push(&mut self, event: DeviceEvent) {
        let device = event.device() as usize;
        debug_assert!(device < self.num_devices);
        self.pending[device].push_back(event);
    }

    /// Run the alignment loop until some device's queue runs dry.
    ///
    /// Cursor state persists across calls, so streaming callers can align
    /// after every frame without re-emitting.
    pub fn align(&mut self) {
        while self.pending.iter().all(|queue| !queue.is_empty()) {
            // A device's first event seeds its baseline, so the head events
            // pair up regardless of where each counter started
            for (device, queue) in self.pending.iter().enumerate() {
                if self.last_aligned[device].is_none() {
                    self.last_aligned[device] = Some(queue[0].unwrapped_event_number);
                }
            }
            let deltas: Vec<f64> = (0..self.num_devices)
                .map(|i| {
                    (self.pending[i][0].unwrapped_event_number
                        - self.last_aligned[i].expect("baseline seeded above"))
                        as f64
                })
                .collect();
            let avg = deltas.iter().sum::<f64>() / self.num_devices as f64;
            let (farthest, max_deviation) = deltas
                .iter()
                .map(|delta| (delta - avg).abs())
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .expect("at least one device");

            if max_deviation < self.tolerance {
                let mut events = Vec::with_capacity(self.num_devices);
                for (device, queue) in self.pending.iter_mut().enumerate() {
                    let event = queue.pop_front().expect("queue checked non-empty");
                    self.last_aligned[device] = Some(event.unwrapped_event_number);
                    events.push(event);
                }
                self.aligned_count += 1;
                self.complete.push_back(AlignedEvent { events });
            } else if deltas[farthest] - avg > 0.0 {
                // The outlier is running ahead; everyone else catches up
                spdlog::debug!(
                    logger: self.logger,
                    "Device {} is ahead by {:.1} ticks, skipping the others forward",
                    farthest,
                    max_deviation
                );
                for (device, queue) in self.pending.iter_mut().enumerate() {
                    if device != farthest {
                        queue.pop_front();
                        self.skipped[device] += 1;
                    }
                }
            } else {
                spdlog::debug!(
                    logger: self.logger,
                    "Device {} is behind by {:.1} ticks, skipping it forward",
                    farthest,
                    max_deviation
                );
                self.pending[farthest].pop_front();
                self.skipped[farthest] += 1;
            }
        }
    }

    /// End-of-stream alignment pass. Anything still pending afterwards will
    /// never align and is reported as loss.
    pub fn flush(&mut self) {
        self.align();
        for (device, queue) in self.pending.iter().enumerate() {
            if !queue.is_empty() {
                spdlog::debug!(
                    logger: self.logger,
                    "Device {} ends the run with {} unaligned events",
                    device,
                    queue.len()
                );
            }
        }
    }

    /// Pop the next aligned event, in emission order
    pub fn pop_complete(&mut self) -> Option<AlignedEvent> {
        self.complete.pop_front()
    }

    pub fn num_aligned(&self) -> u64 {
        self.aligned_count
    }

    /// Device events dropped without ever aligning, summed over devices
    pub fn num_skipped(&self) -> u64 {
        self.skipped.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_logger() -> Arc<Logger> {
        Arc::new(Logger::builder().build().unwrap())
    }

    fn aligner(num_devices: usize) -> EventAligner {
        EventAligner::new(num_devices, 1.0, quiet_logger()).unwrap()
    }

    fn feed(aligner: &mut EventAligner, device: u8, keys: &[i64]) {
        for key in keys {
            aligner.push(DeviceEvent::synthetic(device, *key, *key));
        }
    }

    #[test]
    fn test_rejects_zero_devices() {
        assert!(EventAligner::new(0, 1.0, quiet_logger()).is_err());
    }

    #[test]
    fn test_jittered_streams_converge() {
        let mut aligner = aligner(3);
        feed(&mut aligner, 0, &[100, 141, 182, 223]);
        feed(&mut aligner, 1, &[100, 140, 181, 223]);
        feed(&mut aligner, 2, &[101, 142, 183, 224]);
        aligner.flush();

        assert_eq!(aligner.num_aligned(), 4);
        assert_eq!(aligner.num_skipped(), 0);
        let mut emitted = 0;
        while let Some(event) = aligner.pop_complete() {
            assert_eq!(event.num_devices(), 3);
            emitted += 1;
        }
        assert_eq!(emitted, 4);
    }

    #[test]
    fn test_constant_clock_offset_between_devices() {
        let mut aligner = aligner(2);
        // Same event numbers; device 1's clock runs 2 ticks behind
        for number in 10i64..14 {
            aligner.push(DeviceEvent::synthetic(0, number, number * 41));
            aligner.push(DeviceEvent::synthetic(1, number, number * 41 - 2));
        }
        aligner.flush();
        assert_eq!(aligner.num_aligned(), 4);
        assert_eq!(aligner.num_skipped(), 0);
    }

    #[test]
    fn test_offset_counter_origins_still_pair_heads() {
        let mut aligner = aligner(2);
        // Identical deltas but counters that started 400 apart
        feed(&mut aligner, 0, &[100, 141, 182]);
        feed(&mut aligner, 1, &[500, 541, 582]);
        aligner.flush();
        assert_eq!(aligner.num_aligned(), 3);
        assert_eq!(aligner.num_skipped(), 0);
    }

    #[test]
    fn test_single_device_passes_through() {
        let mut aligner = aligner(1);
        feed(&mut aligner, 0, &[100, 141, 182]);
        aligner.align();
        assert_eq!(aligner.num_aligned(), 3);
    }

    #[test]
    fn test_behind_device_skips_forward() {
        let mut aligner = aligner(2);
        // Device 1 has a spurious extra event at 120 that device 0 never saw
        feed(&mut aligner, 0, &[100, 141, 182]);
        feed(&mut aligner, 1, &[100, 120, 141, 182]);
        aligner.flush();
        assert_eq!(aligner.num_aligned(), 3);
        assert_eq!(aligner.num_skipped(), 1);
    }

    #[test]
    fn test_streaming_matches_batch() {
        let mut streaming = aligner(2);
        let mut batch = aligner(2);
        let keys = [100i64, 141, 182, 223, 264];
        for key in keys {
            feed(&mut streaming, 0, &[key]);
            feed(&mut streaming, 1, &[key + 1]);
            streaming.align();
        }
        feed(&mut batch, 0, &keys);
        for key in keys {
            feed(&mut batch, 1, &[key + 1]);
        }
        batch.align();
        assert_eq!(streaming.num_aligned(), batch.num_aligned());
    }
}
