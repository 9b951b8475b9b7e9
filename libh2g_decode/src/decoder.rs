use std::collections::VecDeque;
use std::io::{BufRead, Seek};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spdlog::Logger;

use super::config::Config;
use super::constants::FRAME_SIZE;
use super::error::{AlignerError, ProcessorError};
use super::event_aligner::{AlignedEvent, EventAligner};
use super::file_stream::{FrameKind, H2gStream};
use super::line_builder::LineAssembler;
use super::stats::RunStats;
use super::waveform_builder::WaveformBuilder;

/// HgcDecoder drives the full reconstruction pipeline over one run stream.
///
/// Each pumped frame is decoded into lines, folded into samples, built into
/// per-device waveform windows, and aligned across devices before the next
/// frame is read. [Self::next_event] pulls aligned events out in emission
/// order; the run ends on end-of-stream, on a sustained stall, or when the
/// stop flag is raised.
pub struct HgcDecoder<R: BufRead + Seek> {
    stream: H2gStream<R>,
    assembler: LineAssembler,
    builders: Vec<WaveformBuilder>,
    aligner: EventAligner,
    aligned: VecDeque<AlignedEvent>,
    num_devices: usize,
    stall_threshold: u32,
    stall_counter: u32,
    stalled: bool,
    finished: bool,
    protocol_errors: u64,
    stop: Arc<AtomicBool>,
    buffer: Box<[u8; FRAME_SIZE]>,
    logger: Arc<Logger>,
}

impl<R: BufRead + Seek> HgcDecoder<R> {
    pub fn new(
        config: &Config,
        stream: H2gStream<R>,
        stop: Arc<AtomicBool>,
        logger: Arc<Logger>,
    ) -> Result<Self, AlignerError> {
        let num_samples = stream.num_samples();
        let assembler = LineAssembler::new(
            config.num_devices,
            config.max_open_groups,
            config.adc_truncation,
            logger.clone(),
        );
        let builders = (0..config.num_devices)
            .map(|device| {
                WaveformBuilder::new(
                    device as u8,
                    num_samples,
                    config.tick_period,
                    config.timestamp_jitter,
                    config.max_open_windows,
                    logger.clone(),
                )
            })
            .collect();
        let aligner = EventAligner::new(
            config.num_devices,
            config.alignment_tolerance,
            logger.clone(),
        )?;
        Ok(Self {
            stream,
            assembler,
            builders,
            aligner,
            aligned: VecDeque::new(),
            num_devices: config.num_devices,
            stall_threshold: config.stall_threshold,
            stall_counter: 0,
            stalled: false,
            finished: false,
            protocol_errors: 0,
            stop,
            buffer: Box::new([0u8; FRAME_SIZE]),
            logger,
        })
    }

    /// Pull the next aligned event, pumping frames as needed.
    ///
    /// Returns Ok(None) once the run is over; after end-of-stream the aligner
    /// is flushed so the final pending events are still delivered.
    pub fn next_event(&mut self) -> Result<Option<AlignedEvent>, ProcessorError> {
        loop {
            if let Some(event) = self.aligned.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            if !self.pump()? {
                self.finished = true;
                // A stalled or stopped run does not get its tail
                if !self.stalled && !self.stop.load(Ordering::Relaxed) {
                    self.aligner.flush();
                    self.drain_aligned();
                }
            }
        }
    }

    /// Process one frame end to end. Returns false once the run is over.
    fn pump(&mut self) -> Result<bool, ProcessorError> {
        if self.stop.load(Ordering::Relaxed) {
            spdlog::info!(logger: self.logger, "Stop requested, ending run");
            return Ok(false);
        }
        match self.stream.next_frame(&mut self.buffer)? {
            FrameKind::EndOfStream => Ok(false),
            FrameKind::Heartbeat => Ok(self.bump_stall()),
            FrameKind::Data => {
                if let Err(error) = self.assembler.process_frame(&self.buffer) {
                    // Fatal to this frame only; the run continues
                    self.protocol_errors += 1;
                    spdlog::error!(
                        logger: self.logger,
                        "Dropping frame {}: {}",
                        self.stream.frames_read(),
                        error
                    );
                    return Ok(self.bump_stall());
                }
                self.assembler.process_complete();
                for (device, builder) in self.builders.iter_mut().enumerate() {
                    builder.build(self.assembler.samples_mut(device));
                    while let Some(event) = builder.pop_complete() {
                        self.aligner.push(event);
                    }
                }
                self.aligner.align();
                if self.drain_aligned() > 0 {
                    self.stall_counter = 0;
                    Ok(true)
                } else {
                    Ok(self.bump_stall())
                }
            }
        }
    }

    fn drain_aligned(&mut self) -> usize {
        let mut emitted = 0;
        while let Some(event) = self.aligner.pop_complete() {
            self.aligned.push_back(event);
            emitted += 1;
        }
        emitted
    }

    fn bump_stall(&mut self) -> bool {
        self.stall_counter += 1;
        if self.stall_counter > self.stall_threshold {
            self.stalled = true;
            spdlog::warn!(
                logger: self.logger,
                "No aligned events for {} consecutive frames, ending run as stalled",
                self.stall_counter
            );
            return false;
        }
        true
    }

    pub fn num_samples(&self) -> usize {
        self.stream.num_samples()
    }

    /// Fraction of the stream consumed, for progress reporting
    pub fn progress(&self) -> f32 {
        self.stream.progress()
    }

    /// Snapshot the run accounting across every stage.
    pub fn stats(&self, run_number: i32) -> RunStats {
        let mut stats = RunStats {
            run_number,
            num_devices: self.num_devices,
            num_samples: self.stream.num_samples(),
            frames_processed: self.stream.frames_read(),
            heartbeat_frames: self.stream.heartbeats(),
            total_bytes: self.stream.total_bytes(),
            bytes_remaining: self.stream.bytes_remaining(),
            protocol_errors: self.protocol_errors,
            bit_slips: self.assembler.bit_slips(),
            groups_completed: self.assembler.groups_completed(),
            groups_aborted: self.assembler.groups_aborted(),
            events_skipped_in_alignment: self.aligner.num_skipped(),
            aligned_events: self.aligner.num_aligned(),
            stalled: self.stalled,
            ..Default::default()
        };
        for device in 0..self.num_devices {
            for asic in 0..2 {
                for half in 0..2 {
                    stats
                        .lines_per_quadrant
                        .push(self.assembler.lines_seen(device, asic, half));
                    stats
                        .groups_completed_per_quadrant
                        .push(self.assembler.completed_in(device, asic, half));
                    stats
                        .groups_aborted_per_quadrant
                        .push(self.assembler.aborted_in(device, asic, half));
                }
            }
        }
        for builder in &self.builders {
            stats.windows_attempted.push(builder.num_attempted());
            stats.windows_completed.push(builder.num_completed());
            stats.windows_aborted.push(builder.num_aborted());
            stats.windows_in_order.push(builder.num_in_order());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::file_stream::tests::{heartbeat_frame, preamble};
    use crate::line_builder::tests::sample_frame;

    fn quiet_logger() -> Arc<Logger> {
        Arc::new(Logger::builder().build().unwrap())
    }

    fn decoder(bytes: Vec<u8>, config: &Config) -> HgcDecoder<Cursor<Vec<u8>>> {
        let logger = quiet_logger();
        let stream = H2gStream::from_reader(Cursor::new(bytes), logger.clone()).unwrap();
        HgcDecoder::new(config, stream, Arc::new(AtomicBool::new(false)), logger).unwrap()
    }

    #[test]
    fn test_single_device_run_end_to_end() {
        // machine_gun 0 gives one-sample windows; one frame per quadrant
        let mut bytes = preamble(Some(0));
        for (asic, half) in [(0u8, 0u8), (0, 1), (1, 0), (1, 1)] {
            bytes.extend_from_slice(&sample_frame(0, asic, half, 1000, 21));
        }
        let config = Config {
            num_devices: 1,
            ..Default::default()
        };
        let mut decoder = decoder(bytes, &config);

        let event = decoder.next_event().unwrap().expect("one aligned event");
        assert_eq!(event.num_devices(), 1);
        assert_eq!(event.timestamp(0), 1000);
        assert_eq!(event.event(0).adc(0, 0), 100);
        assert!(decoder.next_event().unwrap().is_none());

        let stats = decoder.stats(1);
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.groups_completed, 4);
        assert_eq!(stats.groups_completed_per_quadrant, vec![1, 1, 1, 1]);
        assert_eq!(stats.groups_aborted_per_quadrant, vec![0, 0, 0, 0]);
        assert_eq!(stats.aligned_events, 1);
        assert!(!stats.stalled);
    }

    #[test]
    fn test_heartbeat_only_run_terminates_as_stalled() {
        let mut bytes = preamble(Some(0));
        for _ in 0..10 {
            bytes.extend_from_slice(&heartbeat_frame());
        }
        let config = Config {
            num_devices: 1,
            stall_threshold: 5,
            ..Default::default()
        };
        let mut decoder = decoder(bytes, &config);

        assert!(decoder.next_event().unwrap().is_none());
        let stats = decoder.stats(2);
        assert!(stats.stalled);
        assert_eq!(stats.aligned_events, 0);
        // The run ended before reading every heartbeat
        assert_eq!(stats.heartbeat_frames, 6);
    }

    #[test]
    fn test_stop_flag_ends_run() {
        let mut bytes = preamble(Some(0));
        bytes.extend_from_slice(&sample_frame(0, 0, 0, 1000, 21));
        let config = Config {
            num_devices: 1,
            ..Default::default()
        };
        let logger = quiet_logger();
        let stream = H2gStream::from_reader(Cursor::new(bytes), logger.clone()).unwrap();
        let stop = Arc::new(AtomicBool::new(true));
        let mut decoder = HgcDecoder::new(&config, stream, stop, logger).unwrap();
        assert!(decoder.next_event().unwrap().is_none());
        assert_eq!(decoder.stats(3).frames_processed, 0);
    }
}
