use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use spdlog::Logger;

use super::constants::*;
use super::error::StreamError;

/// Classification of one frame read off the stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    /// A 1452-byte frame carrying line records
    Data,
    /// A keep-alive frame carrying no line data
    Heartbeat,
    /// Fewer than a full frame of bytes remain
    EndOfStream,
}

/// Frame source over one .h2g run file.
///
/// The file opens with a text preamble closed by two delimiter lines; the
/// `machine_gun` generator setting inside it fixes the run's sample depth
/// (setting + 1). Everything after the preamble is fixed-size binary frames.
pub struct H2gStream<R: BufRead + Seek> {
    reader: R,
    num_samples: usize,
    total_bytes: u64,
    position: u64,
    frames_read: u64,
    heartbeats: u64,
    last_logged_percent: u64,
    logger: Arc<Logger>,
}

impl H2gStream<BufReader<File>> {
    pub fn open(path: &Path, logger: Arc<Logger>) -> Result<Self, StreamError> {
        if !path.exists() {
            return Err(StreamError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), logger)
    }
}

impl<R: BufRead + Seek> H2gStream<R> {
    /// Parse the preamble and position the reader at the first frame.
    pub fn from_reader(mut reader: R, logger: Arc<Logger>) -> Result<Self, StreamError> {
        let mut num_samples = None;
        let mut delimiters_seen = 0;
        let mut line = String::new();
        while delimiters_seen < 2 {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(StreamError::MissingSampleCount);
            }
            if let Some(idx) = line.find(MACHINE_GUN_KEY) {
                let value = line[idx + MACHINE_GUN_KEY.len()..].split_whitespace().next();
                if let Some(Ok(setting)) = value.map(str::parse::<usize>) {
                    num_samples = Some(setting + 1);
                }
            }
            if line.contains(PREAMBLE_DELIMITER) {
                delimiters_seen += 1;
            }
        }
        let Some(num_samples) = num_samples else {
            return Err(StreamError::MissingSampleCount);
        };

        let data_start = reader.stream_position()?;
        let total_bytes = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(data_start))?;
        spdlog::info!(
            logger: logger,
            "Run file holds {} of frame data, {} samples per waveform",
            human_bytes::human_bytes((total_bytes - data_start) as f64),
            num_samples
        );

        Ok(Self {
            reader,
            num_samples,
            total_bytes,
            position: data_start,
            frames_read: 0,
            heartbeats: 0,
            last_logged_percent: 0,
            logger,
        })
    }

    /// Read and classify the next frame into the caller's buffer.
    pub fn next_frame(&mut self, buffer: &mut [u8; FRAME_SIZE]) -> Result<FrameKind, StreamError> {
        if self.bytes_remaining() < FRAME_SIZE as u64 {
            spdlog::debug!(
                logger: self.logger,
                "Reached end of stream with {} bytes left over",
                self.bytes_remaining()
            );
            return Ok(FrameKind::EndOfStream);
        }
        self.reader.read_exact(buffer)?;
        self.position += FRAME_SIZE as u64;
        self.frames_read += 1;

        let percent = self.position * 100 / self.total_bytes;
        if percent > self.last_logged_percent {
            self.last_logged_percent = percent;
            spdlog::trace!(logger: self.logger, "Stream {}% complete", percent);
        }

        if buffer[..4].iter().all(|byte| *byte == HEARTBEAT_MARKER) {
            self.heartbeats += 1;
            return Ok(FrameKind::Heartbeat);
        }
        Ok(FrameKind::Data)
    }

    /// Sample depth of every waveform in this run
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.total_bytes - self.position
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Fraction of the file consumed, for progress reporting
    pub fn progress(&self) -> f32 {
        self.position as f32 / self.total_bytes as f32
    }
}
