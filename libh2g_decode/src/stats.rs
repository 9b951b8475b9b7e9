use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use spdlog::Logger;

use super::error::StatsError;

/// End-of-run accounting across every pipeline stage.
///
/// Per-device vectors are indexed by device id; `lines_per_quadrant` by
/// device × 4 + asic × 2 + half. Serialized to YAML beside the run's output
/// file so data quality can be audited later.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub run_number: i32,
    pub num_devices: usize,
    pub num_samples: usize,
    pub frames_processed: u64,
    pub heartbeat_frames: u64,
    pub total_bytes: u64,
    pub bytes_remaining: u64,
    pub protocol_errors: u64,
    pub bit_slips: u64,
    pub groups_completed: u64,
    pub groups_aborted: u64,
    /// Raw valid lines observed on each link, completed group or not
    pub lines_per_quadrant: Vec<u64>,
    pub groups_completed_per_quadrant: Vec<u64>,
    pub groups_aborted_per_quadrant: Vec<u64>,
    pub windows_attempted: Vec<u64>,
    pub windows_completed: Vec<u64>,
    pub windows_aborted: Vec<u64>,
    pub windows_in_order: Vec<u64>,
    pub events_skipped_in_alignment: u64,
    pub aligned_events: u64,
    pub stalled: bool,
}

impl RunStats {
    /// Serialize the report to a YAML file.
    pub fn write(&self, path: &Path) -> Result<(), StatsError> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }

    /// Log the run summary at info level.
    pub fn log(&self, logger: &Arc<Logger>) {
        spdlog::info!(
            logger: logger,
            "Run {}: {} frames ({} heartbeats), {} line groups completed, {} aborted, {} bit slips, {} protocol errors",
            self.run_number,
            self.frames_processed,
            self.heartbeat_frames,
            self.groups_completed,
            self.groups_aborted,
            self.bit_slips,
            self.protocol_errors
        );
        for device in 0..self.num_devices {
            spdlog::info!(
                logger: logger,
                "Device {}: {} windows attempted, {} completed, {} aborted, {} in order",
                device,
                self.windows_attempted[device],
                self.windows_completed[device],
                self.windows_aborted[device],
                self.windows_in_order[device]
            );
        }
        spdlog::info!(
            logger: logger,
            "Aligned {} events ({} device events skipped){}",
            self.aligned_events,
            self.events_skipped_in_alignment,
            if self.stalled { ", run stalled" } else { "" }
        );
    }
}
