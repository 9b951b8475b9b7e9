use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::channel_map::ChannelMap;
use super::constants::*;
use super::error::{ChannelMapError, ConfigError};

/// Which built-in geometry to use when no CSV map is given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mapping {
    Generic,
    Lfhcal,
}

/// Structure representing the application configuration. Contains pathing, run
/// range, and the reconstruction tunables.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub channel_map_path: Option<PathBuf>,
    pub mapping: Mapping,
    pub num_devices: usize,
    pub adc_truncation: bool,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    /// Clock ticks between successive samples of one waveform
    pub tick_period: u32,
    /// Timestamp wobble still treated as the same sample
    pub timestamp_jitter: u32,
    /// Maximum deviation from the mean timestamp delta to still align
    pub alignment_tolerance: f64,
    pub max_open_groups: usize,
    pub max_open_windows: usize,
    pub stall_threshold: u32,
}

impl Default for Config {
    /// The reference tunables with empty/invalid paths
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            channel_map_path: None,
            mapping: Mapping::Generic,
            num_devices: 4,
            adc_truncation: false,
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            tick_period: DEFAULT_TICK_PERIOD,
            timestamp_jitter: DEFAULT_JITTER,
            alignment_tolerance: DEFAULT_ALIGNMENT_TOLERANCE,
            max_open_groups: DEFAULT_MAX_OPEN_GROUPS,
            max_open_windows: DEFAULT_MAX_OPEN_WINDOWS,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check if a specific run exists by looking for its .h2g file
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.get_run_file_name(run_number).exists()
    }

    /// Get the path to a run file, using the DAQ naming convention
    pub fn get_run_file_name(&self, run_number: i32) -> PathBuf {
        self.data_path.join(format!("Run{run_number:0>3}.h2g"))
    }

    /// Get the path to the output hdf5 file
    pub fn get_hdf_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        if self.output_path.exists() {
            Ok(self
                .output_path
                .join(format!("{}.h5", self.get_run_str(run_number))))
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Get the path to the run statistics report, beside the hdf5 file
    pub fn get_stats_file_name(&self, run_number: i32) -> PathBuf {
        self.output_path
            .join(format!("{}.yml", self.get_run_str(run_number)))
    }

    /// Build the channel geometry for this configuration: the CSV map if one
    /// is given, the selected built-in otherwise.
    pub fn channel_map(&self) -> Result<ChannelMap, ChannelMapError> {
        match &self.channel_map_path {
            Some(path) => ChannelMap::from_csv(path, self.num_devices),
            None => Ok(match self.mapping {
                Mapping::Generic => ChannelMap::generic(self.num_devices),
                Mapping::Lfhcal => ChannelMap::lfhcal(self.num_devices),
            }),
        }
    }

    fn get_run_str(&self, run_number: i32) -> String {
        format!("run{run_number:0>3}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}
