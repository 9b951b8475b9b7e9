use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum LineAssemblerError {
    #[error("Duplicate line {line_number} for device {device} asic {asic} half {half} at timestamp {timestamp}")]
    DuplicateLine {
        device: u8,
        asic: u8,
        half: u8,
        line_number: u8,
        timestamp: u32,
    },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Could not open run file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Run file preamble ended without a machine_gun setting")]
    MissingSampleCount,
    #[error("Frame stream failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error)]
pub enum AlignerError {
    #[error("EventAligner requires at least one device, got {0}")]
    NoDevices(usize),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("ChannelMap row addresses channel {0} which does not exist for {1} devices")]
    BadChannel(usize, usize),
}

#[derive(Debug, Error)]
pub enum HdfWriterError {
    #[error("HdfWriter failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HdfWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("HdfWriter failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Stats report failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Stats report failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to stream error: {0}")]
    StreamError(#[from] StreamError),
    #[error("Processor failed due to aligner error: {0}")]
    AlignerError(#[from] AlignerError),
    #[error("Processor failed due to HdfWriter error: {0}")]
    HDFError(#[from] HdfWriterError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to Stats error: {0}")]
    StatsError(#[from] StatsError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
