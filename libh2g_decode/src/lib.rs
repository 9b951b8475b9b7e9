//! # h2g_decode
//!
//! h2g_decode is an event builder for the HGCROC-based KCU readout chain. It
//! takes the .h2g run files written by the DAQ, decodes the KCU link protocol
//! inside them, reconstructs per-device multi-sample waveform events, aligns
//! those events across devices, and writes the result to HDF5.
//!
//! ## Pipeline
//!
//! Every frame read from a run file flows through four stages:
//!
//! 1. **Line decode** ([line], [line_builder]): a 1452-byte frame carries 36
//!    40-byte line records; idle lines are dropped and the rest are grouped by
//!    (device, asic, half, timestamp) until all five lines of a sample arrive.
//! 2. **Sample decode** ([sample]): a complete line group becomes one sample
//!    of 36 channels (ADC, TOA, TOT) plus header counters.
//! 3. **Waveform assembly** ([waveform_builder], [counters]): each device's
//!    samples are folded into fixed-depth windows covering all four ASIC/half
//!    quadrants, tolerating out-of-order arrival, and the wrapping hardware
//!    counters are unwrapped into monotonic keys.
//! 4. **Alignment** ([event_aligner]): the per-device event streams are merged
//!    into aligned events, one device event per device, tolerating clock
//!    jitter between devices.
//!
//! Every stage counts its losses; a run ends with a YAML statistics report
//! beside the HDF5 output.
//!
//! ## HDF5 Data Format
//!
//! ```text
//! run001.h5
//! events - min_event, max_event, min_timestamp, max_timestamp, version
//! |---- event_# - event_number, hardware_event_number
//! |    |---- timestamps(dset)
//! |    |---- adc(dset), toa(dset), tot(dset)
//! |    |---- peak(dset), pedestal(dset)
//! geometry
//! |---- x(dset), y(dset), z(dset), good(dset)
//! ```
//!
//! ## Configuration
//!
//! Runs are configured through a YAML file (see [config::Config]); every
//! reconstruction tunable (tick period, jitter, alignment tolerance, queue
//! capacities, stall threshold) defaults to the values the protocol was
//! commissioned with, so a minimal config only names the data and output
//! paths and the run range. Use the `h2g_decode_cli` crate to drive the
//! library from the command line.
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod counters;
pub mod decoder;
pub mod error;
pub mod event_aligner;
pub mod file_stream;
pub mod hdf_writer;
pub mod line;
pub mod line_builder;
pub mod process;
pub mod sample;
pub mod stats;
pub mod waveform_builder;
pub mod worker_status;
