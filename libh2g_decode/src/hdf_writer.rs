use hdf5::types::VarLenUnicode;
use hdf5::File;
use ndarray::{Array1, Array2};
use std::path::Path;
use std::str::FromStr;

use super::channel_map::ChannelMap;
use super::constants::CHANNELS_PER_DEVICE;
use super::error::HdfWriterError;
use super::event_aligner::AlignedEvent;

const EVENTS_NAME: &str = "events";
const GEOMETRY_NAME: &str = "geometry";
/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens an HDF5 file and serializes aligned events into it, one group per
/// event, with the static channel geometry written once at file level.
#[derive(Debug)]
pub struct HdfWriter {
    file_handle: File, //Idk if this needs to be kept alive, but I think it does
    events_group: hdf5::Group,
    num_devices: usize,
    num_samples: usize,
    event_counter: u64,
    first_timestamp: i64,
    last_timestamp: i64,
}
// Structure
// events - min_event, max_event, min_timestamp, max_timestamp, version
// |---- event_# - event_number, hardware_event_number
// |    |---- timestamps(dset)
// |    |---- adc(dset)
// |    |---- toa(dset)
// |    |---- tot(dset)
// |    |---- peak(dset)
// |    |---- pedestal(dset)
// geometry
// |---- x(dset), y(dset), z(dset), good(dset)

impl HdfWriter {
    /// Create the writer, opening a file at path and writing the geometry
    pub fn new(
        path: &Path,
        map: &ChannelMap,
        num_devices: usize,
        num_samples: usize,
    ) -> Result<Self, HdfWriterError> {
        let file_handle = File::create(path)?;
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);

        let events_group = file_handle.create_group(EVENTS_NAME)?;
        events_group.new_attr::<u64>().create("min_event")?;
        events_group.new_attr::<u64>().create("max_event")?;
        events_group.new_attr::<i64>().create("min_timestamp")?;
        events_group.new_attr::<i64>().create("max_timestamp")?;
        events_group
            .new_attr::<VarLenUnicode>()
            .create("version")?;
        events_group
            .attr("version")?
            .write_scalar(&VarLenUnicode::from_str(&version).unwrap())?;

        let num_channels = map.num_channels();
        let mut x = Array1::<i32>::zeros(num_channels);
        let mut y = Array1::<i32>::zeros(num_channels);
        let mut z = Array1::<i32>::zeros(num_channels);
        let mut good = Array1::<u8>::zeros(num_channels);
        for channel in 0..num_channels {
            let position = map.position(channel);
            x[channel] = position.x;
            y[channel] = position.y;
            z[channel] = position.z;
            good[channel] = position.good as u8;
        }
        let geometry_group = file_handle.create_group(GEOMETRY_NAME)?;
        geometry_group
            .new_dataset_builder()
            .with_data(&x)
            .create("x")?;
        geometry_group
            .new_dataset_builder()
            .with_data(&y)
            .create("y")?;
        geometry_group
            .new_dataset_builder()
            .with_data(&z)
            .create("z")?;
        geometry_group
            .new_dataset_builder()
            .with_data(&good)
            .create("good")?;

        Ok(Self {
            file_handle,
            events_group,
            num_devices,
            num_samples,
            event_counter: 0,
            first_timestamp: 0,
            last_timestamp: 0,
        })
    }

    /// Write an aligned event as one group of channel × sample matrices
    pub fn write_event(&mut self, event: AlignedEvent) -> Result<(), HdfWriterError> {
        let key_timestamp = event.event(0).unwrapped_timestamp;
        if self.event_counter == 0 {
            // Catch first event ts
            self.first_timestamp = key_timestamp;
        }
        self.last_timestamp = key_timestamp;

        let event_group = self
            .events_group
            .create_group(&format!("event_{}", self.event_counter))?;
        event_group
            .new_attr::<u64>()
            .create("event_number")?
            .write_scalar(&self.event_counter)?;
        event_group
            .new_attr::<i64>()
            .create("hardware_event_number")?
            .write_scalar(&event.event(0).unwrapped_event_number)?;

        let timestamps: Vec<u32> = (0..self.num_devices)
            .map(|device| event.timestamp(device))
            .collect();
        event_group
            .new_dataset_builder()
            .with_data(&timestamps)
            .create("timestamps")?;

        let num_channels = self.num_devices * CHANNELS_PER_DEVICE;
        let mut adc = Array2::<u32>::zeros((num_channels, self.num_samples));
        let mut toa = Array2::<u32>::zeros((num_channels, self.num_samples));
        let mut tot = Array2::<u32>::zeros((num_channels, self.num_samples));
        let mut peak = Array1::<u32>::zeros(num_channels);
        let mut pedestal = Array1::<u32>::zeros(num_channels);
        for device in 0..self.num_devices {
            let device_event = event.event(device);
            for channel in 0..CHANNELS_PER_DEVICE {
                let global = device * CHANNELS_PER_DEVICE + channel;
                pedestal[global] = device_event.adc(channel, 0);
                for slot in 0..self.num_samples {
                    let value = device_event.adc(channel, slot);
                    adc[[global, slot]] = value;
                    if value > peak[global] {
                        peak[global] = value;
                    }
                    toa[[global, slot]] = device_event.toa(channel, slot);
                    tot[[global, slot]] = device_event.tot(channel, slot);
                }
            }
        }
        event_group
            .new_dataset_builder()
            .with_data(&adc)
            .create("adc")?;
        event_group
            .new_dataset_builder()
            .with_data(&toa)
            .create("toa")?;
        event_group
            .new_dataset_builder()
            .with_data(&tot)
            .create("tot")?;
        event_group
            .new_dataset_builder()
            .with_data(&peak)
            .create("peak")?;
        event_group
            .new_dataset_builder()
            .with_data(&pedestal)
            .create("pedestal")?;

        self.event_counter += 1;
        Ok(())
    }

    /// Write meta information on first and last events, consume the writer
    pub fn close(self) -> Result<(), HdfWriterError> {
        self.events_group.attr("min_event")?.write_scalar(&0u64)?;
        self.events_group
            .attr("max_event")?
            .write_scalar(&self.event_counter.saturating_sub(1))?;
        self.events_group
            .attr("min_timestamp")?
            .write_scalar(&self.first_timestamp)?;
        self.events_group
            .attr("max_timestamp")?
            .write_scalar(&self.last_timestamp)?;
        spdlog::info!("{} aligned events written", self.event_counter);
        Ok(())
    }
}
