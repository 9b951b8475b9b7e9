use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::constants::CHANNELS_PER_DEVICE;
use super::error::ChannelMapError;

const ENTRIES_PER_LINE: usize = 5; // device, channel, x, y, z

/// Detector position of one readout channel. Channels with no physical
/// counterpart (spare ASIC inputs) carry `good = false` and -1 coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub good: bool,
}

/// Lookup from global channel index (device × 144 + channel) to detector
/// position.
///
/// Geometry changes between test-beam setups, so the map can be loaded from a
/// CSV file; a generic passthrough and the LFHCal prototype cabling ship
/// built in.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    positions: Vec<ChannelPosition>,
}

/// LFHCal cabling: index = detector-space channel 0..63, value = ASIC-space
/// channel. The last eight ASIC inputs per half are unconnected.
const LFHCAL_ASIC_CHANNEL: [i32; 64] = [
    64, 63, 66, 65, 69, 70, 67, 68, //
    55, 56, 57, 58, 62, 61, 60, 59, //
    45, 46, 47, 48, 52, 51, 50, 49, //
    37, 36, 39, 38, 42, 43, 40, 41, //
    34, 33, 32, 31, 27, 28, 29, 30, //
    25, 26, 23, 24, 20, 19, 22, 21, //
    16, 14, 15, 12, 9, 11, 10, 13, //
    7, 6, 5, 4, 0, 1, 2, 3,
];

/// Which 16-tower column each device reads out in the LFHCal prototype
const LFHCAL_DEVICE_FACTOR: [i32; 4] = [1, 3, 0, 2];

impl ChannelMap {
    /// A passthrough geometry: x = channel within the device, z = device.
    pub fn generic(num_devices: usize) -> Self {
        let positions = (0..num_devices * CHANNELS_PER_DEVICE)
            .map(|channel| ChannelPosition {
                x: (channel % CHANNELS_PER_DEVICE) as i32,
                y: 0,
                z: (channel / CHANNELS_PER_DEVICE) as i32,
                good: true,
            })
            .collect();
        Self { positions }
    }

    /// The LFHCal prototype tower geometry.
    pub fn lfhcal(num_devices: usize) -> Self {
        let positions = (0..num_devices * CHANNELS_PER_DEVICE)
            .map(|channel| Self::lfhcal_position(channel))
            .collect();
        Self { positions }
    }

    fn lfhcal_position(channel: usize) -> ChannelPosition {
        let asic_channel = (channel % 72) as i32;
        let Some(detector_channel) = LFHCAL_ASIC_CHANNEL
            .iter()
            .position(|&mapped| mapped == asic_channel)
        else {
            return ChannelPosition {
                x: -1,
                y: -1,
                z: -1,
                good: false,
            };
        };

        // Four towers per row, folded boustrophedon within each group of 8
        let candy_bar_index = detector_channel % 8;
        let y = if candy_bar_index < 4 { 1 } else { 0 };
        let x = match candy_bar_index {
            0 | 7 => 0,
            1 | 6 => 1,
            2 | 5 => 2,
            _ => 3,
        };

        let device = channel / CHANNELS_PER_DEVICE;
        let asic = (channel % CHANNELS_PER_DEVICE) / 72;
        let z = LFHCAL_DEVICE_FACTOR[device % LFHCAL_DEVICE_FACTOR.len()] * 16
            + asic as i32 * 8
            + detector_channel as i32 / 8;

        ChannelPosition {
            x,
            y,
            z,
            good: true,
        }
    }

    /// Load a geometry from a CSV file of `device,channel,x,y,z` rows.
    /// The first line is a header and is skipped; channels absent from the
    /// file stay not-good.
    pub fn from_csv(path: &Path, num_devices: usize) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;

        let num_channels = num_devices * CHANNELS_PER_DEVICE;
        let mut positions = vec![
            ChannelPosition {
                x: -1,
                y: -1,
                z: -1,
                good: false,
            };
            num_channels
        ];

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            let entries: Vec<&str> = line.split_terminator(',').collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat);
            }
            let device: usize = entries[0].parse()?;
            let channel: usize = entries[1].parse()?;
            let global = device * CHANNELS_PER_DEVICE + channel;
            if device >= num_devices || channel >= CHANNELS_PER_DEVICE {
                return Err(ChannelMapError::BadChannel(global, num_devices));
            }
            positions[global] = ChannelPosition {
                x: entries[2].parse()?,
                y: entries[3].parse()?,
                z: entries[4].parse()?,
                good: true,
            };
        }

        Ok(Self { positions })
    }

    pub fn position(&self, channel: usize) -> &ChannelPosition {
        &self.positions[channel]
    }

    pub fn num_channels(&self) -> usize {
        self.positions.len()
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_map() {
        let map = ChannelMap::generic(2);
        assert_eq!(map.num_channels(), 288);
        let position = map.position(150);
        assert_eq!(position.x, 6);
        assert_eq!(position.z, 1);
        assert!(position.good);
    }

    #[test]
    fn test_lfhcal_map() {
        let map = ChannelMap::lfhcal(4);
        // ASIC channel 0 sits at detector channel 60 of the first column
        let expected = ChannelPosition {
            x: 3,
            y: 0,
            z: 23,
            good: true,
        };
        assert_eq!(*map.position(0), expected);
        // ASIC channel 64 is detector channel 0
        let expected = ChannelPosition {
            x: 0,
            y: 1,
            z: 16,
            good: true,
        };
        assert_eq!(*map.position(64), expected);
    }

    #[test]
    fn test_lfhcal_unconnected_channel() {
        let map = ChannelMap::lfhcal(4);
        // ASIC channel 8 has no tower behind it
        assert!(!map.position(8).good);
        assert_eq!(map.position(8).x, -1);
    }
}
