//! Constants of the KCU link protocol and the .h2g run format.

/// Total size of one link frame in bytes
pub const FRAME_SIZE: usize = 1452;
/// Bytes of frame header before the first line record
pub const FRAME_HEADER_SIZE: usize = 12;
/// Line records carried by one frame
pub const LINES_PER_FRAME: usize = 36;
/// Size of one line record in bytes
pub const LINE_SIZE: usize = 40;
/// Payload words per line
pub const WORDS_PER_LINE: usize = 8;
/// Lines needed to complete one sample
pub const LINES_PER_SAMPLE: usize = 5;

/// Channels carried by one (asic, half) sample
pub const CHANNELS_PER_SAMPLE: usize = 36;
/// Quadrants (asic x half) per device
pub const QUADRANTS_PER_DEVICE: usize = 4;
/// Full channel count of one device
pub const CHANNELS_PER_DEVICE: usize = CHANNELS_PER_SAMPLE * QUADRANTS_PER_DEVICE;

/// Magic byte marking asic 0
pub const ASIC_0_MARKER: u8 = 160;
/// Magic byte marking asic 1
pub const ASIC_1_MARKER: u8 = 161;
/// Magic byte marking half 0
pub const HALF_0_MARKER: u8 = 36;
/// Magic byte marking half 1
pub const HALF_1_MARKER: u8 = 37;
/// Sentinel for an asic/half byte that matched no marker
pub const INVALID_ID: u8 = 0xFF;

/// Expected value of the 4-bit start/end framing nibbles
pub const ALIGNMENT_MARKER: u32 = 0b0101;

/// The event counter is 6 bits wide
pub const EVENT_COUNTER_MODULUS: i64 = 1 << 6;
/// The hardware timestamp is 30 bits wide
pub const TIMESTAMP_MODULUS: i64 = 1 << 30;

/// First byte (x4) of a heartbeat frame
pub const HEARTBEAT_MARKER: u8 = 0x23;
/// Line delimiting the .h2g text preamble; appears twice before the binary data
pub const PREAMBLE_DELIMITER: &str = "##################################################";
/// Preamble key carrying the machine-gun setting (sample depth - 1)
pub const MACHINE_GUN_KEY: &str = "machine_gun:";

/// Default clock ticks between successive samples of one waveform
pub const DEFAULT_TICK_PERIOD: u32 = 41;
/// Default timestamp jitter still treated as the same sample
pub const DEFAULT_JITTER: u32 = 1;
/// Default alignment tolerance on the per-device key deltas
pub const DEFAULT_ALIGNMENT_TOLERANCE: f64 = 1.0;
/// Default bound on line groups awaiting completion
pub const DEFAULT_MAX_OPEN_GROUPS: usize = 50;
/// Default bound on device-event windows awaiting completion
pub const DEFAULT_MAX_OPEN_WINDOWS: usize = 2000;
/// Default number of consecutive frames without aligned output before a run
/// is declared stalled
pub const DEFAULT_STALL_THRESHOLD: u32 = 100_000;
