use super::constants::{EVENT_COUNTER_MODULUS, TIMESTAMP_MODULUS};

/// Converts a device's wrapping hardware counters into monotonic values.
///
/// The event counter is 6 bits and the hardware timestamp 30 bits; whenever a
/// raw value drops below its predecessor the respective wrap counter bumps.
/// Events must be fed in arrival order, which is also promotion order out of
/// the waveform builder.
#[derive(Debug, Default)]
pub struct CounterUnwrapper {
    last_event_number: u32,
    event_wraps: i64,
    last_timestamp: u32,
    timestamp_wraps: i64,
}

impl CounterUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap a (raw event counter, raw timestamp) pair into monotonic values.
    pub fn unwrap(&mut self, event_number: u32, timestamp: u32) -> (i64, i64) {
        if event_number < self.last_event_number {
            self.event_wraps += 1;
        }
        self.last_event_number = event_number;
        if timestamp < self.last_timestamp {
            self.timestamp_wraps += 1;
        }
        self.last_timestamp = timestamp;
        (
            event_number as i64 + EVENT_COUNTER_MODULUS * self.event_wraps,
            timestamp as i64 + TIMESTAMP_MODULUS * self.timestamp_wraps,
        )
    }
}
