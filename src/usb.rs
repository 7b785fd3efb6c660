// Based on USB 2.0 specifications
// https://www.usb.org/document-library/usb-20-specification
// especially usb_20.pdf, chapter 7 (electrical) and chapter 8 (protocol layer)

mod types;

pub mod packet;
pub mod protocol;
pub mod signal;

#[cfg(test)]
pub(crate) mod test_util;

pub use packet::{Packet, PacketIteratorExt};
pub use protocol::{Field, FieldError, Fields};
pub use signal::{Event, EventIteratorExt, LineState, Sample};
pub use types::{crc16, crc5_check, pid_check, Pid};

use crate::error::Error;
use tracing::{debug, info};

/// Electrical and timing thresholds of a low-speed bus (USB 2.0 table 7-7 and 7-9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusConfig {
    /// Input low level, volts.
    pub vil: f64,
    /// Input high level, volts.
    pub vih: f64,
    /// Differential input sensitivity, volts.
    pub vdi: f64,
    /// Shortest bit period, seconds.
    pub period_min: f64,
    /// Longest bit period, seconds.
    pub period_max: f64,
    /// Worst case rise/fall time, seconds.
    pub rise_fall_max: f64,
    /// SE0 longer than this is a bus reset, seconds.
    pub reset_threshold: f64,
    /// J longer than this many `period_max` is an idle bus.
    pub idle_bits: f64,
}

impl BusConfig {
    pub const LOW_SPEED_RATE_MIN: f64 = 1.4775e6;
    pub const LOW_SPEED_RATE_MAX: f64 = 1.5225e6;

    /// Nominal bit period used to turn an event duration into a bit count.
    pub fn period_avg(&self) -> f64 {
        (self.period_min + self.period_max) / 2.
    }

    pub fn idle_threshold(&self) -> f64 {
        self.idle_bits * self.period_max
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            vil: 0.8,
            vih: 2.0,
            vdi: 0.2,
            period_min: 1. / Self::LOW_SPEED_RATE_MAX,
            period_max: 1. / Self::LOW_SPEED_RATE_MIN,
            rise_fall_max: 300e-9,
            reset_threshold: 2.5e-6,
            idle_bits: 7.,
        }
    }
}

/// Runs the whole pipeline over a capture and annotates the resulting packets.
pub fn decode(samples: &[Sample], config: &BusConfig) -> Result<Vec<Packet>, Error> {
    if samples.is_empty() {
        return Err(Error::EmptyCapture);
    }
    if let Some(index) = samples
        .windows(2)
        .position(|pair| pair[1].time < pair[0].time)
    {
        return Err(Error::UnorderedSamples {
            index: index + 1,
            time: samples[index + 1].time,
            previous: samples[index].time,
        });
    }

    let mut event_count = 0usize;
    let mut packets: Vec<Packet> = samples
        .iter()
        .copied()
        .into_events(config)
        .inspect(|_| event_count += 1)
        .into_packets(config)
        .collect();

    if event_count == 0 {
        return Err(Error::NoLineState(samples.len()));
    }
    debug!("{} events recognized in the signal", event_count);

    protocol::annotate(&mut packets);

    info!(
        "{} packets found, {} invalid",
        packets.len(),
        packets.iter().filter(|p| p.is_invalid).count()
    );
    Ok(packets)
}
