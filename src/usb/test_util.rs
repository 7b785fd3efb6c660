//! Synthesizes analog captures of low-speed traffic.

use super::{BusConfig, Sample};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Level {
    J,
    K,
    SE0,
    SE1,
}

impl Level {
    fn volts(self) -> (f64, f64) {
        match self {
            Level::J => (3.0, 0.3),
            Level::K => (0.3, 3.0),
            Level::SE0 => (0.1, 0.1),
            Level::SE1 => (3.0, 3.0),
        }
    }
}

/// Sync field followed by `bytes` sent LSB first, with a zero stuffed after
/// every six consecutive ones (the sync's last bit included).
pub(crate) fn stuffed_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = vec![false; 7];
    bits.push(true);
    let mut ones = 1;
    for byte in bytes {
        for i in 0..8 {
            let bit = (byte >> i) & 1 == 1;
            bits.push(bit);
            if bit {
                ones += 1;
                if ones == 6 {
                    bits.push(false);
                    ones = 0;
                }
            } else {
                ones = 0;
            }
        }
    }
    bits
}

pub(crate) struct TraceWriter {
    levels: Vec<Level>,
    line: Level,
    samples_per_bit: usize,
    bit_period: f64,
}

impl TraceWriter {
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            line: Level::J,
            samples_per_bit: 8,
            bit_period: BusConfig::default().period_avg(),
        }
    }

    pub fn hold(&mut self, level: Level, bits: usize) {
        if level == Level::J || level == Level::K {
            self.line = level;
        }
        self.levels.extend(std::iter::repeat(level).take(bits));
    }

    pub fn idle(&mut self, bits: usize) {
        self.hold(Level::J, bits);
    }

    /// NRZI encodes `bits` from the current line level.
    pub fn bits(&mut self, bits: &[bool]) {
        for &bit in bits {
            if !bit {
                self.line = if self.line == Level::J {
                    Level::K
                } else {
                    Level::J
                };
            }
            self.levels.push(self.line);
        }
    }

    pub fn eop(&mut self) {
        self.hold(Level::SE0, 2);
        self.hold(Level::J, 1);
    }

    /// A complete packet: sync, stuffed payload and end of packet.
    pub fn packet(&mut self, bytes: &[u8]) {
        self.bits(&stuffed_bits(bytes));
        self.eop();
    }

    pub fn samples(&self) -> Vec<Sample> {
        let step = self.bit_period / self.samples_per_bit as f64;
        self.levels
            .iter()
            .flat_map(|&level| std::iter::repeat(level).take(self.samples_per_bit))
            .enumerate()
            .map(|(i, level)| {
                let (d_minus, d_plus) = level.volts();
                Sample::new(i as f64 * step, d_minus, d_plus)
            })
            .collect()
    }
}
