use std::convert::TryFrom;

use tracing::{debug, trace, warn};

use super::protocol::Fields;
use super::signal::{Event, LineState};
use super::types::{crc16, pid_check, Pid};
use super::BusConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Position within the KJKJKJ part of the sync field.
    AwaitingSync(u8),
    /// Final KK of the sync field, possibly merged with the first payload bits.
    SyncTail,
    Payload,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    J,
    K,
}

#[derive(Debug)]
struct StuffingViolation;

/// Bit-level receiver: unstuffs bits and assembles bytes LSB first.
#[derive(Debug, Clone, PartialEq)]
struct Receiver {
    level: Level,
    consecutive_ones: u8,
    shift_reg: u8,
    bit_count: u8,
}

impl Receiver {
    const MAX_ONES: u8 = 6;

    fn new() -> Self {
        Self {
            // the sync field ends on K, its last bit being a one
            level: Level::K,
            consecutive_ones: 1,
            shift_reg: 0,
            bit_count: 0,
        }
    }

    fn push(&mut self, bit: bool) -> Result<Option<u8>, StuffingViolation> {
        if bit {
            if self.consecutive_ones == Self::MAX_ONES {
                return Err(StuffingViolation);
            }
            self.consecutive_ones += 1;
            self.shift_reg = (self.shift_reg >> 1) | 0x80;
        } else {
            let stuffed = self.consecutive_ones == Self::MAX_ONES;
            self.consecutive_ones = 0;
            if stuffed {
                return Ok(None);
            }
            self.shift_reg >>= 1;
        }

        self.bit_count += 1;
        if self.bit_count == 8 {
            self.bit_count = 0;
            Ok(Some(std::mem::take(&mut self.shift_reg)))
        } else {
            Ok(None)
        }
    }
}

pub(crate) fn round_half_up(x: f64) -> u64 {
    (x + 0.5).floor() as u64
}

/// Number of bit periods covered by an event. Durations outside the window
/// allowed by the data rate tolerance are reported but still used.
pub(crate) fn bit_count(event: &Event, config: &BusConfig) -> u64 {
    let duration = event.duration();
    let n = round_half_up(duration / config.period_avg());

    let shortest = config.period_min * n as f64;
    let longest = config.period_max * n as f64 + config.rise_fall_max;
    if duration < shortest {
        warn!(
            "{} signal too short for {} bit(s) train, {:e} < {:e}",
            event, n, duration, shortest
        );
    } else if duration > longest {
        warn!(
            "{} signal too long for {} bit(s) train, {:e} > {:e}",
            event, n, duration, longest
        );
    }
    n
}

fn check_se0_duration(event: &Event, config: &BusConfig, what: &str) {
    if event.duration() < config.period_min {
        warn!("{} too short {}", event, what);
    } else if event.duration() > 3. * config.period_max {
        warn!("{} too long {}", event, what);
    }
}

/// A link-layer packet, from the first K of its sync field to its end of packet.
///
/// Protocol violations don't stop the decoding of the capture: they mark the
/// packet invalid and whatever was recovered stays available.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub events: Vec<Event>,
    pub bytes: Vec<u8>,
    /// Low nibble of the first byte, recorded even when it fails its check.
    pub pid: Option<u8>,
    pub is_keep_alive: bool,
    pub is_invalid: bool,
    /// CRC16 trailer carried by a data packet.
    pub crc: Option<u16>,
    /// CRC16 computed over the payload of a data packet.
    pub crc_expected: Option<u16>,
    pub fields: Option<Fields>,

    config: BusConfig,
    state: State,
    rx: Receiver,
}

impl Packet {
    fn new(config: &BusConfig, is_keep_alive: bool) -> Self {
        Self {
            events: Vec::new(),
            bytes: Vec::new(),
            pid: None,
            is_keep_alive,
            is_invalid: false,
            crc: None,
            crc_expected: None,
            fields: None,
            config: *config,
            state: State::AwaitingSync(0),
            rx: Receiver::new(),
        }
    }

    /// Starts a packet on the first K of a sync field.
    pub fn open(event: Event, config: &BusConfig) -> Self {
        let mut packet = Self::new(config, false);
        packet.feed(event);
        packet
    }

    /// Low-speed keep-alive: a lone end of packet on an idle bus.
    pub fn keep_alive(event: Event, config: &BusConfig) -> Self {
        check_se0_duration(&event, config, "keep-alive");
        let mut packet = Self::new(config, true);
        packet.events.push(event);
        packet.finalize();
        packet
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    pub fn kind(&self) -> Option<Pid> {
        self.pid.and_then(|pid| Pid::try_from(pid).ok())
    }

    pub fn pid_name(&self) -> Option<&'static str> {
        self.kind().map(Pid::name)
    }

    /// Bytes following the PID, without the CRC16 trailer of data packets.
    pub fn payload(&self) -> &[u8] {
        let end = if self.kind().map_or(false, Pid::is_data) {
            self.bytes.len().saturating_sub(2)
        } else {
            self.bytes.len()
        };
        self.bytes.get(1..end).unwrap_or(&[])
    }

    pub fn start_time(&self) -> f64 {
        self.events.first().map_or(f64::NAN, |e| e.start_time)
    }

    pub fn end_time(&self) -> f64 {
        self.events.last().map_or(f64::NAN, |e| e.end_time)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    pub fn feed(&mut self, event: Event) {
        if self.is_finalized() {
            debug!("{} ignored: packet already finalized", event);
            return;
        }
        self.events.push(event);

        match event.state {
            LineState::Reset => {
                warn!("{} reset in the middle of packet", event);
                self.is_invalid = true;
                self.finalize();
                return;
            }
            LineState::SE0 => {
                check_se0_duration(&event, &self.config, "EOP");
                if self.state != State::Payload && !self.is_invalid {
                    warn!("{} end of packet within the sync pattern", event);
                    self.is_invalid = true;
                }
                self.finalize();
                return;
            }
            LineState::SE1 => {
                warn!("{} unexpected SE1 within packet", event);
                self.is_invalid = true;
                self.finalize();
                return;
            }
            _ => {}
        }

        // out of sync: keep the events for inspection only
        if self.is_invalid {
            return;
        }

        match self.state {
            State::AwaitingSync(position) => self.process_sync(position, &event),
            State::SyncTail => self.process_sync_tail(&event),
            State::Payload => {
                let n = bit_count(&event, &self.config);
                if n == 0 {
                    warn!("{} glitch shorter than half a bit ignored", event);
                    return;
                }
                // an idle bus is a long J
                let level = if event.state == LineState::K {
                    Level::K
                } else {
                    Level::J
                };
                self.add_bits(level, n, &event);
            }
            State::Finalized => unreachable!(),
        }
    }

    fn process_sync(&mut self, position: u8, event: &Event) {
        let expected = if position % 2 == 0 {
            LineState::K
        } else {
            LineState::J
        };
        if event.state != expected {
            warn!(
                "{} wrong sync pattern, expected {}, have {}",
                event, expected, event.state
            );
            self.is_invalid = true;
            return;
        }

        let n = bit_count(event, &self.config);
        if n != 1 {
            warn!("{} expected one sync bit, have {}", event, n);
            self.is_invalid = true;
            return;
        }

        self.state = if position == 5 {
            State::SyncTail
        } else {
            State::AwaitingSync(position + 1)
        };
    }

    fn process_sync_tail(&mut self, event: &Event) {
        if event.state != LineState::K {
            warn!(
                "{} wrong sync pattern, expected K, have {}",
                event, event.state
            );
            self.is_invalid = true;
            return;
        }

        let n = bit_count(event, &self.config);
        if n < 2 {
            warn!("{} expected at least two bits ending the sync", event);
            self.is_invalid = true;
            return;
        }

        self.state = State::Payload;
        if n > 2 {
            // NRZI merged the first payload ones into the sync's last K
            self.add_bits(Level::K, n - 2, event);
        }
    }

    /// NRZI: a level change is a zero, every other bit period a one.
    fn add_bits(&mut self, level: Level, n: u64, event: &Event) {
        let mut ones = n;
        if level != self.rx.level {
            self.rx.level = level;
            ones -= 1;
            if !self.push_bit(false, event) {
                return;
            }
        }
        for _ in 0..ones {
            if !self.push_bit(true, event) {
                return;
            }
        }
    }

    fn push_bit(&mut self, bit: bool, event: &Event) -> bool {
        match self.rx.push(bit) {
            Ok(Some(byte)) => {
                trace!("{} byte {:02x}", event, byte);
                self.bytes.push(byte);
                true
            }
            Ok(None) => true,
            Err(StuffingViolation) => {
                warn!("{} stuff error", event);
                self.is_invalid = true;
                false
            }
        }
    }

    /// Closes the packet and checks PID and CRC. Calling it again does nothing.
    pub fn finalize(&mut self) {
        if self.is_finalized() {
            return;
        }
        self.state = State::Finalized;
        if self.is_keep_alive {
            return;
        }

        if self.rx.bit_count != 0 {
            warn!(
                "[{:.9}] packet byte truncated, {} bit(s) pending",
                self.end_time(),
                self.rx.bit_count
            );
            self.is_invalid = true;
        }

        let first = match self.bytes.first() {
            Some(&first) => first,
            None => {
                if !self.is_invalid {
                    warn!("[{:.9}] packet without PID", self.start_time());
                    self.is_invalid = true;
                }
                return;
            }
        };
        self.pid = Some(first & 0x0F);
        if self.is_invalid {
            return;
        }

        if !pid_check(first) {
            warn!(
                "[{:.9}] PID verification failed, {:#04x}",
                self.start_time(),
                first
            );
            self.is_invalid = true;
            return;
        }

        if self.kind().map_or(false, Pid::is_data) {
            let len = self.bytes.len();
            if len < 3 {
                warn!(
                    "[{:.9}] data packet too short to hold a CRC16, {} byte(s)",
                    self.start_time(),
                    len
                );
                self.is_invalid = true;
                return;
            }

            let expected = crc16(&self.bytes[1..len - 2]);
            let crc = u16::from_be_bytes([self.bytes[len - 2], self.bytes[len - 1]]);
            self.crc = Some(crc);
            self.crc_expected = Some(expected);
            if crc != expected {
                warn!(
                    "[{:.9}] wrong CRC, have {:04x}, should be {:04x}",
                    self.start_time(),
                    crc,
                    expected
                );
                self.is_invalid = true;
            }
        }
    }
}

pub struct PacketIterator<T> {
    it: T,
    config: BusConfig,
    current: Option<Packet>,
}

impl<T> Iterator for PacketIterator<T>
where
    T: Iterator<Item = Event>,
{
    type Item = Packet;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.it.next() {
                Some(event) => event,
                None => {
                    return self.current.take().map(|mut packet| {
                        packet.finalize();
                        packet
                    })
                }
            };

            match self.current.as_mut() {
                Some(packet) => {
                    packet.feed(event);
                    if packet.is_finalized() {
                        return self.current.take();
                    }
                }
                None => match event.state {
                    LineState::K => self.current = Some(Packet::open(event, &self.config)),
                    LineState::SE0 => return Some(Packet::keep_alive(event, &self.config)),
                    LineState::Reset => debug!("{} bus reset", event),
                    LineState::SE1 => warn!("{} unexpected SE1 on idle bus", event),
                    LineState::J | LineState::Idle | LineState::Unknown => {}
                },
            }
        }
    }
}

impl<T> PacketIterator<T> {
    pub fn new(input: T, config: &BusConfig) -> Self {
        Self {
            it: input,
            config: *config,
            current: None,
        }
    }
}

pub trait PacketIteratorExt: Sized {
    fn into_packets(self, config: &BusConfig) -> PacketIterator<Self> {
        PacketIterator::new(self, config)
    }
}
impl<T> PacketIteratorExt for T where T: Iterator<Item = Event> {}
