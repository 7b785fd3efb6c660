use super::BusConfig;
use std::fmt;

/// One oscilloscope sample of both data lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub d_minus: f64,
    pub d_plus: f64,
}

impl Sample {
    pub fn new(time: f64, d_minus: f64, d_plus: f64) -> Self {
        Self {
            time,
            d_minus,
            d_plus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    J,
    K,
    SE0,
    SE1,
    /// SE0 held long enough to reset the device.
    Reset,
    /// J held longer than any legal bit train.
    Idle,
    Unknown,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineState::J => "J",
            LineState::K => "K",
            LineState::SE0 => "SE0",
            LineState::SE1 => "SE1",
            LineState::Reset => "RESET",
            LineState::Idle => "IDLE",
            LineState::Unknown => "NONE",
        })
    }
}

/// Turns voltage pairs into raw line states.
///
/// Single-ended states need two consecutive samples to be confirmed: the first
/// one is reported as `Unknown`. This keeps a skew between D- and D+ crossing
/// from showing up as a spurious SE0 or SE1.
#[derive(Debug, Clone)]
pub struct Classifier {
    vil: f64,
    vih: f64,
    vdi: f64,
    pending_low: u8,
    pending_high: u8,
}

impl Classifier {
    const CONFIRMATION: u8 = 2;

    pub fn new(config: &BusConfig) -> Self {
        Self {
            vil: config.vil,
            vih: config.vih,
            vdi: config.vdi,
            pending_low: 0,
            pending_high: 0,
        }
    }

    pub fn classify(&mut self, d_minus: f64, d_plus: f64) -> LineState {
        if d_minus < self.vil && d_plus < self.vil {
            self.pending_high = 0;
            self.pending_low = (self.pending_low + 1).min(Self::CONFIRMATION);
            return if self.pending_low == Self::CONFIRMATION {
                LineState::SE0
            } else {
                LineState::Unknown
            };
        }
        if d_minus > self.vih && d_plus > self.vih {
            self.pending_low = 0;
            self.pending_high = (self.pending_high + 1).min(Self::CONFIRMATION);
            return if self.pending_high == Self::CONFIRMATION {
                LineState::SE1
            } else {
                LineState::Unknown
            };
        }

        self.pending_low = 0;
        self.pending_high = 0;
        if d_plus - d_minus > self.vdi {
            LineState::K
        } else if d_minus - d_plus > self.vdi {
            LineState::J
        } else {
            LineState::Unknown
        }
    }
}

/// A maximal run of samples in the same line state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub start_time: f64,
    pub end_time: f64,
    pub state: LineState,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.9} {:.2}us {}]",
            self.start_time,
            self.duration() * 1e6,
            self.state
        )
    }
}

impl Event {
    fn open(time: f64, state: LineState, config: &BusConfig) -> Self {
        let mut event = Self {
            start_time: time,
            end_time: time,
            state,
        };
        event.promote(config);
        event
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    fn promote(&mut self, config: &BusConfig) {
        let duration = self.duration();
        match self.state {
            LineState::J if duration > config.idle_threshold() => self.state = LineState::Idle,
            LineState::SE0 if duration > config.reset_threshold => self.state = LineState::Reset,
            _ => {}
        }
    }

    /// Returns false when the sample belongs to the next event. The event is
    /// then closed at that sample's time.
    fn feed(&mut self, time: f64, state: LineState, config: &BusConfig) -> bool {
        self.end_time = time;
        match (self.state, state) {
            (LineState::Unknown, _) => self.state = state,
            (current, new) if current == new => {}
            (LineState::Idle, LineState::J) | (LineState::Reset, LineState::SE0) => {}
            _ => return false,
        }
        self.promote(config);
        true
    }
}

pub struct EventIterator<T> {
    it: T,
    config: BusConfig,
    classifier: Classifier,
    current: Option<Event>,
}

impl<T> Iterator for EventIterator<T>
where
    T: Iterator<Item = Sample>,
{
    type Item = Event;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sample = match self.it.next() {
                Some(sample) => sample,
                // a trailing run that never resolved carries no information
                None => return self.current.take().filter(|e| e.state != LineState::Unknown),
            };
            let state = self.classifier.classify(sample.d_minus, sample.d_plus);

            match self.current.as_mut() {
                None => self.current = Some(Event::open(sample.time, state, &self.config)),
                Some(event) => {
                    if !event.feed(sample.time, state, &self.config) {
                        let next = Event::open(sample.time, state, &self.config);
                        return self.current.replace(next);
                    }
                }
            }
        }
    }
}

impl<T> EventIterator<T> {
    pub fn new(input: T, config: &BusConfig) -> Self {
        Self {
            it: input,
            config: *config,
            classifier: Classifier::new(config),
            current: None,
        }
    }
}

pub trait EventIteratorExt: Sized {
    fn into_events(self, config: &BusConfig) -> EventIterator<Self> {
        EventIterator::new(self, config)
    }
}
impl<T> EventIteratorExt for T where T: Iterator<Item = Sample> {}
