//! Capture file readers producing [`Sample`](crate::usb::Sample)s.

mod oscilloscope;

pub use oscilloscope::{load, read_samples, DMinusChannel};
