//! Decodes USB low-speed traffic from analog captures of the D- and D+ lines.
//!
//! The pipeline is made of lazy iterator stages:
//! samples → [`usb::Event`]s → [`usb::Packet`]s, followed by a pass annotating
//! tokens and SETUP requests with their fields. [`usb::decode`] runs all of it
//! over an in-memory capture.

mod error;

pub mod sink;
pub mod source;
pub mod usb;

pub use error::Error;
