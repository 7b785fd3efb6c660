use thiserror::Error;

/// Conditions that make a whole capture undecodable.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Capture contains no sample")]
    EmptyCapture,

    #[error("Sample #{index} at {time}s comes before the previous sample at {previous}s")]
    UnorderedSamples {
        index: usize,
        time: f64,
        previous: f64,
    },

    #[error("None of the {0} samples resolves to a line state. Check the channel scale.")]
    NoLineState(usize),
}
