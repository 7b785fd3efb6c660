use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::usb::Sample;

/// Rows of titles preceding the samples in an oscilloscope export.
const TITLE_ROWS: usize = 2;

/// Oscilloscope channel wired to D-. The other one carries D+.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DMinusChannel {
    #[default]
    One,
    Two,
}

impl FromStr for DMinusChannel {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(DMinusChannel::One),
            "2" => Ok(DMinusChannel::Two),
            other => Err(anyhow!(
                "D- line should be bound to either channel 1 or 2, not {:?}",
                other
            )),
        }
    }
}

/// Reads `time, channel 1, channel 2` rows.
pub fn read_samples<R: Read>(input: R, d_minus: DMinusChannel) -> Result<Vec<Sample>> {
    // display something while processing
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template(" {spinner} {msg}")?,
    );
    progress_bar.set_message("Importing samples");
    progress_bar.enable_steady_tick(Duration::from_millis(80));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let samples = reader
        .records()
        .enumerate()
        .skip(TITLE_ROWS)
        .map(|(idx, record)| -> Result<Sample> {
            let row = idx + 1;
            let record = record.with_context(|| format!("Reading row {}", row))?;
            let column = |n: usize| -> Result<f64> {
                let cell = record
                    .get(n)
                    .ok_or_else(|| anyhow!("Row {} has no column {}", row, n + 1))?;
                cell.parse()
                    .with_context(|| format!("Row {}, column {}: {:?}", row, n + 1, cell))
            };

            let (time, first, second) = (column(0)?, column(1)?, column(2)?);
            Ok(match d_minus {
                DMinusChannel::One => Sample::new(time, first, second),
                DMinusChannel::Two => Sample::new(time, second, first),
            })
        })
        .collect::<Result<Vec<_>>>();

    progress_bar.finish_and_clear();
    samples
}

/// Loads a CSV capture, or the first entry of a zip archive holding one.
pub fn load(path: &Path, d_minus: DMinusChannel) -> Result<Vec<Sample>> {
    info!("Processing file {:?}", path);
    let file =
        File::open(path).with_context(|| format!("Opening capture file {}", path.display()))?;

    let is_zip = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"));
    let samples = if is_zip {
        let mut archive = zip::ZipArchive::new(file).context("Reading zip archive")?;
        let entry = archive
            .by_index(0)
            .context("Opening the first file of the archive")?;
        read_samples(entry, d_minus)
    } else {
        read_samples(BufReader::new(file), d_minus)
    };
    let samples = samples.with_context(|| format!("Importing {}", path.display()))?;

    info!("{} samples imported", samples.len());
    Ok(samples)
}
