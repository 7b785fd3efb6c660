use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use usb_ls_trace_parser::sink::{DumpOptions, PrintSink};
use usb_ls_trace_parser::source::{self, DMinusChannel};
use usb_ls_trace_parser::usb::{self, BusConfig};

/// Decodes USB low-speed packets from an oscilloscope capture of D+ and D-.
#[derive(Debug, StructOpt)]
#[structopt(setting = clap::AppSettings::ColoredHelp)]
struct Opt {
    /// CSV export of the capture, or a zip archive holding one.
    #[structopt(parse(from_os_str))]
    file: PathBuf,

    /// Oscilloscope channel connected to D- (1 or 2).
    #[structopt(long = "dminus", default_value = "1")]
    d_minus: DMinusChannel,

    /// Produce output for debug LEDs.
    #[structopt(long)]
    dbg_leds: bool,

    /// Input low voltage threshold, in volts.
    #[structopt(long)]
    vil: Option<f64>,

    /// Input high voltage threshold, in volts.
    #[structopt(long)]
    vih: Option<f64>,

    /// Differential input sensitivity, in volts.
    #[structopt(long)]
    vdi: Option<f64>,

    /// Verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

impl Opt {
    fn bus_config(&self) -> BusConfig {
        let mut config = BusConfig::default();
        if let Some(vil) = self.vil {
            config.vil = vil;
        }
        if let Some(vih) = self.vih {
            config.vih = vih;
        }
        if let Some(vdi) = self.vdi {
            config.vdi = vdi;
        }
        config
    }
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default subscriber")?;

    let config = opt.bus_config();
    anyhow::ensure!(
        config.vil < config.vih,
        "Vil ({}) must be lower than Vih ({})",
        config.vil,
        config.vih
    );

    let samples = source::load(&opt.file, opt.d_minus)?;
    let packets = usb::decode(&samples, &config)
        .with_context(|| format!("Decoding {}", opt.file.display()))?;

    info!("{} packets found", packets.len());
    let invalid = packets.iter().filter(|p| p.is_invalid).count();
    if invalid != 0 {
        warn!("{} invalid packet(s)", invalid);
    }

    PrintSink::new(
        packets.iter(),
        DumpOptions {
            dbg_leds: opt.dbg_leds,
        },
    )
    .for_each(|_| {});

    Ok(())
}
