//! sct - take screenshots of one or more monitors from the command line.

use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;

use sct::{CaptureOptions, Monitor, SaveOutput, SaveRequest};

#[derive(Parser, Debug)]
#[command(
    name = "sct",
    version,
    about = "Capture screenshots of one or more monitors as PNG files"
)]
struct Cli {
    /// Capture an arbitrary region instead of a monitor.
    #[arg(short, long, value_name = "TOP,LEFT,WIDTH,HEIGHT")]
    coordinates: Option<String>,

    /// PNG compression level (0..=9).
    #[arg(short, long, default_value_t = 6)]
    level: u32,

    /// Monitor selector: -1 combined virtual monitor, 0 every monitor,
    /// N monitor N.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    monitor: i32,

    /// Output filename template. Placeholders: {mon}, {top}, {left},
    /// {width}, {height}, {date}. Use "-" to stream PNG bytes to stdout.
    #[arg(short, long, default_value = "monitor-{mon}.png")]
    output: String,

    /// Include the mouse cursor where the platform supports it.
    #[arg(long)]
    with_cursor: bool,

    /// Do not print the path of each created file.
    #[arg(short, long)]
    quiet: bool,

    /// Print the monitor list as JSON and exit.
    #[arg(long)]
    list: bool,

    /// X display name, e.g. ":0.0" (Linux only; defaults to $DISPLAY).
    #[arg(short, long)]
    display: Option<String>,

    /// Capture backend (Linux only): default|xshmgetimage|xgetimage|xlib.
    #[arg(short, long)]
    backend: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let options = CaptureOptions {
        compression_level: cli.level,
        display: cli.display.clone(),
        with_cursor: cli.with_cursor,
        backend: match cli.backend.as_deref() {
            Some(name) => name.parse()?,
            None => Default::default(),
        },
        ..Default::default()
    };
    let session = sct::open(options).context("cannot open a capture session")?;

    if cli.list {
        let monitors = session.monitors()?;
        println!("{}", serde_json::to_string_pretty(&monitors)?);
        return Ok(());
    }

    if let Some(spec) = &cli.coordinates {
        let region = parse_coordinates(spec)?;
        let shot = session.grab(region)?;
        if cli.output == "-" {
            std::io::stdout().write_all(&shot.to_png(cli.level)?)?;
            return Ok(());
        }
        let request = SaveRequest {
            selector: cli.monitor,
            template: cli.output.clone(),
            date_format: None,
        };
        let path = request.resolve(cli.monitor, &region);
        sct::png::save(&path, shot.raw(), shot.size(), cli.level)?;
        if !cli.quiet {
            println!("{path}");
        }
        return Ok(());
    }

    let request = SaveRequest {
        selector: cli.monitor,
        template: cli.output.clone(),
        date_format: None,
    };
    for result in session.save(request) {
        match result.context("capture failed")? {
            SaveOutput::File(path) => {
                if !cli.quiet {
                    println!("{}", path.display());
                }
            }
            SaveOutput::Bytes(bytes) => {
                std::io::stdout().write_all(&bytes)?;
            }
        }
    }
    Ok(())
}

/// Parses the `--coordinates` value: `TOP,LEFT,WIDTH,HEIGHT`.
fn parse_coordinates(spec: &str) -> Result<Monitor> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        bail!("expected TOP,LEFT,WIDTH,HEIGHT, got {spec:?}");
    }
    let top: i32 = parts[0].parse().context("bad TOP value")?;
    let left: i32 = parts[1].parse().context("bad LEFT value")?;
    let width: u32 = parts[2].parse().context("bad WIDTH value")?;
    let height: u32 = parts[3].parse().context("bad HEIGHT value")?;
    Ok(Monitor::new(left, top, width, height))
}

/// Logging goes to stderr, filtered by the SCT_LOG variable.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("SCT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    if tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .try_init()
        .is_err()
    {
        warn!("tracing subscriber was already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn coordinates_parse_in_top_left_order() {
        let region = parse_coordinates("20, 10, 100, 50").unwrap();
        assert_eq!(region, Monitor::new(10, 20, 100, 50));
        assert!(parse_coordinates("1,2,3").is_err());
        assert!(parse_coordinates("a,b,c,d").is_err());
        assert!(parse_coordinates("0,0,100,-5").is_err());
    }
}
