//! timing_check - offline verifier for chronocam timing logs.
//!
//! Re-checks the invariants the recorder guarantees, without trusting the
//! runtime that wrote the file:
//! - header block shape (title, 6 metadata rows, blank line, column header)
//! - contiguous sequence numbers starting at 0, no gaps or repeats
//! - monotonically non-decreasing device time across successful rows
//! - parseable host timestamps and device seconds / error markers

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "timing_check",
    about = "Verify a chronocam timing log (header shape + sequence/clock invariants)"
)]
struct Args {
    /// Path to the timing log (videolog_*.csv)
    log: PathBuf,

    /// Print every row as it is checked
    #[arg(short, long)]
    verbose: bool,
}

const COLUMN_HEADER: &str = "Frame,PC Timestamp,Camera Time";
const METADATA_KEYS: [&str; 6] = [
    "Camera Model",
    "FPS (Target)",
    "FPS (Actual)",
    "Auto Exposure Mode",
    "Exposure Time",
    "Resolution",
];

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let contents = std::fs::read_to_string(&args.log)
        .with_context(|| format!("read timing log {}", args.log.display()))?;
    let lines: Vec<&str> = contents.lines().collect();

    check_header(&lines)?;

    let mut rows = 0u64;
    let mut errors = 0u64;
    let mut last_device_seconds: Option<f64> = None;

    for (index, line) in lines.iter().enumerate().skip(9) {
        let row = index + 1;
        let mut fields = line.splitn(3, ',');
        let (sequence, host, device) = match (fields.next(), fields.next(), fields.next()) {
            (Some(sequence), Some(host), Some(device)) => (sequence, host, device),
            _ => return Err(anyhow!("line {}: expected 3 comma-delimited fields", row)),
        };

        let sequence: u64 = sequence
            .parse()
            .with_context(|| format!("line {}: bad sequence number {:?}", row, sequence))?;
        if sequence != rows {
            return Err(anyhow!(
                "line {}: sequence {} breaks contiguity (expected {})",
                row,
                sequence,
                rows
            ));
        }

        check_host_timestamp(host).with_context(|| format!("line {}", row))?;

        if device.starts_with("error[0x") {
            errors += 1;
        } else {
            let seconds: f64 = device
                .parse()
                .with_context(|| format!("line {}: bad device time {:?}", row, device))?;
            if let Some(last) = last_device_seconds {
                if seconds < last {
                    return Err(anyhow!(
                        "line {}: device time {} regresses below {}",
                        row,
                        seconds,
                        last
                    ));
                }
            }
            last_device_seconds = Some(seconds);
        }

        if args.verbose {
            println!("  row {}: OK ({})", sequence, device);
        }
        rows += 1;
    }

    if rows == 0 {
        return Err(anyhow!("no data rows (not even the start marker)"));
    }

    println!(
        "{}: OK — {} rows (sequences 0..={}), {} failed attempts",
        args.log.display(),
        rows,
        rows - 1,
        errors
    );
    Ok(())
}

fn check_header(lines: &[&str]) -> Result<()> {
    if lines.len() < 9 {
        return Err(anyhow!("truncated header: {} lines", lines.len()));
    }
    if lines[0] != "Camera Parameters" {
        return Err(anyhow!("line 1: expected \"Camera Parameters\" title"));
    }
    for (offset, key) in METADATA_KEYS.iter().enumerate() {
        let line = lines[1 + offset];
        let found = line.split(',').next().unwrap_or("");
        if found != *key {
            return Err(anyhow!(
                "line {}: expected metadata key {:?}, found {:?}",
                offset + 2,
                key,
                found
            ));
        }
    }
    if !lines[7].is_empty() {
        return Err(anyhow!("line 8: expected blank separator line"));
    }
    if lines[8] != COLUMN_HEADER {
        return Err(anyhow!("line 9: expected column header {:?}", COLUMN_HEADER));
    }
    Ok(())
}

/// `YYYY-mm-dd HH:MM:SS.uuuuuu` with zero-padded microseconds.
fn check_host_timestamp(value: &str) -> Result<()> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.6f")
        .map(|_| ())
        .with_context(|| format!("bad host timestamp {:?}", value))?;
    let fraction = value
        .rsplit_once('.')
        .map(|(_, fraction)| fraction)
        .unwrap_or("");
    if fraction.len() != 6 {
        return Err(anyhow!(
            "host timestamp {:?} must carry 6 microsecond digits",
            value
        ));
    }
    Ok(())
}
