//! Structured per-frame timing log.
//!
//! Artifact format (comma-delimited text):
//!
//! ```text
//! Camera Parameters
//! Camera Model,<model>
//! FPS (Target),<requested>
//! FPS (Actual),<resolved>
//! Auto Exposure Mode,<mode>
//! Exposure Time,<microseconds>
//! Resolution,<w>x<h>
//!
//! Frame,PC Timestamp,Camera Time
//! 0,2026-08-07 10:12:01.123456,12.345678
//! ```
//!
//! Rows appear in delivery order, one per resolved attempt plus the sequence-0
//! start marker. Failed attempts keep their host timestamp; the device-time
//! column carries an error marker instead.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::record::{FrameOutcome, FrameRecord, SessionHeader};

pub struct TimingLog {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    tick_frequency_hz: f64,
    rows_written: u64,
}

impl TimingLog {
    /// Create the log file and write the header block and column header.
    pub fn create(path: &Path, header: &SessionHeader, tick_frequency_hz: f64) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create timing log {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "Camera Parameters")?;
        writeln!(writer, "Camera Model,{}", header.camera_model)?;
        writeln!(writer, "FPS (Target),{}", header.fps_requested)?;
        writeln!(writer, "FPS (Actual),{}", header.fps_actual)?;
        writeln!(writer, "Auto Exposure Mode,{}", header.exposure_mode)?;
        writeln!(writer, "Exposure Time,{}", header.exposure_time_us)?;
        writeln!(writer, "Resolution,{}x{}", header.width, header.height)?;
        writeln!(writer)?;
        writeln!(writer, "Frame,PC Timestamp,Camera Time")?;

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            tick_frequency_hz,
            rows_written: 0,
        })
    }

    /// Append one row. Rows are written in call order; flushing happens on
    /// close.
    pub fn append(&mut self, record: &FrameRecord) -> Result<()> {
        let tick_frequency_hz = self.tick_frequency_hz;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("timing log is closed"))?;

        let clocks = record.clocks();
        match record.outcome() {
            FrameOutcome::Start | FrameOutcome::Delivered => writeln!(
                writer,
                "{},{},{:.6}",
                record.sequence(),
                clocks.host_timestamp(),
                clocks.device_seconds(tick_frequency_hz)
            )?,
            FrameOutcome::Failed(failure) => writeln!(
                writer,
                "{},{},error[0x{:08x}] {}",
                record.sequence(),
                clocks.host_timestamp(),
                failure.code,
                // Keep the row 3-delimited.
                failure.description.replace(',', ";")
            )?,
        }

        self.rows_written += 1;
        Ok(())
    }

    /// Flush and release the file handle. Idempotent; safe on a log that was
    /// never opened or is already closed.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flush timing log {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl Drop for TimingLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockCorrelator, TimestampSource};
    use crate::config::ExposureMode;
    use crate::device::DeviceError;
    use crate::record::GrabFailure;

    struct FixedTicks(u64);

    impl TimestampSource for FixedTicks {
        fn latch_ticks(&mut self) -> Result<u64, DeviceError> {
            self.0 += 1_000_000;
            Ok(self.0)
        }
    }

    fn header() -> SessionHeader {
        SessionHeader {
            camera_model: "StubCam-4K".to_string(),
            fps_requested: 30.0,
            fps_actual: 30.0,
            exposure_mode: ExposureMode::Off,
            exposure_time_us: 10_000.0,
            width: 1920,
            height: 1080,
        }
    }

    fn capture(source: &mut FixedTicks) -> crate::clock::ClockPair {
        ClockCorrelator::new(1e9)
            .capture(source)
            .expect("scripted capture")
    }

    #[test]
    fn header_block_has_expected_shape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("videolog.csv");
        let mut log = TimingLog::create(&path, &header(), 1e9)?;
        log.close()?;

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Camera Parameters");
        assert_eq!(lines[1], "Camera Model,StubCam-4K");
        assert_eq!(lines[6], "Resolution,1920x1080");
        assert_eq!(lines[7], "");
        assert_eq!(lines[8], "Frame,PC Timestamp,Camera Time");
        assert_eq!(lines.len(), 9);
        Ok(())
    }

    #[test]
    fn rows_carry_sequence_host_and_device_time() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("videolog.csv");
        let mut ticks = FixedTicks(0);

        let mut log = TimingLog::create(&path, &header(), 1e9)?;
        log.append(&FrameRecord::start(capture(&mut ticks)))?;
        log.append(&FrameRecord::delivered(1, capture(&mut ticks)))?;
        log.append(&FrameRecord::failed(
            2,
            capture(&mut ticks),
            GrabFailure {
                code: 0xE100_0014,
                description: "incomplete, retry later".to_string(),
            },
        ))?;
        assert_eq!(log.rows_written(), 3);
        log.close()?;

        let contents = std::fs::read_to_string(&path)?;
        let rows: Vec<&str> = contents.lines().skip(9).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("0,"));
        assert!(rows[0].ends_with("0.001000"));
        assert!(rows[1].starts_with("1,"));
        // Error marker replaces the device time; commas in the description are
        // sanitized so the row stays 3-delimited.
        assert!(rows[2].contains("error[0xe1000014] incomplete; retry later"));
        assert_eq!(rows[2].matches(',').count(), 2);
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_append_after_close_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("videolog.csv");
        let mut ticks = FixedTicks(0);

        let mut log = TimingLog::create(&path, &header(), 1e9)?;
        log.close()?;
        log.close()?;
        assert!(log.append(&FrameRecord::start(capture(&mut ticks))).is_err());
        Ok(())
    }
}
