//! Uncompressed YUV4MPEG2 sink.
//!
//! The default container for builds without a system encoder: a fixed textual
//! stream header followed by `FRAME` markers and raw luma planes (`Cmono`
//! colourspace). Playable with standard tooling and trivially inspectable in
//! tests.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{fps_fraction, VideoSink};
use crate::device::ResolvedParameters;
use crate::frame::Frame;

pub struct Y4mSink {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl Y4mSink {
    pub fn create(path: &Path, resolved: &ResolvedParameters) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create video file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let (num, den) = fps_fraction(resolved.frame_rate);
        writeln!(
            writer,
            "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 Cmono",
            resolved.width, resolved.height, num, den
        )?;

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            width: resolved.width,
            height: resolved.height,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VideoSink for Y4mSink {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("video sink already finalized"))?;
        if frame.width() != self.width || frame.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match container {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        writeln!(writer, "FRAME")?;
        writer.write_all(frame.luma_plane().as_ref())?;
        self.frames_written += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flush video file {}", self.path.display()))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for Y4mSink {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExposureMode;
    use crate::frame::PixelFormat;

    fn resolved(width: u32, height: u32, fps: f64) -> ResolvedParameters {
        ResolvedParameters {
            camera_model: "StubCam-4K".to_string(),
            frame_rate: fps,
            width,
            height,
            pixel_format: PixelFormat::Mono8,
            exposure_mode: ExposureMode::Off,
            exposure_time_us: 10_000.0,
            tick_frequency_hz: 1e9,
        }
    }

    #[test]
    fn writes_stream_header_and_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("video.y4m");
        let mut sink = Y4mSink::create(&path, &resolved(4, 2, 30.0))?;

        for value in 0..3u8 {
            sink.append(&Frame::new(4, 2, PixelFormat::Mono8, vec![value; 8])?)?;
        }
        sink.finalize()?;
        assert_eq!(sink.frames_written(), 3);

        let bytes = std::fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("YUV4MPEG2 W4 H2 F30:1 Ip A1:1 Cmono\n"));
        assert_eq!(text.matches("FRAME\n").count(), 3);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_frame_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("video.y4m");
        let mut sink = Y4mSink::create(&path, &resolved(4, 2, 30.0))?;

        let wrong = Frame::new(2, 2, PixelFormat::Mono8, vec![0; 4])?;
        assert!(sink.append(&wrong).is_err());
        Ok(())
    }

    #[test]
    fn finalize_is_idempotent_and_closes_the_sink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("video.y4m");
        let mut sink = Y4mSink::create(&path, &resolved(4, 2, 30.0))?;

        sink.finalize()?;
        sink.finalize()?;
        let frame = Frame::new(4, 2, PixelFormat::Mono8, vec![0; 8])?;
        assert!(sink.append(&frame).is_err());
        Ok(())
    }
}
