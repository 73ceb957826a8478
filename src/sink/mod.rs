//! Video sinks.
//!
//! A [`VideoSink`] receives delivered frames in order and encodes them into a
//! container file. The default build writes an uncompressed YUV4MPEG2 stream;
//! the `encode-gstreamer` feature swaps in an H.264/MP4 encoder. [`MemorySink`]
//! records appends without touching the filesystem, for tests.

#[cfg(feature = "encode-gstreamer")]
pub mod gst;
pub mod y4m;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::device::ResolvedParameters;
use crate::frame::Frame;

#[cfg(feature = "encode-gstreamer")]
pub use gst::GstSink;
pub use y4m::Y4mSink;

/// Ordered frame encoding into a container file.
///
/// `finalize` must leave a readable artifact and is safe to call more than
/// once; `append` after `finalize` is an error.
pub trait VideoSink {
    fn append(&mut self, frame: &Frame) -> Result<()>;
    fn finalize(&mut self) -> Result<()>;
    fn frames_written(&self) -> u64;
}

/// File extension the default sink produces.
pub fn default_extension() -> &'static str {
    if cfg!(feature = "encode-gstreamer") {
        "mp4"
    } else {
        "y4m"
    }
}

/// Open the default sink for this build at `path`, sized to the resolved
/// parameters. Fails if the container cannot be opened at the resolved
/// resolution, which the caller treats as fatal.
pub fn open_default(path: &Path, resolved: &ResolvedParameters) -> Result<Box<dyn VideoSink>> {
    #[cfg(feature = "encode-gstreamer")]
    {
        Ok(Box::new(GstSink::open(path, resolved)?))
    }
    #[cfg(not(feature = "encode-gstreamer"))]
    {
        Ok(Box::new(Y4mSink::create(path, resolved)?))
    }
}

/// Frame rate as a reduced rational for container headers.
pub(crate) fn fps_fraction(fps: f64) -> (u32, u32) {
    let num = (fps * 1000.0).round().max(1.0) as u32;
    let den = 1000u32;
    let divisor = gcd(num, den);
    (num / divisor, den / divisor)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[derive(Default)]
struct MemorySinkState {
    frames: Vec<(u32, u32)>,
    finalized: bool,
}

/// In-memory sink for tests: records the dimensions of every appended frame.
///
/// Clones share state, so a test can keep one handle while the acquisition
/// loop consumes the other.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finalized(&self) -> bool {
        self.state.lock().expect("memory sink lock").finalized
    }

    pub fn frame_dimensions(&self) -> Vec<(u32, u32)> {
        self.state.lock().expect("memory sink lock").frames.clone()
    }
}

impl VideoSink for MemorySink {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        let mut state = self.state.lock().expect("memory sink lock");
        if state.finalized {
            return Err(anyhow!("memory sink already finalized"));
        }
        state.frames.push((frame.width(), frame.height()));
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.state.lock().expect("memory sink lock").finalized = true;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.state.lock().expect("memory sink lock").frames.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn fps_fractions_reduce() {
        assert_eq!(fps_fraction(30.0), (30, 1));
        assert_eq!(fps_fraction(29.97), (2997, 100));
        assert_eq!(fps_fraction(0.5), (1, 2));
    }

    #[test]
    fn memory_sink_rejects_append_after_finalize() -> Result<()> {
        let probe = MemorySink::new();
        let mut sink = probe.clone();
        let frame = Frame::new(2, 2, PixelFormat::Mono8, vec![0; 4])?;

        sink.append(&frame)?;
        sink.finalize()?;
        assert!(sink.append(&frame).is_err());
        assert!(probe.finalized());
        assert_eq!(probe.frames_written(), 1);
        Ok(())
    }
}
