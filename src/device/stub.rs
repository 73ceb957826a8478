//! Synthetic camera backend.
//!
//! The stub models enough of a machine-vision camera to exercise every path of
//! the acquisition loop without hardware: parameter negotiation with clamping,
//! frame pacing against the resolved rate, a nanosecond tick counter with
//! simulated latch delay, and deterministic injection of per-frame grab
//! failures or a stalled stream.

use rand::Rng;
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use super::{CameraDevice, DeviceError, Grab, ResolvedParameters};
use crate::clock::TimestampSource;
use crate::config::{CropPreset, SessionConfig};
use crate::frame::{Frame, PixelFormat};
use crate::record::GrabFailure;

/// Stub tick counter runs at 1 GHz: 1 tick = 1 ns.
pub const STUB_TICK_HZ: f64 = 1e9;

/// Upper bound on the simulated latch delay, in nanoseconds.
const LATCH_JITTER_NS: u64 = 50_000;

/// Device code reported for injected grab failures.
pub const STUB_GRAB_FAILURE_CODE: u32 = 0xE100_0014;

const NATIVE_RESOLUTION: (u32, u32) = (3840, 2160);
const DEFAULT_EXPOSURE_US: f64 = 10_000.0;

fn max_frame_rate(width: u32, height: u32) -> f64 {
    match (width, height) {
        (1280, 720) => 120.0,
        (1920, 1080) => 60.0,
        _ => 45.0,
    }
}

#[derive(Debug)]
pub struct StubCamera {
    name: String,
    opened_at: Instant,
    resolved: Option<ResolvedParameters>,
    streaming: bool,
    stream_started_at: Option<Instant>,
    attempts: u64,
    frame_limit: Option<u64>,
    fail_attempts: HashSet<u64>,
    stall_attempt: Option<u64>,
}

impl StubCamera {
    pub fn open(name: &str) -> Self {
        log::info!("StubCamera: opened stub://{}", name);
        Self {
            name: name.to_string(),
            opened_at: Instant::now(),
            resolved: None,
            streaming: false,
            stream_started_at: None,
            attempts: 0,
            frame_limit: None,
            fail_attempts: HashSet::new(),
            stall_attempt: None,
        }
    }

    /// Report a grab failure (stream stays alive) on the given attempt numbers.
    /// Attempt numbers are 1-based, matching the records' sequence numbers.
    pub fn with_grab_failures(mut self, attempts: &[u64]) -> Self {
        self.fail_attempts = attempts.iter().copied().collect();
        self
    }

    /// Simulate a stalled stream: the given attempt times out instead of
    /// resolving.
    pub fn with_stall_at(mut self, attempt: u64) -> Self {
        self.stall_attempt = Some(attempt);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn synthetic_frame(&self, width: u32, height: u32, attempt: u64) -> Frame {
        // Simple moving gradient; varies per attempt so frames are distinct.
        let mut data = vec![0u8; (width * height) as usize];
        for (i, px) in data.iter_mut().enumerate() {
            *px = ((i as u64 + attempt) % 256) as u8;
        }
        Frame::new(width, height, PixelFormat::Mono8, data)
            .unwrap_or_else(|_| unreachable!("stub frame buffer is sized to its dimensions"))
    }
}

impl TimestampSource for StubCamera {
    fn latch_ticks(&mut self) -> Result<u64, DeviceError> {
        // Elapsed monotonic nanoseconds since open, plus the simulated delay
        // between requesting the latch and the value becoming readable.
        let elapsed = self.opened_at.elapsed().as_nanos() as u64;
        let jitter = rand::thread_rng().gen_range(0..LATCH_JITTER_NS);
        Ok(elapsed + jitter)
    }
}

impl CameraDevice for StubCamera {
    fn apply_config(&mut self, config: &SessionConfig) -> Result<ResolvedParameters, DeviceError> {
        // Crop requests resolve exactly; native means the full sensor.
        let (width, height) = match config.crop().requested_resolution() {
            Some(resolution) => resolution,
            None => NATIVE_RESOLUTION,
        };

        let frame_rate = config.frame_rate().min(max_frame_rate(width, height));
        let exposure_time_us = config
            .exposure_time_us()
            .unwrap_or(DEFAULT_EXPOSURE_US)
            // Exposure cannot exceed the frame interval.
            .min(1e6 / frame_rate);

        let resolved = ResolvedParameters {
            camera_model: "StubCam-4K".to_string(),
            frame_rate,
            width,
            height,
            pixel_format: PixelFormat::Mono8,
            exposure_mode: config.exposure_mode(),
            exposure_time_us,
            tick_frequency_hz: STUB_TICK_HZ,
        };
        log::debug!(
            "StubCamera: resolved {}x{} @ {} fps (requested {} fps)",
            width,
            height,
            frame_rate,
            config.frame_rate()
        );
        self.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    fn start_streaming(&mut self, frame_limit: Option<u64>) -> Result<(), DeviceError> {
        if self.resolved.is_none() {
            return Err(DeviceError::Unavailable(
                "apply_config must run before streaming".to_string(),
            ));
        }
        self.streaming = true;
        self.stream_started_at = Some(Instant::now());
        self.attempts = 0;
        self.frame_limit = frame_limit;
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Grab, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }
        let resolved = self
            .resolved
            .as_ref()
            .ok_or(DeviceError::NotStreaming)?
            .clone();
        let started = self
            .stream_started_at
            .ok_or(DeviceError::NotStreaming)?;

        let attempt = self.attempts + 1;
        if let Some(limit) = self.frame_limit {
            if self.attempts >= limit {
                return Err(DeviceError::StreamFault(
                    "acquisition already complete".to_string(),
                ));
            }
        }
        if self.stall_attempt == Some(attempt) {
            return Err(DeviceError::Timeout(timeout));
        }

        // Pace delivery to the resolved frame rate: attempt N is due N
        // intervals after streaming started.
        let interval = Duration::from_secs_f64(1.0 / resolved.frame_rate);
        let due = started + interval * attempt as u32;
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                return Err(DeviceError::Timeout(timeout));
            }
            thread::sleep(wait);
        }

        self.attempts = attempt;
        if self.fail_attempts.contains(&attempt) {
            return Ok(Grab::Failed(GrabFailure {
                code: STUB_GRAB_FAILURE_CODE,
                description: "image buffer incompletely grabbed".to_string(),
            }));
        }
        Ok(Grab::Frame(self.synthetic_frame(
            resolved.width,
            resolved.height,
            attempt,
        )))
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.streaming = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExposureMode;

    fn config(fps: f64, frames: Option<u64>, crop: CropPreset) -> SessionConfig {
        SessionConfig::new(Some(fps), frames, ExposureMode::Off, None, crop)
            .expect("valid test config")
    }

    #[test]
    fn crop_presets_resolve_exactly() -> anyhow::Result<()> {
        let mut camera = StubCamera::open("test");
        let native = camera.apply_config(&config(30.0, None, CropPreset::Native))?;
        assert_eq!((native.width, native.height), NATIVE_RESOLUTION);

        let crop = camera.apply_config(&config(30.0, None, CropPreset::Crop720p))?;
        assert_eq!((crop.width, crop.height), (1280, 720));
        Ok(())
    }

    #[test]
    fn frame_rate_clamps_to_resolution_maximum() -> anyhow::Result<()> {
        let mut camera = StubCamera::open("test");
        let resolved = camera.apply_config(&config(500.0, None, CropPreset::Native))?;
        assert_eq!(resolved.frame_rate, 45.0);

        let resolved = camera.apply_config(&config(500.0, None, CropPreset::Crop720p))?;
        assert_eq!(resolved.frame_rate, 120.0);
        Ok(())
    }

    #[test]
    fn delivers_frames_until_limit() -> anyhow::Result<()> {
        let mut camera = StubCamera::open("test");
        camera.apply_config(&config(120.0, Some(3), CropPreset::Crop720p))?;
        camera.start_streaming(Some(3))?;

        for _ in 0..3 {
            match camera.next_frame(Duration::from_secs(5)) {
                Ok(Grab::Frame(frame)) => {
                    assert_eq!(frame.width(), 1280);
                    assert_eq!(frame.format(), PixelFormat::Mono8);
                }
                other => panic!("expected a frame, got {:?}", other),
            }
        }
        assert!(matches!(
            camera.next_frame(Duration::from_secs(5)),
            Err(DeviceError::StreamFault(_))
        ));
        Ok(())
    }

    #[test]
    fn injected_failures_keep_the_stream_alive() -> anyhow::Result<()> {
        let mut camera =
            StubCamera::open("test").with_grab_failures(&[2]);
        camera.apply_config(&config(120.0, None, CropPreset::Crop720p))?;
        camera.start_streaming(None)?;

        assert!(matches!(
            camera.next_frame(Duration::from_secs(5))?,
            Grab::Frame(_)
        ));
        match camera.next_frame(Duration::from_secs(5))? {
            Grab::Failed(failure) => assert_eq!(failure.code, STUB_GRAB_FAILURE_CODE),
            other => panic!("expected injected failure, got {:?}", other),
        }
        assert!(matches!(
            camera.next_frame(Duration::from_secs(5))?,
            Grab::Frame(_)
        ));
        Ok(())
    }

    #[test]
    fn stall_surfaces_as_timeout() -> anyhow::Result<()> {
        let mut camera = StubCamera::open("test").with_stall_at(1);
        camera.apply_config(&config(120.0, None, CropPreset::Crop720p))?;
        camera.start_streaming(None)?;

        assert!(matches!(
            camera.next_frame(Duration::from_secs(5)),
            Err(DeviceError::Timeout(_))
        ));
        Ok(())
    }

    #[test]
    fn grabbing_before_streaming_is_rejected() {
        let mut camera = StubCamera::open("test");
        assert!(matches!(
            camera.next_frame(Duration::from_secs(1)),
            Err(DeviceError::NotStreaming)
        ));
    }

    #[test]
    fn latched_ticks_are_usable_by_the_correlator() -> anyhow::Result<()> {
        let mut camera = StubCamera::open("test");
        let mut correlator = crate::clock::ClockCorrelator::new(STUB_TICK_HZ);
        let first = correlator.capture(&mut camera)?;
        let second = correlator.capture(&mut camera)?;
        assert!(second.device_ticks() >= first.device_ticks());
        Ok(())
    }
}
