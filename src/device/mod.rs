//! Camera device sessions.
//!
//! This module defines the contract the acquisition loop consumes:
//! - Scoped acquisition of the device handle (`Camera::open`, released on drop)
//! - `apply_config`: negotiate acquisition parameters, returning what the device
//!   actually agreed to
//! - `start_streaming` / bounded-wait `next_frame` / idempotent `stop_streaming`
//! - A hardware timestamp latch (via [`TimestampSource`])
//!
//! Two backends exist: a synthetic stub (`stub://` URIs, always built) and a
//! V4L2 device backend behind the `camera-v4l2` feature.

pub mod stub;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::time::Duration;
use thiserror::Error;

use crate::clock::TimestampSource;
use crate::config::{ExposureMode, SessionConfig};
use crate::frame::{Frame, PixelFormat};
use crate::record::GrabFailure;

pub use stub::StubCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Fatal device-level failures. Per-frame grab failures are *not* errors; they
/// arrive as [`Grab::Failed`] and the session continues.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("device rejected {parameter}: requested {requested}, device resolved {resolved}")]
    RejectedParameter {
        parameter: &'static str,
        requested: String,
        resolved: String,
    },
    /// No frame arrived within the wait bound. A stalled device cannot
    /// self-recover, so this aborts the session.
    #[error("no frame delivered within {0:?}")]
    Timeout(Duration),
    #[error("stream fault: {0}")]
    StreamFault(String),
    #[error("camera is not streaming")]
    NotStreaming,
}

/// Result of one bounded-wait grab.
#[derive(Debug)]
pub enum Grab {
    /// A frame was delivered.
    Frame(Frame),
    /// The device reported a per-frame failure but the stream is still alive.
    Failed(GrabFailure),
}

/// The values the device actually agreed to after `apply_config`.
#[derive(Clone, Debug)]
pub struct ResolvedParameters {
    pub camera_model: String,
    /// Resulting frame rate; may differ from the requested rate.
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// Pixel layout the device will deliver.
    pub pixel_format: PixelFormat,
    pub exposure_mode: ExposureMode,
    pub exposure_time_us: f64,
    /// Frequency of the device tick counter in Hz.
    pub tick_frequency_hz: f64,
}

/// One camera session. The handle is exclusively owned for the session's
/// lifetime and released when the implementation drops.
pub trait CameraDevice: TimestampSource {
    /// Apply a session configuration, returning the resolved parameters.
    fn apply_config(&mut self, config: &SessionConfig) -> Result<ResolvedParameters, DeviceError>;

    /// Begin frame delivery; unbounded when `frame_limit` is absent.
    fn start_streaming(&mut self, frame_limit: Option<u64>) -> Result<(), DeviceError>;

    /// Block up to `timeout` for the next grab to resolve.
    fn next_frame(&mut self, timeout: Duration) -> Result<Grab, DeviceError>;

    /// Stop frame delivery. Idempotent.
    fn stop_streaming(&mut self) -> Result<(), DeviceError>;
}

#[derive(Debug)]
enum Backend {
    Stub(StubCamera),
    #[cfg(feature = "camera-v4l2")]
    V4l2(V4l2Camera),
}

/// Camera opened from an operator-supplied URI.
///
/// `stub://<name>` selects the synthetic backend; any other value is treated as
/// a V4L2 device path when the `camera-v4l2` feature is enabled.
#[derive(Debug)]
pub struct Camera {
    backend: Backend,
}

impl Camera {
    pub fn open(uri: &str) -> Result<Self, DeviceError> {
        if let Some(name) = uri.strip_prefix("stub://") {
            return Ok(Self {
                backend: Backend::Stub(StubCamera::open(name)),
            });
        }

        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: Backend::V4l2(V4l2Camera::open(uri)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(DeviceError::Unavailable(format!(
                "{uri}: real devices require the camera-v4l2 feature (use a stub:// URI)"
            )))
        }
    }
}

impl TimestampSource for Camera {
    fn latch_ticks(&mut self) -> Result<u64, DeviceError> {
        match &mut self.backend {
            Backend::Stub(camera) => camera.latch_ticks(),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(camera) => camera.latch_ticks(),
        }
    }
}

impl CameraDevice for Camera {
    fn apply_config(&mut self, config: &SessionConfig) -> Result<ResolvedParameters, DeviceError> {
        match &mut self.backend {
            Backend::Stub(camera) => camera.apply_config(config),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(camera) => camera.apply_config(config),
        }
    }

    fn start_streaming(&mut self, frame_limit: Option<u64>) -> Result<(), DeviceError> {
        match &mut self.backend {
            Backend::Stub(camera) => camera.start_streaming(frame_limit),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(camera) => camera.start_streaming(frame_limit),
        }
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Grab, DeviceError> {
        match &mut self.backend {
            Backend::Stub(camera) => camera.next_frame(timeout),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(camera) => camera.next_frame(timeout),
        }
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        match &mut self.backend {
            Backend::Stub(camera) => camera.stop_streaming(),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(camera) => camera.stop_streaming(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_uri_selects_stub_backend() -> Result<()> {
        let camera = Camera::open("stub://bench")?;
        assert!(matches!(camera.backend, Backend::Stub(_)));
        Ok(())
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn device_paths_require_the_v4l2_feature() {
        let err = Camera::open("/dev/video0").expect_err("must be rejected");
        assert!(matches!(err, DeviceError::Unavailable(_)));
    }
}
