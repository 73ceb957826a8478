//! V4L2 camera backend (`camera-v4l2` feature).
//!
//! Drives a local V4L2 device node (e.g. `/dev/video0`). Format and frame rate
//! are negotiated with the driver; whatever the driver actually chose is
//! reported back through `ResolvedParameters`.
//!
//! Device ticks for this backend are monotonic microseconds (1 MHz) anchored at
//! handle open, consistent with V4L2 buffer timestamp semantics.
//!
//! Bounded-wait caveat: the mmap capture stream blocks without a timeout
//! parameter, so the grab bound is enforced by an elapsed-time check after the
//! blocking call returns.

use ouroboros::self_referencing;
use std::time::{Duration, Instant};
use v4l::video::Capture;

use super::{CameraDevice, DeviceError, Grab, ResolvedParameters};
use crate::clock::TimestampSource;
use crate::config::{ExposureMode, SessionConfig};
use crate::frame::{Frame, PixelFormat};
use crate::record::GrabFailure;

const V4L2_TICK_HZ: f64 = 1e6;

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const EXPOSURE_AUTO: i64 = 0;
const EXPOSURE_MANUAL: i64 = 1;

/// Consecutive grab failures tolerated before the stream is declared dead.
const MAX_CONSECUTIVE_FAILURES: u32 = 8;

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Camera {
    path: String,
    opened_at: Instant,
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    resolved: Option<ResolvedParameters>,
    pixel_format: PixelFormat,
    attempts: u64,
    frame_limit: Option<u64>,
    consecutive_failures: u32,
}

impl V4l2Camera {
    pub fn open(path: &str) -> Result<Self, DeviceError> {
        let device = v4l::Device::with_path(path)
            .map_err(|err| DeviceError::Unavailable(format!("{path}: {err}")))?;
        log::info!("V4l2Camera: opened {}", path);
        Ok(Self {
            path: path.to_string(),
            opened_at: Instant::now(),
            device: Some(device),
            state: None,
            resolved: None,
            pixel_format: PixelFormat::Rgb24,
            attempts: 0,
            frame_limit: None,
            consecutive_failures: 0,
        })
    }

    fn apply_exposure(device: &v4l::Device, config: &SessionConfig) {
        use v4l::control::{Control, Value};

        let auto_value = match config.exposure_mode() {
            ExposureMode::Off => EXPOSURE_MANUAL,
            ExposureMode::Continuous => EXPOSURE_AUTO,
            ExposureMode::Once => {
                // V4L2 has no one-shot auto exposure; fall back to continuous.
                log::warn!("V4l2Camera: one-shot auto exposure unsupported, using continuous");
                EXPOSURE_AUTO
            }
        };
        if let Err(err) = device.set_control(Control {
            id: CID_EXPOSURE_AUTO,
            value: Value::Integer(auto_value),
        }) {
            log::warn!("V4l2Camera: failed to set exposure mode: {}", err);
        }

        if let Some(exposure_us) = config.exposure_time_us() {
            // V4L2_CID_EXPOSURE_ABSOLUTE is in 100 us units.
            let units = (exposure_us / 100.0).round().max(1.0) as i64;
            if let Err(err) = device.set_control(Control {
                id: CID_EXPOSURE_ABSOLUTE,
                value: Value::Integer(units),
            }) {
                log::warn!("V4l2Camera: failed to set exposure time: {}", err);
            }
        }
    }

    fn pixel_format_for(fourcc: v4l::FourCC) -> Result<PixelFormat, DeviceError> {
        match &fourcc.repr {
            b"RGB3" => Ok(PixelFormat::Rgb24),
            b"GREY" => Ok(PixelFormat::Mono8),
            other => Err(DeviceError::RejectedParameter {
                parameter: "pixel format",
                requested: "RGB3".to_string(),
                resolved: String::from_utf8_lossy(other).to_string(),
            }),
        }
    }
}

impl TimestampSource for V4l2Camera {
    fn latch_ticks(&mut self) -> Result<u64, DeviceError> {
        Ok(self.opened_at.elapsed().as_micros() as u64)
    }
}

impl CameraDevice for V4l2Camera {
    fn apply_config(&mut self, config: &SessionConfig) -> Result<ResolvedParameters, DeviceError> {
        let device = self.device.as_mut().ok_or_else(|| {
            DeviceError::Unavailable("device handle already consumed by streaming".to_string())
        })?;

        let camera_model = device
            .query_caps()
            .map(|caps| caps.card)
            .unwrap_or_else(|_| self.path.clone());

        let mut format = device
            .format()
            .map_err(|err| DeviceError::Unavailable(format!("read format: {err}")))?;
        if let Some((width, height)) = config.crop().requested_resolution() {
            format.width = width;
            format.height = height;
        }
        format.fourcc = v4l::FourCC::new(b"RGB3");

        // The driver is free to substitute the nearest format it supports; keep
        // whatever it actually chose.
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .map_err(|err| DeviceError::Unavailable(format!("re-read format: {err}")))?
            }
        };
        let pixel_format = Self::pixel_format_for(format.fourcc)?;

        let requested_fps = config.frame_rate();
        let mut frame_rate = requested_fps;
        let params = v4l::video::capture::Parameters::with_fps(requested_fps.round().max(1.0) as u32);
        match device.set_params(&params) {
            Ok(params) => {
                if params.interval.numerator > 0 {
                    frame_rate =
                        params.interval.denominator as f64 / params.interval.numerator as f64;
                }
            }
            Err(err) => {
                log::warn!("V4l2Camera: failed to set frame rate on {}: {}", self.path, err);
            }
        }

        Self::apply_exposure(device, config);

        let resolved = ResolvedParameters {
            camera_model,
            frame_rate,
            width: format.width,
            height: format.height,
            pixel_format,
            exposure_mode: config.exposure_mode(),
            exposure_time_us: config.exposure_time_us().unwrap_or(0.0),
            tick_frequency_hz: V4L2_TICK_HZ,
        };
        log::info!(
            "V4l2Camera: resolved {}x{} {} @ {} fps",
            resolved.width,
            resolved.height,
            format.fourcc,
            resolved.frame_rate
        );
        self.pixel_format = pixel_format;
        self.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    fn start_streaming(&mut self, frame_limit: Option<u64>) -> Result<(), DeviceError> {
        use v4l::buffer::Type;

        if self.resolved.is_none() {
            return Err(DeviceError::Unavailable(
                "apply_config must run before streaming".to_string(),
            ));
        }
        let device = self.device.take().ok_or_else(|| {
            DeviceError::Unavailable("device handle already consumed by streaming".to_string())
        })?;

        let state = StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| DeviceError::StreamFault(format!("create buffer stream: {err}")))
            },
        }
        .try_build()?;

        self.state = Some(state);
        self.attempts = 0;
        self.frame_limit = frame_limit;
        self.consecutive_failures = 0;
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Grab, DeviceError> {
        use v4l::io::traits::CaptureStream;

        let resolved = self.resolved.as_ref().ok_or(DeviceError::NotStreaming)?.clone();
        let state = self.state.as_mut().ok_or(DeviceError::NotStreaming)?;

        if let Some(limit) = self.frame_limit {
            if self.attempts >= limit {
                return Err(DeviceError::StreamFault(
                    "acquisition already complete".to_string(),
                ));
            }
        }

        let waited_from = Instant::now();
        let grab = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, _meta)) => Ok(buf.to_vec()),
            Err(err) => Err(err),
        });
        if waited_from.elapsed() > timeout {
            return Err(DeviceError::Timeout(timeout));
        }

        self.attempts += 1;
        match grab {
            Ok(buf) => {
                self.consecutive_failures = 0;
                let expected = resolved.width as usize
                    * resolved.height as usize
                    * self.pixel_format.bytes_per_pixel();
                if buf.len() < expected {
                    return Ok(Grab::Failed(GrabFailure {
                        code: 0,
                        description: format!(
                            "short buffer: expected {} bytes, got {}",
                            expected,
                            buf.len()
                        ),
                    }));
                }
                let frame = Frame::new(
                    resolved.width,
                    resolved.height,
                    self.pixel_format,
                    buf[..expected].to_vec(),
                )
                .map_err(|err| DeviceError::StreamFault(err.to_string()))?;
                Ok(Grab::Frame(frame))
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(DeviceError::StreamFault(format!(
                        "{} consecutive capture failures, last: {}",
                        self.consecutive_failures, err
                    )));
                }
                Ok(Grab::Failed(GrabFailure {
                    code: err.raw_os_error().unwrap_or(0) as u32,
                    description: err.to_string(),
                }))
            }
        }
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        // Dropping the mmap stream stops the capture queue; the handle is not
        // reusable afterwards, which matches the one-session lifetime.
        self.state = None;
        Ok(())
    }
}
