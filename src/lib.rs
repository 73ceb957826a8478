//! chronocam — frame-accurate timestamped camera recording.
//!
//! Drives a machine-vision camera through a session lifecycle: configure
//! acquisition parameters, stream frames with bounded waits, correlate every
//! frame with the camera's hardware tick counter and the host wall clock,
//! encode delivered frames into a video container, and persist a per-frame
//! timing log. The artifact pair (video + timing log) serves as timing
//! evidence for synchronized multi-sensor experiments.
//!
//! # Architecture
//!
//! - `config`: validated, immutable acquisition parameters
//! - `clock`: host/device clock correlation
//! - `device`: the camera-session contract plus stub and V4L2 backends
//! - `frame` / `record`: frame payloads and per-attempt records
//! - `session`: the acquisition-loop state machine
//! - `timing_log`: the structured per-frame log artifact
//! - `sink`: video encoding backends
//!
//! Failure policy: a single bad frame is data (recorded, skipped), a stalled
//! or faulted stream is fatal, and the drain path (stop, finalize, close) runs
//! on every exit.

pub mod clock;
pub mod config;
pub mod device;
pub mod frame;
pub mod record;
pub mod session;
pub mod sink;
pub mod timing_log;

pub use clock::{ClockCorrelator, ClockPair, TimestampSource};
pub use config::{ConfigError, CropPreset, ExposureMode, SessionConfig};
pub use device::{
    Camera, CameraDevice, DeviceError, Grab, ResolvedParameters, StubCamera,
};
pub use frame::{Frame, PixelFormat};
pub use record::{FrameOutcome, FrameRecord, GrabFailure, SessionHeader};
pub use session::{
    AcquisitionLoop, CancelToken, SessionReport, SessionState, SessionSummary, GRAB_TIMEOUT,
};
pub use sink::{MemorySink, VideoSink, Y4mSink};
pub use timing_log::TimingLog;
