//! Per-frame records and the session header.
//!
//! A [`FrameRecord`] exists for every resolved grab attempt — success and failure
//! alike — plus the pre-stream start marker. Failures are data here, never control
//! flow: a failed attempt keeps its sequence slot and its host timestamp so the
//! timing log stays a gapless index of wall-clock-ordered attempts.

use serde::Serialize;

use crate::clock::ClockPair;
use crate::config::{ExposureMode, SessionConfig};
use crate::device::ResolvedParameters;

/// A per-frame grab failure reported by the device while the stream stays alive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrabFailure {
    /// Device-reported error code.
    pub code: u32,
    /// Device-reported description.
    pub description: String,
}

/// Outcome of one resolved attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The sequence-0 time-origin marker captured before streaming starts.
    /// Logged, never encoded.
    Start,
    /// A frame was delivered and forwarded to the video sink.
    Delivered,
    /// The grab failed; no payload exists and nothing reaches the sink.
    Failed(GrabFailure),
}

/// One resolved frame: sequence number, correlated clocks, outcome.
/// Never mutated after creation.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    sequence: u64,
    clocks: ClockPair,
    outcome: FrameOutcome,
}

impl FrameRecord {
    /// The session start marker; always sequence 0.
    pub fn start(clocks: ClockPair) -> Self {
        Self {
            sequence: 0,
            clocks,
            outcome: FrameOutcome::Start,
        }
    }

    pub fn delivered(sequence: u64, clocks: ClockPair) -> Self {
        Self {
            sequence,
            clocks,
            outcome: FrameOutcome::Delivered,
        }
    }

    pub fn failed(sequence: u64, clocks: ClockPair, failure: GrabFailure) -> Self {
        Self {
            sequence,
            clocks,
            outcome: FrameOutcome::Failed(failure),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn clocks(&self) -> &ClockPair {
        &self.clocks
    }

    pub fn outcome(&self) -> &FrameOutcome {
        &self.outcome
    }
}

/// Session metadata derived once after the device resolves the actual
/// acquisition parameters. Written at the head of the timing log and into the
/// session sidecar; immutable thereafter.
#[derive(Clone, Debug, Serialize)]
pub struct SessionHeader {
    pub camera_model: String,
    pub fps_requested: f64,
    pub fps_actual: f64,
    pub exposure_mode: ExposureMode,
    pub exposure_time_us: f64,
    pub width: u32,
    pub height: u32,
}

impl SessionHeader {
    pub fn new(config: &SessionConfig, resolved: &ResolvedParameters) -> Self {
        Self {
            camera_model: resolved.camera_model.clone(),
            fps_requested: config.frame_rate(),
            fps_actual: resolved.frame_rate,
            exposure_mode: resolved.exposure_mode,
            exposure_time_us: resolved.exposure_time_us,
            width: resolved.width,
            height: resolved.height,
        }
    }
}
