//! The acquisition session state machine.
//!
//! `Idle → Configuring → Arming → Streaming → Draining → Closed`, with `Closed`
//! reachable from any state on fatal error, cancellation, or normal completion.
//!
//! One logical thread of control: grab, clock capture, log append and encoder
//! hand-off happen synchronously in that order each iteration. The bounded-wait
//! grab is the only blocking point. Cancellation is cooperative — the token is
//! checked once per iteration, never pre-empting an in-flight grab, so the
//! worst-case cancellation latency is one grab timeout.
//!
//! Sequence convention: sequence 0 is the pre-stream start marker (logged, never
//! encoded); frame attempts occupy sequences `1..=K`. With `frame_limit = K` a
//! clean session therefore writes `K + 1` timing-log rows and `K` video frames.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ClockCorrelator;
use crate::config::SessionConfig;
use crate::device::{CameraDevice, Grab, ResolvedParameters};
use crate::record::{FrameRecord, SessionHeader};
use crate::sink::VideoSink;
use crate::timing_log::TimingLog;

/// Bound on a single frame wait. A device that delivers nothing for this long
/// is stalled and cannot self-recover.
pub const GRAB_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared cooperative-cancellation flag, tripped out-of-band (e.g. by a SIGINT
/// handler) and observed at loop checkpoints.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Arming,
    Streaming,
    Draining,
    Closed,
}

/// Counters for one finished session.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct SessionSummary {
    /// Resolved grab attempts (delivered + failed), excluding the start marker.
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// What a completed session produced.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub header: SessionHeader,
    pub summary: SessionSummary,
    pub log_path: PathBuf,
}

pub struct AcquisitionLoop<C: CameraDevice> {
    camera: C,
    config: SessionConfig,
    cancel: CancelToken,
    grab_timeout: Duration,
    state: SessionState,
}

impl<C: CameraDevice> AcquisitionLoop<C> {
    pub fn new(camera: C, config: SessionConfig, cancel: CancelToken) -> Self {
        Self {
            camera,
            config,
            cancel,
            grab_timeout: GRAB_TIMEOUT,
            state: SessionState::Idle,
        }
    }

    /// Override the grab wait bound (tests use a short one).
    pub fn with_grab_timeout(mut self, timeout: Duration) -> Self {
        self.grab_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn enter(&mut self, next: SessionState) {
        log::debug!("session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// `open_sink` is called once with the device-resolved parameters; failing
    /// to open the encoder at the resolved resolution is fatal. Once the sink
    /// and timing log exist, the drain path (stop streaming, finalize sink,
    /// close log) runs on every exit — normal, cancelled, or fatal — before any
    /// error propagates. The camera handle itself releases on drop.
    pub fn run(
        mut self,
        log_path: &Path,
        open_sink: impl FnOnce(&ResolvedParameters) -> Result<Box<dyn VideoSink>>,
    ) -> Result<SessionReport> {
        self.enter(SessionState::Configuring);
        let resolved = self
            .camera
            .apply_config(&self.config)
            .context("apply session configuration")?;
        if (resolved.frame_rate - self.config.frame_rate()).abs() > 0.01 {
            log::warn!(
                "could not set frame rate to {} fps; using {} fps instead",
                self.config.frame_rate(),
                resolved.frame_rate
            );
        }
        let header = SessionHeader::new(&self.config, &resolved);
        log::info!("camera model: {}", header.camera_model);
        log::info!(
            "recording {}x{} @ {} fps, exposure {} ({} us)",
            header.width,
            header.height,
            header.fps_actual,
            header.exposure_mode,
            header.exposure_time_us
        );
        match self.config.frame_limit() {
            Some(limit) => log::info!("frame limit: {} attempts", limit),
            None => log::info!("continuous acquisition until cancelled"),
        }

        self.enter(SessionState::Arming);
        let mut sink =
            open_sink(&resolved).context("open video sink at resolved resolution")?;
        let mut correlator = ClockCorrelator::new(resolved.tick_frequency_hz);

        // Time origin for the session: logged as sequence 0, printed to the
        // console, never encoded.
        let start = correlator
            .capture(&mut self.camera)
            .context("capture session start clocks")?;
        let mut log = TimingLog::create(log_path, &header, resolved.tick_frequency_hz)?;
        log.append(&FrameRecord::start(start))?;
        log::info!(
            "session start: host={} device={:.6}s",
            start.host_timestamp(),
            start.device_seconds(resolved.tick_frequency_hz)
        );

        // From here on, every exit path must pass through the drain below.
        self.enter(SessionState::Streaming);
        let stream_result =
            self.run_streaming(sink.as_mut(), &mut log, &mut correlator, &resolved);

        self.enter(SessionState::Draining);
        let drain_result = self.drain(sink.as_mut(), &mut log);
        self.enter(SessionState::Closed);

        let summary = stream_result?;
        drain_result?;

        log::info!(
            "session complete: {} attempts, {} delivered, {} failed{}",
            summary.attempts,
            summary.delivered,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(SessionReport {
            header,
            summary,
            log_path: log_path.to_path_buf(),
        })
    }

    fn run_streaming(
        &mut self,
        sink: &mut dyn VideoSink,
        log: &mut TimingLog,
        correlator: &mut ClockCorrelator,
        resolved: &ResolvedParameters,
    ) -> Result<SessionSummary> {
        self.camera
            .start_streaming(self.config.frame_limit())
            .context("start streaming")?;

        let mut summary = SessionSummary::default();
        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if let Some(limit) = self.config.frame_limit() {
                if summary.attempts >= limit {
                    break;
                }
            }

            let grab = self
                .camera
                .next_frame(self.grab_timeout)
                .context("acquisition stream fault")?;
            // Start marker holds sequence 0; attempts are 1-based.
            let sequence = summary.attempts + 1;
            let clocks = correlator
                .capture(&mut self.camera)
                .context("capture frame clocks")?;

            match grab {
                Grab::Frame(frame) => {
                    log.append(&FrameRecord::delivered(sequence, clocks))?;
                    sink.append(&frame)?;
                    log::debug!(
                        "frame {}: host={} device={:.6}s",
                        sequence,
                        clocks.host_timestamp(),
                        clocks.device_seconds(resolved.tick_frequency_hz)
                    );
                    summary.delivered += 1;
                }
                Grab::Failed(failure) => {
                    // Partial failure: recorded, not forwarded, never aborts.
                    log::warn!(
                        "frame {} grab failed: 0x{:08x} {}",
                        sequence,
                        failure.code,
                        failure.description
                    );
                    log.append(&FrameRecord::failed(sequence, clocks, failure))?;
                    summary.failed += 1;
                }
            }
            summary.attempts += 1;
        }

        Ok(summary)
    }

    /// Runs unconditionally after streaming, whatever the exit path, so
    /// partially-written artifacts are never left open.
    fn drain(&mut self, sink: &mut dyn VideoSink, log: &mut TimingLog) -> Result<()> {
        if let Err(err) = self.camera.stop_streaming() {
            log::warn!("stop streaming: {}", err);
        }
        let sink_result = sink.finalize().context("finalize video sink");
        let log_result = log.close().context("close timing log");
        sink_result?;
        log_result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
