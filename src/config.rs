//! Validated acquisition parameters.
//!
//! A `SessionConfig` is built once from raw operator input and never changes
//! afterwards. Validation happens entirely here, before any device interaction,
//! so a bad configuration can never leave partially-written artifacts behind.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Auto-exposure mode requested for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum ExposureMode {
    Off,
    Once,
    Continuous,
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposureMode::Off => write!(f, "Off"),
            ExposureMode::Once => write!(f, "Once"),
            ExposureMode::Continuous => write!(f, "Continuous"),
        }
    }
}

/// Sensor crop preset. The concrete resolution is negotiated with the device at
/// configuration-apply time; the device clamps the request to its capability set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropPreset {
    /// Full sensor resolution.
    Native,
    /// Centered 1920x1080 region.
    Crop1080p,
    /// Centered 1280x720 region.
    Crop720p,
}

impl CropPreset {
    /// Resolution to request from the device, or `None` for the sensor maximum.
    pub fn requested_resolution(self) -> Option<(u32, u32)> {
        match self {
            CropPreset::Native => None,
            CropPreset::Crop1080p => Some((1920, 1080)),
            CropPreset::Crop720p => Some((1280, 720)),
        }
    }
}

/// Configuration rejected before any device interaction.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("a frame rate is required (--fps)")]
    MissingFrameRate,
    #[error("frame rate must be positive, got {0}")]
    NonPositiveFrameRate(f64),
    #[error("exposure time must be positive, got {0}")]
    NonPositiveExposureTime(f64),
}

/// Immutable, validated set of acquisition parameters.
///
/// Fields are private; the only way to obtain a `SessionConfig` is through
/// [`SessionConfig::new`], which enforces the invariants:
///
/// - `frame_rate > 0`
/// - an exposure-time override, when present, is positive and resolves the
///   exposure mode to [`ExposureMode::Off`] regardless of the requested mode.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    frame_rate: f64,
    frame_limit: Option<u64>,
    exposure_mode: ExposureMode,
    exposure_time_us: Option<f64>,
    crop: CropPreset,
}

impl SessionConfig {
    pub fn new(
        frame_rate: Option<f64>,
        frame_limit: Option<u64>,
        exposure_mode: ExposureMode,
        exposure_time_us: Option<f64>,
        crop: CropPreset,
    ) -> Result<Self, ConfigError> {
        let frame_rate = frame_rate.ok_or(ConfigError::MissingFrameRate)?;
        // `!(x > 0.0)` also rejects NaN.
        if !(frame_rate > 0.0) {
            return Err(ConfigError::NonPositiveFrameRate(frame_rate));
        }
        if let Some(exposure_time) = exposure_time_us {
            if !(exposure_time > 0.0) {
                return Err(ConfigError::NonPositiveExposureTime(exposure_time));
            }
        }

        // An absolute exposure time always wins over the requested auto mode.
        let exposure_mode = if exposure_time_us.is_some() {
            ExposureMode::Off
        } else {
            exposure_mode
        };

        Ok(Self {
            frame_rate,
            frame_limit,
            exposure_mode,
            exposure_time_us,
            crop,
        })
    }

    /// Requested device frame rate in frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Number of frame attempts to record; `None` means continuous acquisition.
    pub fn frame_limit(&self) -> Option<u64> {
        self.frame_limit
    }

    /// Resolved exposure mode (after the exposure-time override is applied).
    pub fn exposure_mode(&self) -> ExposureMode {
        self.exposure_mode
    }

    /// Absolute exposure time in microseconds, if forced by the operator.
    pub fn exposure_time_us(&self) -> Option<f64> {
        self.exposure_time_us
    }

    pub fn crop(&self) -> CropPreset {
        self.crop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_is_mandatory() {
        let err = SessionConfig::new(None, None, ExposureMode::Off, None, CropPreset::Native)
            .expect_err("config without fps must be rejected");
        assert_eq!(err, ConfigError::MissingFrameRate);
    }

    #[test]
    fn frame_rate_must_be_positive() {
        for bad in [0.0, -30.0, f64::NAN] {
            let result =
                SessionConfig::new(Some(bad), None, ExposureMode::Off, None, CropPreset::Native);
            assert!(result.is_err(), "frame rate {} must be rejected", bad);
        }
    }

    #[test]
    fn exposure_override_forces_mode_off() -> anyhow::Result<()> {
        for requested in [
            ExposureMode::Off,
            ExposureMode::Once,
            ExposureMode::Continuous,
        ] {
            let cfg = SessionConfig::new(
                Some(30.0),
                None,
                requested,
                Some(5_000.0),
                CropPreset::Native,
            )?;
            assert_eq!(cfg.exposure_mode(), ExposureMode::Off);
            assert_eq!(cfg.exposure_time_us(), Some(5_000.0));
        }
        Ok(())
    }

    #[test]
    fn exposure_override_must_be_positive() {
        let err = SessionConfig::new(
            Some(30.0),
            None,
            ExposureMode::Off,
            Some(0.0),
            CropPreset::Native,
        )
        .expect_err("zero exposure time must be rejected");
        assert_eq!(err, ConfigError::NonPositiveExposureTime(0.0));
    }

    #[test]
    fn crop_presets_resolve_to_expected_requests() {
        assert_eq!(CropPreset::Native.requested_resolution(), None);
        assert_eq!(
            CropPreset::Crop1080p.requested_resolution(),
            Some((1920, 1080))
        );
        assert_eq!(
            CropPreset::Crop720p.requested_resolution(),
            Some((1280, 720))
        );
    }
}
