//! Host/device clock correlation.
//!
//! Every frame is stamped with a [`ClockPair`]: the host wall clock (microsecond
//! resolution) and the camera's hardware tick counter, captured back-to-back.
//! The two samples are *not* the same instant — there is an unspecified, variable
//! delay between requesting a device timestamp latch and the value becoming
//! readable. Callers must treat device ticks as authoritative for inter-frame
//! *relative* timing and the host time as authoritative for *absolute* wall-clock
//! placement, and never mix the two below that latency bound.

use chrono::{DateTime, Local};

use crate::device::DeviceError;

/// Anything that can latch and read back a hardware tick counter.
///
/// Implemented by camera backends; the tick frequency is reported through the
/// device's resolved parameters, not here.
pub trait TimestampSource {
    /// Request a timestamp latch and read back the latched tick value.
    fn latch_ticks(&mut self) -> Result<u64, DeviceError>;
}

/// A matched (host wall clock, device ticks) sample. Immutable once captured.
#[derive(Clone, Copy, Debug)]
pub struct ClockPair {
    host: DateTime<Local>,
    device_ticks: u64,
}

impl ClockPair {
    pub fn host(&self) -> DateTime<Local> {
        self.host
    }

    pub fn device_ticks(&self) -> u64 {
        self.device_ticks
    }

    /// Device time in seconds: `ticks / tick_frequency_hz`.
    pub fn device_seconds(&self, tick_frequency_hz: f64) -> f64 {
        self.device_ticks as f64 / tick_frequency_hz
    }

    /// Host timestamp formatted as `YYYY-mm-dd HH:MM:SS.uuuuuu` (zero-padded
    /// microseconds), the format persisted in the timing log.
    pub fn host_timestamp(&self) -> String {
        self.host.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// Captures clock pairs and keeps device ticks monotonically non-decreasing
/// across a session.
#[derive(Debug)]
pub struct ClockCorrelator {
    tick_frequency_hz: f64,
    last_ticks: Option<u64>,
}

impl ClockCorrelator {
    pub fn new(tick_frequency_hz: f64) -> Self {
        Self {
            tick_frequency_hz,
            last_ticks: None,
        }
    }

    pub fn tick_frequency_hz(&self) -> f64 {
        self.tick_frequency_hz
    }

    /// Sample the host wall clock, then latch and read the device counter.
    ///
    /// The device clock never resets mid-session, so a tick value below the
    /// previous capture can only be latch-readback noise; it is clamped up to
    /// the previous value and logged.
    pub fn capture<S: TimestampSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<ClockPair, DeviceError> {
        let host = Local::now();
        let mut device_ticks = source.latch_ticks()?;

        if let Some(last) = self.last_ticks {
            if device_ticks < last {
                log::warn!(
                    "device tick regression ({} < {}), clamping to previous value",
                    device_ticks,
                    last
                );
                device_ticks = last;
            }
        }
        self.last_ticks = Some(device_ticks);

        Ok(ClockPair { host, device_ticks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted tick source for correlator tests.
    struct ScriptedTicks {
        values: Vec<u64>,
        next: usize,
    }

    impl ScriptedTicks {
        fn new(values: &[u64]) -> Self {
            Self {
                values: values.to_vec(),
                next: 0,
            }
        }
    }

    impl TimestampSource for ScriptedTicks {
        fn latch_ticks(&mut self) -> Result<u64, DeviceError> {
            let value = self.values[self.next];
            self.next += 1;
            Ok(value)
        }
    }

    #[test]
    fn capture_clamps_tick_regressions() -> anyhow::Result<()> {
        let mut source = ScriptedTicks::new(&[100, 250, 200, 300]);
        let mut correlator = ClockCorrelator::new(1e9);

        let ticks: Vec<u64> = (0..4)
            .map(|_| correlator.capture(&mut source).map(|p| p.device_ticks()))
            .collect::<Result<_, _>>()?;

        assert_eq!(ticks, vec![100, 250, 250, 300]);
        Ok(())
    }

    #[test]
    fn device_seconds_uses_tick_frequency() -> anyhow::Result<()> {
        let mut source = ScriptedTicks::new(&[1_500_000_000]);
        let mut correlator = ClockCorrelator::new(1e9);
        let pair = correlator.capture(&mut source)?;
        assert!((pair.device_seconds(1e9) - 1.5).abs() < 1e-9);
        assert!((pair.device_seconds(1e6) - 1_500.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn host_timestamp_has_six_fraction_digits() -> anyhow::Result<()> {
        let mut source = ScriptedTicks::new(&[0]);
        let mut correlator = ClockCorrelator::new(1e9);
        let pair = correlator.capture(&mut source)?;

        let stamp = pair.host_timestamp();
        let (_, fraction) = stamp
            .rsplit_once('.')
            .expect("timestamp must carry a fractional part");
        assert_eq!(fraction.len(), 6, "timestamp {} must have 6 digits", stamp);
        Ok(())
    }
}
