use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MS_PER_MINUTE: f64 = 60_000.0;

pub fn period_ms_from_bpm(bpm: f64) -> f64 {
    MS_PER_MINUTE / bpm
}

pub fn bpm_from_period_ms(period_ms: f64) -> f64 {
    MS_PER_MINUTE / period_ms
}

/// Beat period as a `Duration`, never shorter than one microsecond.
pub fn duration_from_bpm(bpm: f64) -> Duration {
    let micros = (period_ms_from_bpm(bpm) * 1000.0).max(1.0);
    Duration::from_micros(micros as u64)
}

/// Range and granularity accepted for the playback tempo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimits {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Step used when nudging or rounding a tempo.
    pub increment: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            min_bpm: 20.0,
            max_bpm: 250.0,
            increment: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpeedError {
    #[error("tempo {0} is not a number")]
    NotFinite(f64),
    #[error("tempo {bpm} is below the minimum of {min}")]
    TooSlow { bpm: f64, min: f64 },
    #[error("tempo {bpm} is above the maximum of {max}")]
    TooFast { bpm: f64, max: f64 },
    #[error("invalid speed limits: {0}")]
    InvalidLimits(&'static str),
}

impl SpeedLimits {
    pub fn validate(&self) -> Result<(), SpeedError> {
        if !(self.min_bpm > 0.0 && self.min_bpm.is_finite()) {
            return Err(SpeedError::InvalidLimits("minimum must be positive"));
        }
        if !(self.max_bpm >= self.min_bpm && self.max_bpm.is_finite()) {
            return Err(SpeedError::InvalidLimits("maximum must not be below the minimum"));
        }
        if !(self.increment > 0.0 && self.increment.is_finite()) {
            return Err(SpeedError::InvalidLimits("increment must be positive"));
        }
        Ok(())
    }

    pub fn check(&self, bpm: f64) -> Result<f64, SpeedError> {
        if !bpm.is_finite() {
            return Err(SpeedError::NotFinite(bpm));
        }
        if bpm < self.min_bpm {
            return Err(SpeedError::TooSlow {
                bpm,
                min: self.min_bpm,
            });
        }
        if bpm > self.max_bpm {
            return Err(SpeedError::TooFast {
                bpm,
                max: self.max_bpm,
            });
        }
        Ok(bpm)
    }

    pub fn clamp(&self, bpm: f64) -> f64 {
        if bpm.is_nan() {
            return self.min_bpm;
        }
        bpm.clamp(self.min_bpm, self.max_bpm)
    }

    pub fn round_to_increment(&self, bpm: f64) -> f64 {
        self.clamp((bpm / self.increment).round() * self.increment)
    }

    /// Format a tempo with as many decimals as the increment needs.
    pub fn format_bpm(&self, bpm: f64) -> String {
        let decimals = (0..3)
            .find(|&d| {
                let scaled = self.increment * 10f64.powi(d);
                (scaled - scaled.round()).abs() < 1e-6
            })
            .unwrap_or(3) as usize;
        format!("{bpm:.decimals$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_period_and_bpm() {
        assert_eq!(period_ms_from_bpm(120.0), 500.0);
        assert_eq!(bpm_from_period_ms(400.0), 150.0);
        assert_eq!(duration_from_bpm(120.0), Duration::from_millis(500));
    }

    #[test]
    fn checks_range() {
        let limits = SpeedLimits::default();
        assert_eq!(limits.check(120.0), Ok(120.0));
        assert!(matches!(limits.check(5.0), Err(SpeedError::TooSlow { .. })));
        assert!(matches!(limits.check(400.0), Err(SpeedError::TooFast { .. })));
        assert!(matches!(limits.check(f64::NAN), Err(SpeedError::NotFinite(_))));
    }

    #[test]
    fn clamps_and_rounds() {
        let limits = SpeedLimits {
            min_bpm: 40.0,
            max_bpm: 200.0,
            increment: 0.5,
        };
        assert_eq!(limits.clamp(10.0), 40.0);
        assert_eq!(limits.clamp(f64::NAN), 40.0);
        assert_eq!(limits.round_to_increment(120.3), 120.5);
        assert_eq!(limits.round_to_increment(250.0), 200.0);
    }

    #[test]
    fn formats_with_increment_precision() {
        let whole = SpeedLimits::default();
        assert_eq!(whole.format_bpm(120.0), "120");

        let tenth = SpeedLimits {
            increment: 0.1,
            ..SpeedLimits::default()
        };
        assert_eq!(tenth.format_bpm(97.24), "97.2");

        let quarter = SpeedLimits {
            increment: 0.25,
            ..SpeedLimits::default()
        };
        assert_eq!(quarter.format_bpm(97.25), "97.25");
    }

    #[test]
    fn rejects_inverted_limits() {
        let limits = SpeedLimits {
            min_bpm: 200.0,
            max_bpm: 100.0,
            increment: 1.0,
        };
        assert!(limits.validate().is_err());
        assert!(SpeedLimits::default().validate().is_ok());
    }
}
