use tracing::debug;

use crate::tap_tempo::{TapEstimate, TapTempoConfig, TapTempoConfigError, TapTempoEstimator};
use crate::tempo::SpeedLimits;

pub const DEFAULT_IDLE_TIMEOUT_MS: f64 = 2000.0;

/// One tap-in interaction: an estimator plus the caller-side policies around it.
///
/// If the time between consecutive taps exceeds `idle_timeout_ms`, the tap history
/// is dropped before the new tap is recorded. Estimates are clamped to `limits`.
#[derive(Debug, Clone)]
pub struct TapSession {
    estimator: TapTempoEstimator,
    idle_timeout_ms: f64,
    limits: SpeedLimits,
}

impl TapSession {
    pub fn new(
        config: TapTempoConfig,
        idle_timeout_ms: f64,
        limits: SpeedLimits,
    ) -> Result<Self, TapTempoConfigError> {
        Ok(Self {
            estimator: TapTempoEstimator::new(config)?,
            idle_timeout_ms: idle_timeout_ms.max(0.0),
            limits,
        })
    }

    pub fn estimator(&self) -> &TapTempoEstimator {
        &self.estimator
    }

    /// Register a tap at `timestamp_ms`, returning a clamped estimate when available.
    pub fn tap(&mut self, timestamp_ms: f64) -> Option<TapEstimate> {
        if let Some(last) = self.estimator.last_tap() {
            if timestamp_ms - last > self.idle_timeout_ms {
                debug!(gap = timestamp_ms - last, "tap session timed out");
                self.estimator.reset();
            }
        }

        let mut estimate = self.estimator.record_tap(timestamp_ms).estimate()?;
        estimate.tempo_bpm = self.limits.clamp(estimate.tempo_bpm);
        Some(estimate)
    }

    pub fn reset(&mut self) {
        self.estimator.reset();
    }
}

impl Default for TapSession {
    fn default() -> Self {
        Self {
            estimator: TapTempoEstimator::default(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            limits: SpeedLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tap_tempo::TapState;

    #[test]
    fn estimates_after_three_taps() {
        let mut session = TapSession::default();
        assert!(session.tap(0.0).is_none());
        assert!(session.tap(500.0).is_none());
        let estimate = session.tap(1000.0).unwrap();
        assert!((estimate.tempo_bpm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn resets_after_gap() {
        let mut session = TapSession::default();
        session.tap(0.0);
        session.tap(500.0);
        // big gap -> reset, this tap starts a new sequence
        assert!(session.tap(5000.0).is_none());
        assert_eq!(session.estimator().sample_count(), 1);
        assert!(session.tap(5600.0).is_none());
        assert!(session.tap(6200.0).is_some());
    }

    #[test]
    fn clamps_to_speed_limits() {
        let limits = SpeedLimits {
            max_bpm: 200.0,
            ..SpeedLimits::default()
        };
        let mut session = TapSession::new(TapTempoConfig::default(), 2000.0, limits).unwrap();
        session.tap(0.0);
        session.tap(100.0);
        let estimate = session.tap(200.0).unwrap();
        assert_eq!(estimate.tempo_bpm, 200.0);
    }

    #[test]
    fn reset_empties_estimator() {
        let mut session = TapSession::default();
        session.tap(0.0);
        session.reset();
        assert_eq!(session.estimator().state(), TapState::Empty);
    }
}
