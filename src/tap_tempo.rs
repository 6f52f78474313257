use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tempo::bpm_from_period_ms;

/// Tap-based tempo estimator with outlier rejection and next-beat prediction.
///
/// Timestamps are milliseconds from a monotonic clock. Typical usage:
///
/// ```
/// use tap_metronome::tap_tempo::{TapResult, TapTempoEstimator};
///
/// let mut tapper = TapTempoEstimator::default();
/// for t in [0.0, 500.0, 1000.0] {
///     if let TapResult::Estimate(estimate) = tapper.record_tap(t) {
///         println!("{:.1} bpm, next beat at {} ms", estimate.tempo_bpm, estimate.next_beat_ms);
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TapTempoEstimator {
    config: TapTempoConfig,
    sample_count: u32,
    smoothed_period: f64,
    last_tap: f64,
    predicted_next_tap: f64,
}

/// Construction-time parameters of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapTempoConfig {
    /// Lowest blend weight the smoothing filter converges to.
    pub smoothing_floor: f64,
    /// Relative deviation from the current period above which a tap starts a new sequence.
    pub max_relative_error: f64,
    /// Taps needed before an estimate is reported.
    pub min_samples_for_prediction: u32,
    /// Added to the predicted next beat to cover output latency (ms).
    pub prediction_lead_time: f64,
}

impl Default for TapTempoConfig {
    fn default() -> Self {
        Self {
            smoothing_floor: 0.15,
            max_relative_error: 0.3,
            min_samples_for_prediction: 3,
            prediction_lead_time: 10.0,
        }
    }
}

impl TapTempoConfig {
    pub fn validate(&self) -> Result<(), TapTempoConfigError> {
        if !(self.smoothing_floor > 0.0 && self.smoothing_floor <= 1.0) {
            return Err(TapTempoConfigError::SmoothingFloor(self.smoothing_floor));
        }
        if !(self.max_relative_error > 0.0 && self.max_relative_error.is_finite()) {
            return Err(TapTempoConfigError::MaxRelativeError(self.max_relative_error));
        }
        if self.min_samples_for_prediction < 2 {
            return Err(TapTempoConfigError::MinSamples(self.min_samples_for_prediction));
        }
        if !self.prediction_lead_time.is_finite() {
            return Err(TapTempoConfigError::LeadTime(self.prediction_lead_time));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TapTempoConfigError {
    #[error("smoothing floor must be in (0, 1], got {0}")]
    SmoothingFloor(f64),
    #[error("max relative error must be positive and finite, got {0}")]
    MaxRelativeError(f64),
    #[error("at least two taps are required before a prediction, got {0}")]
    MinSamples(u32),
    #[error("prediction lead time must be finite, got {0}")]
    LeadTime(f64),
}

/// Tempo and phase reported once enough consistent taps were seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapEstimate {
    pub tempo_bpm: f64,
    /// Absolute time of the next beat, lead time included (ms).
    pub next_beat_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapResult {
    /// Still warming up, or the sequence was just restarted.
    Insufficient,
    Estimate(TapEstimate),
}

impl TapResult {
    pub fn estimate(self) -> Option<TapEstimate> {
        match self {
            TapResult::Insufficient => None,
            TapResult::Estimate(estimate) => Some(estimate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Empty,
    Warming,
    Estimating,
}

impl Default for TapTempoEstimator {
    fn default() -> Self {
        Self::with_valid_config(TapTempoConfig::default())
    }
}

impl TapTempoEstimator {
    /// Create an estimator, rejecting configurations that cannot produce estimates.
    pub fn new(config: TapTempoConfig) -> Result<Self, TapTempoConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: TapTempoConfig) -> Self {
        Self {
            config,
            sample_count: 0,
            smoothed_period: 0.0,
            last_tap: 0.0,
            predicted_next_tap: 0.0,
        }
    }

    pub fn config(&self) -> &TapTempoConfig {
        &self.config
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Smoothed beat period in ms, once at least one interval was observed.
    pub fn smoothed_period(&self) -> Option<f64> {
        (self.sample_count >= 2).then_some(self.smoothed_period)
    }

    pub fn last_tap(&self) -> Option<f64> {
        (self.sample_count >= 1).then_some(self.last_tap)
    }

    pub fn state(&self) -> TapState {
        match self.sample_count {
            0 => TapState::Empty,
            n if n < self.config.min_samples_for_prediction => TapState::Warming,
            _ => TapState::Estimating,
        }
    }

    /// Register a tap at `timestamp_ms`.
    ///
    /// Returns an estimate once `min_samples_for_prediction` consistent taps were
    /// recorded. A tap whose interval deviates too far from the current period
    /// restarts the sequence with that interval as its first sample.
    pub fn record_tap(&mut self, timestamp_ms: f64) -> TapResult {
        self.sample_count = self.sample_count.saturating_add(1);

        let interval = timestamp_ms - self.last_tap;
        self.last_tap = timestamp_ms;

        if self.sample_count == 1 {
            return TapResult::Insufficient;
        }

        if !(interval > 0.0) {
            debug!(interval, "non-positive tap interval, restarting sequence");
            self.sample_count = 1;
            self.smoothed_period = 0.0;
            self.predicted_next_tap = 0.0;
            return TapResult::Insufficient;
        }

        if self.sample_count > 2 {
            let deviation = (interval - self.smoothed_period).abs() / self.smoothed_period;
            if deviation > self.config.max_relative_error {
                debug!(
                    interval,
                    period = self.smoothed_period,
                    deviation,
                    "outlier tap, restarting sequence"
                );
                self.sample_count = 2;
            }
        }

        // Equals 1 for the first interval of a sequence.
        let floor = self.config.smoothing_floor;
        let weight = floor + (1.0 - floor) / f64::from(self.sample_count - 1);
        self.smoothed_period = weight * interval + (1.0 - weight) * self.smoothed_period;

        self.predicted_next_tap = (weight * (timestamp_ms - self.predicted_next_tap)
            + self.predicted_next_tap
            + self.smoothed_period)
            .round();

        if self.sample_count < self.config.min_samples_for_prediction {
            return TapResult::Insufficient;
        }

        TapResult::Estimate(TapEstimate {
            tempo_bpm: bpm_from_period_ms(self.smoothed_period.round().max(1.0)),
            next_beat_ms: (self.predicted_next_tap + self.config.prediction_lead_time).round(),
        })
    }

    /// Forget all taps; the next tap starts a fresh sequence.
    pub fn reset(&mut self) {
        self.sample_count = 0;
        self.smoothed_period = 0.0;
        self.last_tap = 0.0;
        self.predicted_next_tap = 0.0;
    }
}
