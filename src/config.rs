//! YAML configuration for the tap metronome.
//!
//! Every section and field is optional; missing values fall back to defaults.
//!
//! ```yaml
//! tap:
//!   smoothing_floor: 0.15
//!   max_relative_error: 0.3
//!   min_samples_for_prediction: 3
//!   prediction_lead_time: 10
//!   idle_timeout_ms: 2000
//! speed:
//!   min_bpm: 20
//!   max_bpm: 250
//!   increment: 1
//! clock:
//!   initial_bpm: 120
//!   pattern:
//!     - { sound: 0, volume: 1.0 }
//!     - { sound: 1, volume: 0.7 }
//! midi:
//!   port: "IAC"
//!   channel: 10
//!   notes: [76, 77]
//! ```

use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::click_clock::{Beat, BeatPattern, ClickClockError};
use crate::midi_sink::{DEFAULT_CHANNEL, DEFAULT_NOTES};
use crate::tap_session::{TapSession, DEFAULT_IDLE_TIMEOUT_MS};
use crate::tap_tempo::{TapTempoConfig, TapTempoConfigError};
use crate::tempo::{SpeedError, SpeedLimits};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Tap(#[from] TapTempoConfigError),
    #[error(transparent)]
    Speed(#[from] SpeedError),
    #[error(transparent)]
    Clock(#[from] ClickClockError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tap: TapConfig,
    pub speed: SpeedLimits,
    pub clock: ClockConfig,
    /// Clicks go to the log when no MIDI section is present.
    pub midi: Option<MidiConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    #[serde(flatten)]
    pub estimator: TapTempoConfig,
    /// Gap after which the next tap starts a new session.
    pub idle_timeout_ms: f64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            estimator: TapTempoConfig::default(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub initial_bpm: f64,
    pub pattern: Vec<Beat>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            initial_bpm: 120.0,
            pattern: BeatPattern::default().beats().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Substring of the output port name; empty selects the first port.
    pub port: String,
    /// 1-based MIDI channel.
    pub channel: u8,
    /// Note number per beat sound index.
    pub notes: Vec<u8>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            channel: DEFAULT_CHANNEL,
            notes: DEFAULT_NOTES.to_vec(),
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tap.estimator.validate()?;
        if !(self.tap.idle_timeout_ms > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tap idle timeout must be positive, got {}",
                self.tap.idle_timeout_ms
            )));
        }

        self.speed.validate()?;
        self.speed.check(self.clock.initial_bpm)?;

        if let Some(beat) = self
            .clock
            .pattern
            .iter()
            .find(|beat| !(0.0..=1.0).contains(&beat.volume))
        {
            return Err(ConfigError::Invalid(format!(
                "beat volume must be between 0 and 1, got {}",
                beat.volume
            )));
        }
        self.pattern()?;

        if let Some(midi) = &self.midi {
            if !(1..=16).contains(&midi.channel) {
                return Err(ConfigError::Invalid(format!(
                    "MIDI channel must be between 1 and 16, got {}",
                    midi.channel
                )));
            }
            if let Some(note) = midi.notes.iter().find(|&&note| note > 127) {
                return Err(ConfigError::Invalid(format!(
                    "MIDI note must be at most 127, got {note}"
                )));
            }
        }

        Ok(())
    }

    pub fn pattern(&self) -> Result<BeatPattern, ConfigError> {
        Ok(BeatPattern::new(self.clock.pattern.clone())?)
    }

    pub fn tap_session(&self) -> Result<TapSession, ConfigError> {
        Ok(TapSession::new(
            self.tap.estimator,
            self.tap.idle_timeout_ms,
            self.speed,
        )?)
    }
}
