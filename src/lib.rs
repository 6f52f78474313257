//! Tap-tempo metronome.
//!
//! [`tap_tempo::TapTempoEstimator`] turns tap timestamps into a smoothed tempo and a
//! predicted next beat; [`click_clock::ClickClock`] plays a click pattern at that
//! tempo, phase-aligned to the prediction.

pub mod click_clock;
pub mod click_sink;
pub mod config;
pub mod midi_sink;
pub mod tap_session;
pub mod tap_tempo;
pub mod tempo;
