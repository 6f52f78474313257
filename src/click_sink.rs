use thiserror::Error;
use tracing::info;

use crate::click_clock::Click;

/// Destination for clicks emitted by the click clock.
pub trait ClickSink {
    fn click(&mut self, click: &Click) -> Result<(), ClickSinkError>;

    /// Called when playback stops, to release anything still sounding.
    fn stop(&mut self) -> Result<(), ClickSinkError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ClickSinkError {
    #[error("failed to send click: {0}")]
    Send(String),
}

/// Reports every click as a tracing event.
#[derive(Debug, Default)]
pub struct LogSink;

impl ClickSink for LogSink {
    fn click(&mut self, click: &Click) -> Result<(), ClickSinkError> {
        let marker = if click.position == 0 { "TICK" } else { "tick" };
        info!(
            count = click.count,
            position = click.position,
            sound = click.beat.sound,
            volume = click.beat.volume,
            "{marker}"
        );
        Ok(())
    }
}
