use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use thiserror::Error;

use crate::click_clock::Click;
use crate::click_sink::{ClickSink, ClickSinkError};

const CLIENT_NAME: &str = "tap-metronome";
const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// General MIDI hi/lo wood block.
pub const DEFAULT_NOTES: [u8; 2] = [76, 77];
/// General MIDI percussion channel (1-based).
pub const DEFAULT_CHANNEL: u8 = 10;

#[derive(Debug, Error)]
pub enum MidiSinkError {
    #[error("failed to initialise MIDI output: {0}")]
    MidiInit(String),
    #[error("no MIDI output port matching \"{0}\" was found")]
    PortNotFound(String),
    #[error("failed to open MIDI connection: {0}")]
    Connection(String),
    #[error("MIDI channel must be between 1 and 16, got {0}")]
    Channel(u8),
}

/// Plays each click as a note on a MIDI output port.
pub struct MidiSink {
    connection: MidiOutputConnection,
    port_name: String,
    channel: u8,
    notes: Vec<u8>,
    sounding: Option<u8>,
}

impl MidiSink {
    /// Connect to the first output port whose name contains `port_hint`
    /// (case-insensitive), or to the first port when the hint is empty.
    ///
    /// `notes` maps a beat's sound index to a note number; `channel` is 1-based.
    pub fn connect(port_hint: &str, channel: u8, notes: Vec<u8>) -> Result<Self, MidiSinkError> {
        if !(1..=16).contains(&channel) {
            return Err(MidiSinkError::Channel(channel));
        }

        let midi_out = open_output()?;
        let ports = midi_out.ports();
        let names = port_names(&midi_out, &ports);

        let index = select_port(&names, port_hint)
            .ok_or_else(|| MidiSinkError::PortNotFound(port_hint.to_string()))?;
        let port_name = names[index].clone();

        let connection = midi_out
            .connect(&ports[index], "tap-metronome-out")
            .map_err(|err| MidiSinkError::Connection(err.to_string()))?;

        Ok(Self {
            connection,
            port_name,
            channel: channel - 1,
            notes: if notes.is_empty() {
                DEFAULT_NOTES.to_vec()
            } else {
                notes
            },
            sounding: None,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&mut self, message: [u8; 3]) -> Result<(), ClickSinkError> {
        self.connection
            .send(&message)
            .map_err(|err| ClickSinkError::Send(format!("{} ({})", err, self.port_name)))
    }

    fn release(&mut self) -> Result<(), ClickSinkError> {
        if let Some(note) = self.sounding.take() {
            self.send([NOTE_OFF | self.channel, note, 0])?;
        }
        Ok(())
    }
}

impl ClickSink for MidiSink {
    fn click(&mut self, click: &Click) -> Result<(), ClickSinkError> {
        self.release()?;

        let velocity = velocity_from_volume(click.beat.volume);
        if velocity == 0 {
            return Ok(());
        }

        let note = note_for_sound(&self.notes, click.beat.sound);
        self.send([NOTE_ON | self.channel, note, velocity])?;
        self.sounding = Some(note);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ClickSinkError> {
        self.release()
    }
}

/// Names of all MIDI output ports currently available.
pub fn list_ports() -> Result<Vec<String>, MidiSinkError> {
    let midi_out = open_output()?;
    Ok(port_names(&midi_out, &midi_out.ports()))
}

fn open_output() -> Result<MidiOutput, MidiSinkError> {
    MidiOutput::new(CLIENT_NAME).map_err(|err| MidiSinkError::MidiInit(err.to_string()))
}

fn port_names(midi_out: &MidiOutput, ports: &[MidiOutputPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            midi_out
                .port_name(port)
                .unwrap_or_else(|_| "<unknown>".into())
        })
        .collect()
}

/// Index of the first name containing `hint` (case-insensitive); an empty hint
/// picks the first port.
fn select_port(names: &[String], hint: &str) -> Option<usize> {
    let hint = hint.trim().to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&hint))
}

fn velocity_from_volume(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 127.0).round() as u8
}

fn note_for_sound(notes: &[u8], sound: u8) -> u8 {
    notes[usize::from(sound) % notes.len()].min(127)
}
