use std::{
    env,
    io::{self, BufRead},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tap_metronome::{
    click_clock::ClickClock,
    click_sink::{ClickSink, LogSink},
    config::AppConfig,
    midi_sink::{self, MidiSink},
    tap_session::TapSession,
    tap_tempo::TapEstimate,
    tempo::SpeedLimits,
};

fn print_usage() {
    println!("tap-metronome - tap in a tempo, get a click");
    println!();
    println!("Usage: tap-metronome [OPTIONS] [CONFIG.yml]");
    println!();
    println!("Options:");
    println!("  --list-midi   List available MIDI output ports");
    println!("  --help        Show this help message");
    println!();
    println!("Keys (confirm with Enter):");
    println!("  <empty>   tap");
    println!("  p         start / stop playback");
    println!("  + / -     nudge tempo by one increment");
    println!("  r         forget taps");
    println!("  q         quit");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--list-midi") {
        for (index, name) in midi_sink::list_ports()?.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let config = match args.first() {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => AppConfig::default(),
    };

    let sink: Box<dyn ClickSink + Send> = match &config.midi {
        Some(midi) => {
            let sink = MidiSink::connect(&midi.port, midi.channel, midi.notes.clone())
                .context("failed to open MIDI output")?;
            info!(port = sink.port_name(), "sending clicks to MIDI");
            Box::new(sink)
        }
        None => Box::new(LogSink),
    };

    let clock = ClickClock::new(sink, config.clock.initial_bpm, config.pattern()?)?;
    let mut metronome = Metronome {
        clock,
        session: config.tap_session()?,
        limits: config.speed,
        bpm: config.clock.initial_bpm,
        playing: false,
        app_start: Instant::now(),
    };

    print_usage();
    info!(bpm = %metronome.limits.format_bpm(metronome.bpm), "ready");

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read from stdin")?;
        if !metronome.handle_line(line.trim())? {
            break;
        }
    }

    metronome.clock.stop()?;
    Ok(())
}

struct Metronome {
    clock: ClickClock,
    session: TapSession,
    limits: SpeedLimits,
    bpm: f64,
    playing: bool,
    app_start: Instant,
}

impl Metronome {
    /// Returns `false` when the user asked to quit.
    fn handle_line(&mut self, line: &str) -> Result<bool> {
        match line {
            "" => self.tap(Instant::now())?,
            "p" => self.toggle_playing()?,
            "+" => self.set_bpm(self.bpm + self.limits.increment)?,
            "-" => self.set_bpm(self.bpm - self.limits.increment)?,
            "r" => {
                self.session.reset();
                info!("tap history cleared");
            }
            "q" => return Ok(false),
            other => warn!(input = other, "unknown command"),
        }
        Ok(true)
    }

    fn tap(&mut self, now: Instant) -> Result<()> {
        let tap_time = now
            .checked_duration_since(self.app_start)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let Some(TapEstimate {
            tempo_bpm,
            next_beat_ms,
        }) = self.session.tap(tap_time)
        else {
            return Ok(());
        };

        let next_click = self.instant_from_ms(next_beat_ms);
        self.bpm = tempo_bpm;
        if self.playing {
            self.clock.set_bpm_aligned(tempo_bpm, next_click)?;
            info!(bpm = %self.limits.format_bpm(tempo_bpm), "tempo set by tapping");
        } else {
            self.clock.set_bpm(tempo_bpm)?;
            self.clock.start_at(next_click)?;
            self.playing = true;
            info!(bpm = %self.limits.format_bpm(tempo_bpm), "clock started by tapping");
        }
        Ok(())
    }

    fn toggle_playing(&mut self) -> Result<()> {
        self.playing = !self.playing;
        if self.playing {
            self.clock.start()?;
            info!(bpm = %self.limits.format_bpm(self.bpm), "clock started");
        } else {
            self.clock.stop()?;
            info!("clock stopped");
        }
        Ok(())
    }

    fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.bpm = self.limits.round_to_increment(bpm);
        self.clock.set_bpm(self.bpm)?;
        info!(bpm = %self.limits.format_bpm(self.bpm), "tempo changed");
        Ok(())
    }

    fn instant_from_ms(&self, ms: f64) -> Instant {
        self.app_start
            .checked_add(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
            .unwrap_or_else(Instant::now)
    }
}
