use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::click_sink::ClickSink;
use crate::tempo::duration_from_bpm;

const THREAD_NAME: &str = "tap-metronome-clock";

/// One entry of the click pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Index into the sink's sound table.
    pub sound: u8,
    /// 0.0 (silent) to 1.0.
    pub volume: f32,
}

/// Non-empty list of beats played in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatPattern {
    beats: Vec<Beat>,
}

impl BeatPattern {
    pub fn new(beats: Vec<Beat>) -> Result<Self, ClickClockError> {
        if beats.is_empty() {
            return Err(ClickClockError::EmptyPattern);
        }
        Ok(Self { beats })
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn beat(&self, position: usize) -> Beat {
        self.beats[position % self.beats.len()]
    }
}

impl Default for BeatPattern {
    /// Accented downbeat followed by three softer beats.
    fn default() -> Self {
        let accent = Beat {
            sound: 0,
            volume: 1.0,
        };
        let soft = Beat {
            sound: 1,
            volume: 0.7,
        };
        let beats = vec![accent, soft, soft, soft];
        Self { beats }
    }
}

/// A click that has become due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    /// Clicks emitted since the clock was last started.
    pub count: u64,
    /// Position inside the pattern.
    pub position: usize,
    pub beat: Beat,
    /// Scheduled time of the click.
    pub at: Instant,
}

/// Fixed-interval click timing, independent of any thread or output.
#[derive(Debug, Clone)]
pub struct ClickSchedule {
    pattern: BeatPattern,
    bpm: f64,
    period: Duration,
    running: bool,
    next_click: Instant,
    position: usize,
    count: u64,
}

impl ClickSchedule {
    pub fn new(bpm: f64, pattern: BeatPattern, now: Instant) -> Result<Self, ClickClockError> {
        let bpm = checked_bpm(bpm)?;
        Ok(Self {
            pattern,
            bpm,
            period: duration_from_bpm(bpm),
            running: false,
            next_click: now,
            position: 0,
            count: 0,
        })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Deadline of the next click while running.
    pub fn next_click(&self) -> Option<Instant> {
        self.running.then_some(self.next_click)
    }

    /// Start from the top of the pattern, first click at `at`.
    pub fn start_at(&mut self, at: Instant) {
        self.running = true;
        self.next_click = at;
        self.position = 0;
        self.count = 0;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Change the tempo. The pending click is kept unless it lies further away
    /// than one new period.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) -> Result<(), ClickClockError> {
        self.bpm = checked_bpm(bpm)?;
        self.period = duration_from_bpm(self.bpm);
        if self.running {
            if let Some(limit) = now.checked_add(self.period) {
                self.next_click = self.next_click.min(limit);
            }
        }
        Ok(())
    }

    /// Move the pending click to `at`, keeping the pattern position.
    pub fn align_next_click(&mut self, at: Instant) {
        self.next_click = at;
    }

    /// Emit the click that is due at `now`, if any.
    pub fn poll(&mut self, now: Instant) -> Option<Click> {
        if !self.running || now < self.next_click {
            return None;
        }

        let click = Click {
            count: self.count,
            position: self.position,
            beat: self.pattern.beat(self.position),
            at: self.next_click,
        };

        self.count += 1;
        self.position = (self.position + 1) % self.pattern.len();
        self.next_click = self
            .next_click
            .checked_add(self.period)
            .unwrap_or(now);

        // Deadlines missed by more than a period are skipped, not bursted.
        if self.next_click <= now {
            self.next_click = now.checked_add(self.period).unwrap_or(now);
        }

        Some(click)
    }
}

#[derive(Debug, Error)]
pub enum ClickClockError {
    #[error("click pattern must contain at least one beat")]
    EmptyPattern,
    #[error("tempo must be a positive number, got {0}")]
    InvalidTempo(f64),
    #[error("click clock thread error: {0}")]
    Thread(String),
}

fn checked_bpm(bpm: f64) -> Result<f64, ClickClockError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(ClickClockError::InvalidTempo(bpm))
    }
}

#[derive(Debug)]
enum Command {
    Start,
    StartAt(Instant),
    Stop,
    SetBpm(f64),
    SetBpmAligned { bpm: f64, next_click: Instant },
    Shutdown,
}

/// Click scheduler running on its own thread, driven through a command channel.
#[derive(Debug)]
pub struct ClickClock {
    tx: Sender<Command>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ClickClock {
    pub fn new(
        sink: Box<dyn ClickSink + Send>,
        initial_bpm: f64,
        pattern: BeatPattern,
    ) -> Result<Self, ClickClockError> {
        let (tx, rx) = mpsc::channel::<Command>();
        let schedule = ClickSchedule::new(initial_bpm, pattern, Instant::now())?;

        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || run_clock(sink, rx, schedule))
            .map_err(|err| ClickClockError::Thread(err.to_string()))?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn start(&self) -> Result<(), ClickClockError> {
        self.send_command(Command::Start)
    }

    /// Start with the first click at `at`.
    pub fn start_at(&self, at: Instant) -> Result<(), ClickClockError> {
        self.send_command(Command::StartAt(at))
    }

    pub fn stop(&self) -> Result<(), ClickClockError> {
        self.send_command(Command::Stop)
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), ClickClockError> {
        self.send_command(Command::SetBpm(checked_bpm(bpm)?))
    }

    /// Change tempo and phase together so the next click lands at `next_click`.
    pub fn set_bpm_aligned(&self, bpm: f64, next_click: Instant) -> Result<(), ClickClockError> {
        let bpm = checked_bpm(bpm)?;
        self.send_command(Command::SetBpmAligned { bpm, next_click })
    }

    fn send_command(&self, command: Command) -> Result<(), ClickClockError> {
        self.tx
            .send(command)
            .map_err(|_| ClickClockError::Thread("clock thread has stopped".into()))
    }
}

impl Drop for ClickClock {
    fn drop(&mut self) {
        if self.tx.send(Command::Shutdown).is_ok() {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_clock(
    mut sink: Box<dyn ClickSink + Send>,
    rx: mpsc::Receiver<Command>,
    mut schedule: ClickSchedule,
) {
    loop {
        let command = match schedule.next_click() {
            Some(deadline) => {
                let now = Instant::now();
                if let Some(click) = schedule.poll(now) {
                    if let Err(err) = sink.click(&click) {
                        warn!(error = %err, "failed to emit click, stopping clock");
                        schedule.stop();
                    }
                    continue;
                }
                match rx.recv_timeout(deadline.saturating_duration_since(now)) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Start => schedule.start_at(Instant::now()),
            Command::StartAt(at) => schedule.start_at(at),
            Command::Stop => {
                schedule.stop();
                if let Err(err) = sink.stop() {
                    warn!(error = %err, "failed to silence click sink");
                }
            }
            Command::SetBpm(bpm) => {
                debug!(bpm, "click clock tempo changed");
                if let Err(err) = schedule.set_bpm(bpm, Instant::now()) {
                    warn!(error = %err, "ignoring tempo change");
                }
            }
            Command::SetBpmAligned { bpm, next_click } => {
                debug!(bpm, "click clock tempo changed with phase alignment");
                match schedule.set_bpm(bpm, Instant::now()) {
                    Ok(()) => schedule.align_next_click(next_click),
                    Err(err) => warn!(error = %err, "ignoring tempo change"),
                }
            }
            Command::Shutdown => break,
        }
    }

    if schedule.is_running() {
        if let Err(err) = sink.stop() {
            warn!(error = %err, "failed to silence click sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::click_sink::ClickSinkError;

    fn pattern(len: u8) -> BeatPattern {
        BeatPattern::new(
            (0..len)
                .map(|sound| Beat { sound, volume: 1.0 })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_pattern() {
        assert!(matches!(
            BeatPattern::new(Vec::new()),
            Err(ClickClockError::EmptyPattern)
        ));
    }

    #[test]
    fn default_pattern_accents_downbeat() {
        let pattern = BeatPattern::default();
        assert_eq!(pattern.len(), 4);
        assert_eq!(pattern.beat(0).sound, 0);
        assert_eq!(pattern.beat(1).sound, 1);
        assert_eq!(pattern.beat(4), pattern.beat(0));
    }

    #[test]
    fn stopped_schedule_emits_nothing() {
        let t0 = Instant::now();
        let mut schedule = ClickSchedule::new(120.0, pattern(2), t0).unwrap();
        assert!(schedule.poll(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(schedule.next_click(), None);
    }

    #[test]
    fn clicks_at_fixed_period_and_cycles_pattern() {
        let t0 = Instant::now();
        let mut schedule = ClickSchedule::new(120.0, pattern(3), t0).unwrap();
        schedule.start_at(t0);

        let period = Duration::from_millis(500);
        let mut positions = Vec::new();
        for i in 0..5u32 {
            // Poll slightly late; deadlines still advance from the schedule, not the poll.
            let now = t0 + period * i + Duration::from_millis(3);
            let click = schedule.poll(now).unwrap();
            assert_eq!(click.at, t0 + period * i);
            assert_eq!(click.count, u64::from(i));
            positions.push(click.position);
            assert!(schedule.poll(now).is_none());
        }
        assert_eq!(positions, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn skips_missed_deadlines() {
        let t0 = Instant::now();
        let mut schedule = ClickSchedule::new(120.0, pattern(1), t0).unwrap();
        schedule.start_at(t0);

        let late = t0 + Duration::from_secs(3);
        assert!(schedule.poll(late).is_some());
        assert_eq!(schedule.next_click(), Some(late + Duration::from_millis(500)));
        assert!(schedule.poll(late).is_none());
    }

    #[test]
    fn tempo_change_pulls_in_distant_click() {
        let t0 = Instant::now();
        let mut schedule = ClickSchedule::new(30.0, pattern(1), t0).unwrap();
        schedule.start_at(t0);
        schedule.poll(t0);
        assert_eq!(schedule.next_click(), Some(t0 + Duration::from_secs(2)));

        schedule.set_bpm(120.0, t0).unwrap();
        assert_eq!(schedule.next_click(), Some(t0 + Duration::from_millis(500)));

        schedule.set_bpm(60.0, t0).unwrap();
        assert_eq!(schedule.next_click(), Some(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn aligned_click_lands_on_request() {
        let t0 = Instant::now();
        let mut schedule = ClickSchedule::new(120.0, pattern(2), t0).unwrap();
        schedule.start_at(t0);
        schedule.poll(t0);

        let target = t0 + Duration::from_millis(320);
        schedule.set_bpm(150.0, t0).unwrap();
        schedule.align_next_click(target);

        assert!(schedule.poll(target - Duration::from_millis(1)).is_none());
        let click = schedule.poll(target).unwrap();
        assert_eq!(click.at, target);
        assert_eq!(click.position, 1);
        assert_eq!(schedule.next_click(), Some(target + Duration::from_millis(400)));
    }

    struct ChannelSink(mpsc::Sender<Click>);

    impl ClickSink for ChannelSink {
        fn click(&mut self, click: &Click) -> Result<(), ClickSinkError> {
            self.0
                .send(*click)
                .map_err(|err| ClickSinkError::Send(err.to_string()))
        }
    }

    #[test]
    fn clock_thread_emits_clicks() {
        let (tx, rx) = mpsc::channel();
        let clock = ClickClock::new(Box::new(ChannelSink(tx)), 600.0, pattern(2)).unwrap();
        clock.start().unwrap();

        let timeout = Duration::from_secs(2);
        let first = rx.recv_timeout(timeout).unwrap();
        let second = rx.recv_timeout(timeout).unwrap();
        let third = rx.recv_timeout(timeout).unwrap();
        assert_eq!(
            (first.position, second.position, third.position),
            (0, 1, 0)
        );
        assert!(second.at - first.at >= Duration::from_millis(100));

        clock.stop().unwrap();
        drop(clock);
    }

    #[test]
    fn rejects_unplayable_tempos() {
        let t0 = Instant::now();
        for bpm in [f64::NAN, f64::INFINITY, 0.0, -60.0] {
            assert!(matches!(
                ClickSchedule::new(bpm, pattern(1), t0),
                Err(ClickClockError::InvalidTempo(_))
            ));
        }

        let mut schedule = ClickSchedule::new(120.0, pattern(1), t0).unwrap();
        schedule.start_at(t0);
        schedule.poll(t0);
        for bpm in [f64::NAN, 0.0, -60.0] {
            assert!(matches!(
                schedule.set_bpm(bpm, t0),
                Err(ClickClockError::InvalidTempo(_))
            ));
        }
        assert_eq!(schedule.bpm(), 120.0);
        assert_eq!(schedule.period(), Duration::from_millis(500));

        // Nothing due before the unchanged period elapses.
        let clicks = (0..500u32)
            .filter_map(|ms| schedule.poll(t0 + Duration::from_millis(u64::from(ms))))
            .count();
        assert_eq!(clicks, 0);
    }

    #[test]
    fn clock_rejects_unplayable_tempos() {
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            ClickClock::new(Box::new(ChannelSink(tx.clone())), f64::NAN, pattern(1)),
            Err(ClickClockError::InvalidTempo(_))
        ));

        let clock = ClickClock::new(Box::new(ChannelSink(tx)), 120.0, pattern(1)).unwrap();
        assert!(matches!(
            clock.set_bpm(0.0),
            Err(ClickClockError::InvalidTempo(_))
        ));
        assert!(matches!(
            clock.set_bpm_aligned(-60.0, Instant::now()),
            Err(ClickClockError::InvalidTempo(_))
        ));
    }

    #[test]
    fn clock_thread_lands_on_requested_instants() {
        let (tx, rx) = mpsc::channel();
        let clock = ClickClock::new(Box::new(ChannelSink(tx)), 60.0, pattern(2)).unwrap();

        let start = Instant::now() + Duration::from_millis(50);
        clock.start_at(start).unwrap();

        let timeout = Duration::from_secs(2);
        let first = rx.recv_timeout(timeout).unwrap();
        assert_eq!(first.at, start);
        assert_eq!(first.position, 0);

        // Pending click is a full second away; move it in with a new tempo.
        let aligned = Instant::now() + Duration::from_millis(80);
        clock.set_bpm_aligned(120.0, aligned).unwrap();

        let second = rx.recv_timeout(timeout).unwrap();
        assert_eq!(second.at, aligned);
        assert_eq!(second.position, 1);

        let third = rx.recv_timeout(timeout).unwrap();
        assert_eq!(third.at, aligned + Duration::from_millis(500));
    }
}
