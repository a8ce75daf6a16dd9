/// Step clock - turns tempo into a stream of note events
///
/// The clock owns no timer. Each transition returns a [`Schedule`] telling
/// the caller's event loop when (or whether) to deliver the next tick.
use std::time::Duration;

use super::{Grid, NoteSink};
use crate::{MAX_BPM, MIN_BPM, NUM_STEPS, STEP_VELOCITY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    AllNotesOff,
}

impl PlaybackEvent {
    pub fn send_to(&self, sink: &mut dyn NoteSink) {
        match *self {
            PlaybackEvent::NoteOn {
                channel,
                note,
                velocity,
            } => sink.note_on(channel, note, velocity),
            PlaybackEvent::NoteOff { channel, note } => sink.note_off(channel, note),
            PlaybackEvent::AllNotesOff => sink.all_notes_off(),
        }
    }
}

/// Pending work for the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Deliver `on_tick` after this long.
    TickIn(Duration),
    /// Drop any tick that has not fired yet.
    Cancel,
    /// Leave the timer as it is.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Playing,
}

/// Sixteenth-note interval at `bpm`, in whole milliseconds.
pub fn tick_interval(bpm: u16) -> Duration {
    let bpm = u64::from(bpm.clamp(MIN_BPM, MAX_BPM));
    Duration::from_millis(60_000 / bpm / 4)
}

pub struct StepClock {
    state: ClockState,
    current_step: usize,
}

impl StepClock {
    pub fn new() -> Self {
        Self {
            state: ClockState::Stopped,
            current_step: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == ClockState::Playing
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Starts from step 0, even if already playing.
    pub fn start(&mut self, bpm: u16) -> Schedule {
        self.state = ClockState::Playing;
        self.current_step = 0;
        log::debug!("clock started at {} bpm", bpm);
        Schedule::TickIn(tick_interval(bpm))
    }

    /// Stops and silences everything. Safe to call when already stopped.
    pub fn stop(&mut self) -> (Vec<PlaybackEvent>, Schedule) {
        if self.state == ClockState::Playing {
            log::debug!("clock stopped at step {}", self.current_step);
        }
        self.state = ClockState::Stopped;
        (vec![PlaybackEvent::AllNotesOff], Schedule::Cancel)
    }

    /// Releases the notes of the current step, moves to the next one and
    /// starts its notes. The next tick uses the tempo as of now.
    ///
    /// A tick that arrives after `stop` is ignored.
    pub fn on_tick(&mut self, grid: &Grid, bpm: u16) -> (Vec<PlaybackEvent>, Schedule) {
        if self.state != ClockState::Playing {
            return (Vec::new(), Schedule::Unchanged);
        }

        let mut events: Vec<PlaybackEvent> = grid
            .active_at(self.current_step)
            .map(|(channel, note)| PlaybackEvent::NoteOff { channel, note })
            .collect();

        self.current_step = (self.current_step + 1) % NUM_STEPS;

        events.extend(
            grid.active_at(self.current_step)
                .map(|(channel, note)| PlaybackEvent::NoteOn {
                    channel,
                    note,
                    velocity: STEP_VELOCITY,
                }),
        );

        (events, Schedule::TickIn(tick_interval(bpm)))
    }
}

impl Default for StepClock {
    fn default() -> Self {
        Self::new()
    }
}
