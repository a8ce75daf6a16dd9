/// GRIDSEQ - A four channel step sequencer library
///
/// This library provides the core components of the sequencer:
/// - A fixed 4x16 note grid with tempo and session commands
/// - A step clock that turns tempo into note events
/// - A standard MIDI file codec for persisting the grid
/// - A polyphonic synthesizer for local playback
/// - MIDI input/output for external devices

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

/// Number of channels (rows) in the grid.
pub const NUM_CHANNELS: usize = 4;
/// Number of steps (columns) in the grid, one bar of sixteenth notes.
pub const NUM_STEPS: usize = 16;

pub const DEFAULT_BPM: u16 = 120;
pub const MIN_BPM: u16 = 20;
pub const MAX_BPM: u16 = 300;
/// Tempo change applied by a single increment/decrement command.
pub const BPM_STEP: u16 = 5;

/// Velocity used for every note the sequencer emits or writes.
pub const STEP_VELOCITY: u8 = 100;

// Re-export commonly used types
pub use audio::{AudioOutput, PcmStream, Synth, VoicePool, Waveform};
pub use config::{Config, SynthConfig};
pub use error::{Error, Result};
pub use midi::{midi_note_name, MidiInputDevice, MidiMessage, MidiOutputDevice};
pub use sequencer::playback::{ClockState, PlaybackEvent, Schedule, StepClock};
pub use sequencer::timer::TickTimer;
pub use sequencer::{Cell, Command, Grid, NoteSink, Session};
