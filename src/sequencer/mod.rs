/// Core sequencer logic - grid state, tempo and session commands
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::{BPM_STEP, DEFAULT_BPM, MAX_BPM, MIN_BPM, NUM_CHANNELS, NUM_STEPS};

pub mod file;
pub mod playback;
pub mod timer;

use playback::{PlaybackEvent, Schedule, StepClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub active: bool,
    pub note: u8,
}

/// The 4x16 pattern. Each channel starts on its own default note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: [[Cell; NUM_STEPS]; NUM_CHANNELS],
}

impl Grid {
    /// C4, D4, E4, F4
    pub const DEFAULT_NOTES: [u8; NUM_CHANNELS] = [60, 62, 64, 65];

    pub fn new() -> Self {
        Self {
            cells: Self::DEFAULT_NOTES.map(|note| {
                [Cell {
                    active: false,
                    note,
                }; NUM_STEPS]
            }),
        }
    }

    pub fn cell(&self, channel: usize, step: usize) -> Option<Cell> {
        self.cells
            .get(channel)
            .and_then(|row| row.get(step))
            .copied()
    }

    pub fn is_active(&self, channel: usize, step: usize) -> bool {
        self.cell(channel, step).map_or(false, |c| c.active)
    }

    pub fn note(&self, channel: usize, step: usize) -> u8 {
        self.cell(channel, step).map_or(0, |c| c.note)
    }

    /// The steps of one channel. Out of range channels clamp to the last one.
    pub fn channel(&self, channel: usize) -> &[Cell; NUM_STEPS] {
        &self.cells[channel.min(NUM_CHANNELS - 1)]
    }

    pub fn set(&mut self, channel: usize, step: usize, active: bool, note: u8) {
        if let Some(cell) = self.cell_mut(channel, step) {
            *cell = Cell {
                active,
                note: note.min(127),
            };
        }
    }

    pub fn toggle(&mut self, channel: usize, step: usize) {
        if let Some(cell) = self.cell_mut(channel, step) {
            cell.active = !cell.active;
        }
    }

    /// Moves the note by `delta` semitones. Returns false when the note
    /// was already at the edge of the MIDI range (or the cell is out of range).
    pub fn adjust_note(&mut self, channel: usize, step: usize, delta: i8) -> bool {
        let Some(cell) = self.cell_mut(channel, step) else {
            return false;
        };
        let note = (i16::from(cell.note) + i16::from(delta)).clamp(0, 127) as u8;
        let changed = note != cell.note;
        cell.note = note;
        changed
    }

    /// Deactivates every step of a channel. Notes are kept.
    pub fn clear_channel(&mut self, channel: usize) {
        if let Some(row) = self.cells.get_mut(channel) {
            for cell in row {
                cell.active = false;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.active).count()
    }

    /// Active cells at `step` as (channel, note) pairs.
    pub fn active_at(&self, step: usize) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.cells.iter().enumerate().filter_map(move |(channel, row)| {
            row.get(step)
                .filter(|cell| cell.active)
                .map(|cell| (channel as u8, cell.note))
        })
    }

    fn cell_mut(&mut self, channel: usize, step: usize) -> Option<&mut Cell> {
        self.cells.get_mut(channel).and_then(|row| row.get_mut(step))
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

/// Somewhere note events can go: the local synth or an external MIDI port.
pub trait NoteSink {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, note: u8);
    fn all_notes_off(&mut self);
}

/// Fans every event out to several sinks.
impl<S: NoteSink> NoteSink for [S] {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        for sink in self {
            sink.note_on(channel, note, velocity);
        }
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        for sink in self {
            sink.note_off(channel, note);
        }
    }

    fn all_notes_off(&mut self) {
        for sink in self {
            sink.all_notes_off();
        }
    }
}

/// Discrete intents delivered by the interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ToggleStep { channel: usize, step: usize },
    AdjustNote { channel: usize, step: usize, delta: i8 },
    /// Changes tempo by `delta` steps of [`BPM_STEP`].
    AdjustTempo { delta: i8 },
    StartPlayback,
    StopPlayback,
    ClearChannel { channel: usize },
    Load(PathBuf),
    Create(PathBuf),
}

/// One editing session: the grid, its tempo, the file it lives in and the
/// step clock that plays it.
pub struct Session {
    grid: Grid,
    bpm: u16,
    file_path: Option<PathBuf>,
    clock: StepClock,
    message: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            grid: Grid::new(),
            bpm: DEFAULT_BPM,
            file_path: None,
            clock: StepClock::new(),
            message: String::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    /// (current step, playing)
    pub fn playhead(&self) -> (usize, bool) {
        (self.clock.current_step(), self.clock.is_playing())
    }

    /// Applies a command, routing any note events to `sink`.
    ///
    /// The returned schedule tells the caller's timer what to do next.
    pub fn apply(&mut self, command: Command, sink: &mut dyn NoteSink) -> Result<Schedule> {
        let result = match command {
            Command::ToggleStep { channel, step } => self.toggle_step(channel, step),
            Command::AdjustNote {
                channel,
                step,
                delta,
            } => self.adjust_note(channel, step, delta),
            Command::AdjustTempo { delta } => self.adjust_tempo(delta),
            Command::ClearChannel { channel } => self.clear_channel(channel),
            Command::StartPlayback => return Ok(self.start_playback()),
            Command::StopPlayback => return Ok(self.stop_playback(sink)),
            Command::Load(path) => {
                let schedule = self.halt(sink);
                return self.load(path).map(|()| schedule);
            }
            Command::Create(path) => {
                let schedule = self.halt(sink);
                return self.create(path).map(|()| schedule);
            }
        };
        result.map(|()| Schedule::Unchanged)
    }

    /// Starts a fresh default pattern at `path` and writes it.
    pub fn create(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.reset(path.into());
        self.save()?;
        self.message = "New file created".to_string();
        Ok(())
    }

    /// Opens `path`. A file that is missing or not a MIDI file is replaced
    /// with the default pattern, which is written straight away.
    pub fn load(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.reset(path.clone());

        match file::read_file(&path) {
            Some((grid, bpm)) => {
                self.grid = grid;
                self.bpm = bpm;
                log::debug!("loaded {} at {} bpm", path.display(), bpm);
            }
            None => {
                log::warn!("no usable pattern in {}, writing default", path.display());
                self.save()?;
            }
        }

        self.message = format!("Loaded: {}", path.display());
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        let path = self.file_path.as_deref().ok_or(Error::NoFilePath)?;
        match file::write_file(path, &self.grid, self.bpm) {
            Ok(()) => {
                self.message = "File saved".to_string();
                Ok(())
            }
            Err(e) => {
                self.message = format!("Error saving: {}", e);
                Err(e)
            }
        }
    }

    pub fn toggle_step(&mut self, channel: usize, step: usize) -> Result<()> {
        if self.grid.cell(channel, step).is_none() {
            return Ok(());
        }
        self.grid.toggle(channel, step);
        self.save()
    }

    pub fn adjust_note(&mut self, channel: usize, step: usize, delta: i8) -> Result<()> {
        if self.grid.adjust_note(channel, step, delta) {
            self.save()?;
        }
        Ok(())
    }

    /// Moves the tempo by `delta` steps of [`BPM_STEP`]. At either end of the
    /// range a step that would leave it is ignored.
    pub fn adjust_tempo(&mut self, delta: i8) -> Result<()> {
        let change = i32::from(delta) * i32::from(BPM_STEP);
        let bpm = i32::from(self.bpm) + change;
        if change == 0 || bpm < i32::from(MIN_BPM) || bpm > i32::from(MAX_BPM) {
            return Ok(());
        }
        self.bpm = bpm as u16;
        self.save()
    }

    pub fn clear_channel(&mut self, channel: usize) -> Result<()> {
        if channel >= NUM_CHANNELS {
            return Ok(());
        }
        self.grid.clear_channel(channel);
        self.save()
    }

    pub fn start_playback(&mut self) -> Schedule {
        self.clock.start(self.bpm)
    }

    pub fn stop_playback(&mut self, sink: &mut dyn NoteSink) -> Schedule {
        let (events, schedule) = self.clock.stop();
        dispatch(&events, sink);
        schedule
    }

    /// Advances the clock one step, sending its note events to `sink`.
    pub fn on_tick(&mut self, sink: &mut dyn NoteSink) -> Schedule {
        let (events, schedule) = self.clock.on_tick(&self.grid, self.bpm);
        dispatch(&events, sink);
        schedule
    }

    fn halt(&mut self, sink: &mut dyn NoteSink) -> Schedule {
        if self.clock.is_playing() {
            self.stop_playback(sink)
        } else {
            Schedule::Unchanged
        }
    }

    fn reset(&mut self, path: PathBuf) {
        self.grid = Grid::new();
        self.bpm = DEFAULT_BPM;
        self.file_path = Some(path);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dispatch(events: &[PlaybackEvent], sink: &mut dyn NoteSink) {
    for event in events {
        event.send_to(sink);
    }
}
