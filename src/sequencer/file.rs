/// Standard MIDI file codec for the grid
///
/// Layout: format 1, 960 ticks per quarter note, a tempo track followed by one
/// track per grid channel. Each active cell becomes a note-on at
/// `step * 240` and a note-off one tick before the next step.
use std::path::Path;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use super::Grid;
use crate::error::{Error, Result};
use crate::{DEFAULT_BPM, MAX_BPM, MIN_BPM, NUM_CHANNELS, NUM_STEPS, STEP_VELOCITY};

pub const TICKS_PER_QUARTER: u16 = 960;
pub const TICKS_PER_STEP: u32 = TICKS_PER_QUARTER as u32 / 4;
/// Note length in ticks, kept short of the step boundary.
pub const NOTE_TICKS: u32 = TICKS_PER_STEP - 1;
pub const PATTERN_TICKS: u32 = NUM_STEPS as u32 * TICKS_PER_STEP;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

pub fn encode(grid: &Grid, bpm: u16) -> Result<Vec<u8>> {
    let mut tracks = Vec::with_capacity(NUM_CHANNELS + 1);
    tracks.push(tempo_track(bpm));
    for channel in 0..NUM_CHANNELS {
        tracks.push(channel_track(grid, channel));
    }

    let header = Header::new(Format::Parallel, Timing::Metrical(u15::from(TICKS_PER_QUARTER)));
    let mut bytes = Vec::new();
    Smf { header, tracks }
        .write_std(&mut bytes)
        .map_err(Error::Encode)?;
    Ok(bytes)
}

fn tempo_track(bpm: u16) -> Vec<TrackEvent<'static>> {
    let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    let micros_per_quarter = (MICROS_PER_MINUTE / f64::from(bpm)).round() as u32;

    vec![
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn channel_track(grid: &Grid, channel: usize) -> Vec<TrackEvent<'static>> {
    let midi_channel = u4::from(channel as u8);
    let mut events = Vec::new();
    let mut last_tick = 0u32;

    for (step, cell) in grid.channel(channel).iter().enumerate() {
        if !cell.active {
            continue;
        }
        let key = u7::from(cell.note);
        let position = step as u32 * TICKS_PER_STEP;

        events.push(TrackEvent {
            delta: u28::from(position - last_tick),
            kind: TrackEventKind::Midi {
                channel: midi_channel,
                message: MidiMessage::NoteOn {
                    key,
                    vel: u7::from(STEP_VELOCITY),
                },
            },
        });
        events.push(TrackEvent {
            delta: u28::from(NOTE_TICKS),
            kind: TrackEventKind::Midi {
                channel: midi_channel,
                message: MidiMessage::NoteOff {
                    key,
                    vel: u7::from(0_u8),
                },
            },
        });
        last_tick = position + NOTE_TICKS;
    }

    events.push(TrackEvent {
        delta: u28::from(PATTERN_TICKS.saturating_sub(last_tick)),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// Parses a file written by [`encode`] (or any compatible SMF).
///
/// Only note-on onsets populate the grid; note-offs and durations are
/// ignored. Returns `None` when the bytes are not a MIDI file.
pub fn try_decode(bytes: &[u8]) -> Option<(Grid, u16)> {
    let smf = Smf::parse(bytes).ok()?;

    let bpm = smf
        .tracks
        .iter()
        .flatten()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(micros)) if micros.as_int() > 0 => {
                let bpm = (MICROS_PER_MINUTE / f64::from(micros.as_int())).round();
                Some(bpm.clamp(f64::from(MIN_BPM), f64::from(MAX_BPM)) as u16)
            }
            _ => None,
        })
        .unwrap_or(DEFAULT_BPM);

    let mut grid = Grid::new();
    // track 0 holds tempo, tracks 1..=4 map to channels 0..=3
    for (channel, track) in smf.tracks.iter().skip(1).take(NUM_CHANNELS).enumerate() {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } = event.kind
            {
                let step = (tick / u64::from(TICKS_PER_STEP)) as usize;
                if vel.as_int() > 0 && step < NUM_STEPS {
                    grid.set(channel, step, true, key.as_int());
                }
            }
        }
    }

    Some((grid, bpm))
}

/// Like [`try_decode`], falling back to the default grid at the default tempo.
pub fn decode(bytes: &[u8]) -> (Grid, u16) {
    try_decode(bytes).unwrap_or_else(|| (Grid::new(), DEFAULT_BPM))
}

pub fn write_file(path: &Path, grid: &Grid, bpm: u16) -> Result<()> {
    let bytes = encode(grid, bpm)?;
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// Reads and decodes `path`. A missing or unreadable file is `None`, the
/// same as one that fails to parse.
pub fn read_file(path: &Path) -> Option<(Grid, u16)> {
    match std::fs::read(path) {
        Ok(bytes) => try_decode(&bytes),
        Err(e) => {
            log::debug!("could not read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arpeggio_grid() -> Grid {
        let mut grid = Grid::new();
        for (step, note) in [(0, 60), (4, 64), (8, 67), (12, 72)] {
            grid.set(0, step, true, note);
        }
        for (step, note) in [(2, 62), (6, 65), (10, 69), (14, 74)] {
            grid.set(1, step, true, note);
        }
        grid
    }

    #[test]
    fn test_round_trip() {
        let grid = arpeggio_grid();
        let bytes = encode(&grid, 120).unwrap();
        let (decoded, bpm) = try_decode(&bytes).unwrap();
        assert_eq!(bpm, 120);
        assert_eq!(decoded, grid);
    }

    #[test]
    fn test_round_trip_every_tempo() {
        let mut grid = Grid::new();
        grid.set(3, 15, true, 127);
        grid.set(2, 0, true, 0);
        for bpm in MIN_BPM..=MAX_BPM {
            let (decoded, decoded_bpm) = decode(&encode(&grid, bpm).unwrap());
            assert_eq!(decoded_bpm, bpm);
            assert_eq!(decoded, grid);
        }
    }

    #[test]
    fn test_round_trip_full_grid() {
        let mut grid = Grid::new();
        for channel in 0..NUM_CHANNELS {
            for step in 0..NUM_STEPS {
                grid.set(channel, step, true, (channel * 20 + step) as u8);
            }
        }
        let (decoded, _) = decode(&encode(&grid, 300).unwrap());
        assert_eq!(decoded, grid);
    }

    #[test]
    fn test_inactive_notes_are_not_preserved() {
        // inactive cells keep their default note after a round trip
        let mut grid = Grid::new();
        grid.set(0, 3, false, 90);
        let (decoded, _) = decode(&encode(&grid, 120).unwrap());
        assert_eq!(decoded, Grid::new());
    }

    #[test]
    fn test_track_layout() {
        let bytes = encode(&arpeggio_grid(), 120).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::from(960_u16)));
        assert_eq!(smf.tracks.len(), NUM_CHANNELS + 1);

        let tempo = &smf.tracks[0];
        assert!(tempo
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8))));
        assert!(tempo
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::Tempo(u24::from(500_000_u32)))));

        // channel 0: on@0 off@239 on@960 ...; last off at 12*240+239 = 3119
        let deltas: Vec<u32> = smf.tracks[1].iter().map(|e| e.delta.as_int()).collect();
        assert_eq!(deltas, vec![0, 239, 721, 239, 721, 239, 721, 239, 3840 - 3119]);

        // empty channels still close the pattern
        let empty = &smf.tracks[3];
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].delta.as_int(), PATTERN_TICKS);
    }

    #[test]
    fn test_last_step_closes_with_one_tick() {
        let mut grid = Grid::new();
        grid.set(0, 15, true, 60);
        let bytes = encode(&grid, 120).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let track = &smf.tracks[1];
        assert_eq!(track.last().unwrap().kind, TrackEventKind::Meta(MetaMessage::EndOfTrack));
        assert_eq!(track.last().unwrap().delta.as_int(), 1);
    }

    #[test]
    fn test_note_events_use_channel_and_velocity() {
        let mut grid = Grid::new();
        grid.set(2, 5, true, 48);
        let bytes = encode(&grid, 120).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(
            smf.tracks[3][0].kind,
            TrackEventKind::Midi {
                channel: u4::from(2_u8),
                message: MidiMessage::NoteOn {
                    key: u7::from(48_u8),
                    vel: u7::from(STEP_VELOCITY),
                },
            }
        );
    }

    #[test]
    fn test_garbage_decodes_to_default() {
        assert!(try_decode(b"not a midi file").is_none());
        assert!(try_decode(&[]).is_none());
        let (grid, bpm) = decode(b"MThd");
        assert_eq!(grid, Grid::new());
        assert_eq!(bpm, DEFAULT_BPM);
    }

    fn smf_bytes(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let header = Header::new(Format::Parallel, Timing::Metrical(u15::from(960_u16)));
        let mut bytes = Vec::new();
        Smf { header, tracks }.write_std(&mut bytes).unwrap();
        bytes
    }

    fn note_on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Midi {
                channel: u4::from(0_u8),
                message: MidiMessage::NoteOn {
                    key: u7::from(key),
                    vel: u7::from(vel),
                },
            },
        }
    }

    fn end(delta: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }
    }

    #[test]
    fn test_decode_without_tempo_uses_default() {
        let bytes = smf_bytes(vec![vec![end(0)], vec![note_on(480, 70, 90), end(0)]]);
        let (grid, bpm) = decode(&bytes);
        assert_eq!(bpm, DEFAULT_BPM);
        assert!(grid.is_active(0, 2));
        assert_eq!(grid.note(0, 2), 70);
    }

    #[test]
    fn test_decode_ignores_zero_velocity_and_late_notes() {
        let bytes = smf_bytes(vec![
            vec![end(0)],
            vec![
                note_on(0, 70, 0),
                note_on(250, 71, 100),
                note_on(PATTERN_TICKS, 72, 100),
                end(0),
            ],
        ]);
        let (grid, _) = decode(&bytes);
        assert!(!grid.is_active(0, 0));
        // 250 ticks lands inside step 1
        assert!(grid.is_active(0, 1));
        assert_eq!(grid.note(0, 1), 71);
        assert_eq!(grid.active_count(), 1);
    }

    #[test]
    fn test_decode_extra_and_missing_tracks() {
        let bytes = smf_bytes(vec![
            vec![end(0)],
            vec![note_on(0, 50, 100), end(0)],
            vec![end(0)],
            vec![end(0)],
            vec![end(0)],
            vec![note_on(0, 99, 100), end(0)],
        ]);
        let (grid, _) = decode(&bytes);
        assert_eq!(grid.active_count(), 1);
        assert_eq!(grid.note(0, 0), 50);

        let bytes = smf_bytes(vec![vec![end(0)], vec![note_on(240, 51, 100), end(0)]]);
        let (grid, _) = decode(&bytes);
        assert!(grid.is_active(0, 1));
        assert_eq!(grid.note(3, 0), Grid::DEFAULT_NOTES[3]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pattern.mid");
        write_file(&path, &arpeggio_grid(), 180).unwrap();
        let (grid, bpm) = read_file(&path).unwrap();
        assert_eq!(grid, arpeggio_grid());
        assert_eq!(bpm, 180);
    }

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file(&dir.path().join("nope.mid")).is_none());
    }

    #[test]
    fn test_write_to_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("pattern.mid");
        assert!(matches!(write_file(&path, &Grid::new(), 120), Err(Error::Io { .. })));
    }
}
