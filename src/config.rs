/// Engine configuration, loaded from an optional JSON file
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::Waveform;
use crate::error::{Error, Result};

/// Number of MIDI channels that can carry a waveform assignment.
pub const MIDI_CHANNELS: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub max_voices: usize,
    pub master_volume: f32,
    /// Envelope rise per frame while a voice is held.
    pub attack_increment: f32,
    /// Envelope multiplier per frame once a voice is released.
    pub release_factor: f32,
    /// Released voices below this envelope are freed.
    pub silence_threshold: f32,
    /// Per-voice headroom so a few stacked voices don't clip.
    pub voice_gain: f32,
    pub waveforms: [Waveform; MIDI_CHANNELS],
}

impl Default for SynthConfig {
    fn default() -> Self {
        let mut waveforms = [Waveform::Sine; MIDI_CHANNELS];
        waveforms[1] = Waveform::Triangle;
        waveforms[2] = Waveform::Sawtooth;
        waveforms[3] = Waveform::Square;

        Self {
            max_voices: 64,
            master_volume: 0.3,
            attack_increment: 0.001,
            release_factor: 0.9995,
            silence_threshold: 0.001,
            voice_gain: 0.2,
            waveforms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub synth: SynthConfig,
    /// Client name registered with the system MIDI service.
    pub midi_client_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            synth: SynthConfig::default(),
            midi_client_name: "GRIDSEQ".to_string(),
        }
    }
}

impl Config {
    /// Reads a JSON config. A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        Ok(serde_json::from_str(&data)?)
    }
}
