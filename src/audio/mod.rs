/// Audio output using cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

mod pcm;
mod voice;

pub use pcm::{PcmStream, BYTES_PER_FRAME, PCM_CHANNELS};
pub use voice::{midi_note_to_frequency, quantize, Voice, VoicePool, Waveform};

use crate::config::SynthConfig;
use crate::error::{Error, Result};
use crate::sequencer::NoteSink;

/// Sample rate used when there is no device to ask.
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Cloneable handle to the shared voice pool.
///
/// Every command and every rendered buffer goes through the same lock, so
/// the sequencer, a MIDI input callback and the UI can all drive one synth.
#[derive(Clone)]
pub struct Synth {
    pool: Arc<Mutex<VoicePool>>,
}

impl Synth {
    pub fn new(sample_rate: u32, config: &SynthConfig) -> Self {
        Self::from_pool(VoicePool::new(sample_rate, config))
    }

    pub fn from_pool(pool: VoicePool) -> Self {
        Self {
            pool: Arc::new(Mutex::new(pool)),
        }
    }

    /// Locks the pool. A panic elsewhere while holding the lock leaves the
    /// pool in a usable state, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, VoicePool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        self.lock().note_on(channel, note, velocity);
    }

    pub fn note_off(&self, channel: u8, note: u8) {
        self.lock().note_off(channel, note);
    }

    pub fn all_notes_off(&self) {
        self.lock().all_notes_off();
    }

    pub fn set_volume(&self, volume: f32) {
        self.lock().set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.lock().master_volume()
    }

    pub fn set_waveform(&self, channel: u8, waveform: Waveform) {
        self.lock().set_waveform(channel, waveform);
    }

    pub fn active_voices(&self) -> usize {
        self.lock().active_voices()
    }

    /// Renders `frames` quantized mono samples.
    pub fn render(&self, frames: usize) -> Vec<i16> {
        self.lock().render(frames)
    }

    /// Releases every note, then cuts them so nothing is left sounding
    /// once the output goes away.
    pub fn shutdown(&self) {
        let mut pool = self.lock();
        pool.all_notes_off();
        pool.silence();
    }
}

impl NoteSink for Synth {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        Synth::note_on(self, channel, note, velocity);
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        Synth::note_off(self, channel, note);
    }

    fn all_notes_off(&mut self) {
        Synth::all_notes_off(self);
    }
}

pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    synth: Synth,
}

impl AudioOutput {
    /// Opens the default output device and starts rendering.
    pub fn new(config: &SynthConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioDevice("no default output device".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| Error::AudioDevice(format!("no default output config: {}", e)))?;

        let sample_rate = supported.sample_rate().0;
        let synth = Synth::new(sample_rate, config);
        let stream = Self::setup_audio_stream(&device, &supported, synth.clone())?;

        stream
            .play()
            .map_err(|e| Error::AudioDevice(format!("failed to play output stream: {}", e)))?;

        if let Ok(name) = device.name() {
            log::info!("audio output on {} at {} Hz", name, sample_rate);
        }

        Ok(Self {
            _stream: Some(stream),
            synth,
        })
    }

    /// An output with no device behind it. Commands are accepted and
    /// nothing is heard.
    pub fn silent(config: &SynthConfig) -> Self {
        Self {
            _stream: None,
            synth: Synth::new(FALLBACK_SAMPLE_RATE, config),
        }
    }

    fn setup_audio_stream(
        device: &cpal::Device,
        supported: &cpal::SupportedStreamConfig,
        synth: Synth,
    ) -> Result<cpal::Stream> {
        let config: cpal::StreamConfig = supported.clone().into();
        let channels = config.channels as usize;
        let err_fn = |err| log::error!("audio stream error: {}", err);

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    synth.lock().fill_f32(data, channels);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    synth.lock().fill_i16(data, channels);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(Error::AudioDevice(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream.map_err(|e| Error::AudioDevice(format!("failed to build output stream: {}", e)))
    }

    pub fn synth(&self) -> &Synth {
        &self.synth
    }

    pub fn has_device(&self) -> bool {
        self._stream.is_some()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.synth.shutdown();
    }
}
