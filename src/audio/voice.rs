/// Voice pool - polyphonic oscillator voices with attack/release envelopes
use serde::{Deserialize, Serialize};

use crate::config::{SynthConfig, MIDI_CHANNELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One sample of the waveform at `phase` in [0, 1).
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * std::f32::consts::TAU).sin(),
            // Square is louder than the others at equal amplitude
            Waveform::Square => {
                if phase < 0.5 {
                    0.8
                } else {
                    -0.8
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub note: u8,
    pub channel: u8,
    pub velocity: u8,
    pub frequency: f32,
    pub phase: f32,
    pub envelope: f32,
    pub releasing: bool,
    pub active: bool,
}

impl Voice {
    fn idle() -> Self {
        Self {
            note: 0,
            channel: 0,
            velocity: 0,
            frequency: 0.0,
            phase: 0.0,
            envelope: 0.0,
            releasing: false,
            active: false,
        }
    }
}

/// Fixed-capacity arena of voices.
///
/// Slots are allocated lazily up to `max_voices` and never shrink, so the
/// render path does not allocate once the pool is warm.
pub struct VoicePool {
    sample_rate: f32,
    voices: Vec<Voice>,
    max_voices: usize,
    master_volume: f32,
    waveforms: [Waveform; MIDI_CHANNELS],
    attack_increment: f32,
    release_factor: f32,
    silence_threshold: f32,
    voice_gain: f32,
}

impl VoicePool {
    /// Envelope settings outside their working range fall back to the
    /// defaults, so every released voice still decays and gets freed.
    pub fn new(sample_rate: u32, config: &SynthConfig) -> Self {
        let defaults = SynthConfig::default();
        let max_voices = config.max_voices.max(1);
        let master_volume = if config.master_volume.is_nan() {
            defaults.master_volume
        } else {
            config.master_volume.clamp(0.0, 1.0)
        };

        Self {
            sample_rate: sample_rate.max(1) as f32,
            voices: Vec::with_capacity(max_voices),
            max_voices,
            master_volume,
            waveforms: config.waveforms,
            attack_increment: in_range(config.attack_increment, 0.0, 1.0, defaults.attack_increment),
            release_factor: in_range(config.release_factor, 0.0, 1.0, defaults.release_factor),
            silence_threshold: in_range(
                config.silence_threshold,
                0.0,
                1.0,
                defaults.silence_threshold,
            ),
            voice_gain: if config.voice_gain.is_finite() && config.voice_gain >= 0.0 {
                config.voice_gain
            } else {
                defaults.voice_gain
            },
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn waveform(&self, channel: u8) -> Waveform {
        self.waveforms[channel as usize % MIDI_CHANNELS]
    }

    pub fn set_waveform(&mut self, channel: u8, waveform: Waveform) {
        self.waveforms[channel as usize % MIDI_CHANNELS] = waveform;
    }

    /// Starts a note. Velocity 0 is a note-off.
    ///
    /// Slot choice: first inactive slot, else a new slot while below
    /// capacity, else slot 0.
    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(channel, note);
            return;
        }

        let slot = match self.voices.iter().position(|v| !v.active) {
            Some(slot) => slot,
            None if self.voices.len() < self.max_voices => {
                self.voices.push(Voice::idle());
                self.voices.len() - 1
            }
            None => 0,
        };

        let note = note.min(127);
        self.voices[slot] = Voice {
            note,
            channel,
            velocity: velocity.min(127),
            frequency: midi_note_to_frequency(note),
            phase: 0.0,
            envelope: 0.0,
            releasing: false,
            active: true,
        };
    }

    /// Releases the first held voice playing `note` on `channel`.
    pub fn note_off(&mut self, channel: u8, note: u8) {
        if let Some(voice) = self
            .voices
            .iter_mut()
            .find(|v| v.active && !v.releasing && v.channel == channel && v.note == note)
        {
            voice.releasing = true;
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.active) {
            voice.releasing = true;
        }
    }

    /// Drops every voice immediately, without a release tail.
    pub fn silence(&mut self) {
        for voice in &mut self.voices {
            voice.active = false;
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        // NaN clamps to NaN, treat it as mute
        self.master_volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    /// Mixes one frame and advances every active voice by one sample.
    /// The result is clipped to [-1, 1].
    pub fn next_sample(&mut self) -> f32 {
        let mut out = 0.0f32;

        for voice in &mut self.voices {
            if !voice.active {
                continue;
            }

            let waveform = self.waveforms[voice.channel as usize % MIDI_CHANNELS];
            let velocity_scale = voice.velocity as f32 / 127.0;
            out += waveform.sample(voice.phase) * velocity_scale * voice.envelope * self.voice_gain;

            voice.phase += voice.frequency / self.sample_rate;
            if voice.phase >= 1.0 {
                voice.phase = voice.phase.fract();
            }

            if voice.releasing {
                voice.envelope *= self.release_factor;
                if voice.envelope < self.silence_threshold {
                    voice.active = false;
                }
            } else if voice.envelope < 1.0 {
                voice.envelope = (voice.envelope + self.attack_increment).min(1.0);
            }
        }

        (out * self.master_volume).clamp(-1.0, 1.0)
    }

    /// Renders `frames` quantized 16-bit mono samples.
    pub fn render(&mut self, frames: usize) -> Vec<i16> {
        (0..frames).map(|_| quantize(self.next_sample())).collect()
    }

    /// Fills an interleaved float buffer, writing the same sample to every channel.
    pub fn fill_f32(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }

    /// Fills an interleaved 16-bit buffer, writing the same sample to every channel.
    pub fn fill_i16(&mut self, data: &mut [i16], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = quantize(self.next_sample());
            frame.fill(sample);
        }
    }
}

/// `value` if it lies strictly between `low` and `high`, otherwise
/// `fallback`. NaN falls back.
fn in_range(value: f32, low: f32, high: f32, fallback: f32) -> f32 {
    if value > low && value < high {
        value
    } else {
        fallback
    }
}

#[inline]
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> VoicePool {
        VoicePool::new(44100, &SynthConfig::default())
    }

    #[test]
    fn test_frequency_law() {
        let mut pool = pool();
        pool.note_on(0, 69, 100);
        pool.note_on(0, 60, 100);
        assert_eq!(pool.voices()[0].frequency, 440.0);
        assert!((pool.voices()[1].frequency - 261.63).abs() < 0.01);
    }

    #[test]
    fn test_distinct_notes_grow_pool() {
        let mut pool = pool();
        for i in 0..10u8 {
            pool.note_on(i % 4, 40 + i, 100);
            assert_eq!(pool.voices().len(), i as usize + 1);
        }
        assert_eq!(pool.active_voices(), 10);
    }

    #[test]
    fn test_inactive_slot_is_reused() {
        let mut pool = pool();
        pool.note_on(0, 60, 100);
        pool.note_on(0, 62, 100);
        pool.silence();
        pool.note_on(1, 64, 100);
        assert_eq!(pool.voices().len(), 2);
        assert_eq!(pool.voices()[0].note, 64);
        assert_eq!(pool.voices()[0].channel, 1);
    }

    #[test]
    fn test_full_pool_steals_slot_zero() {
        let mut pool = pool();
        for i in 0..64u8 {
            pool.note_on(0, i, 100);
        }
        assert_eq!(pool.voices().len(), 64);

        // age slot 0 relative to the others by retriggering it last
        pool.note_on(3, 100, 90);
        assert_eq!(pool.voices().len(), 64);
        assert_eq!(pool.voices()[0].note, 100);
        assert_eq!(pool.voices()[0].channel, 3);
        assert_eq!(pool.voices()[0].envelope, 0.0);

        pool.note_on(3, 101, 90);
        assert_eq!(pool.voices()[0].note, 101);
        assert_eq!(pool.voices()[1].note, 1);
    }

    #[test]
    fn test_envelope_attack_is_monotonic() {
        let mut pool = pool();
        pool.note_on(0, 69, 127);
        let mut last = pool.voices()[0].envelope;
        for _ in 0..900 {
            pool.render(1);
            let env = pool.voices()[0].envelope;
            assert!(env > last);
            assert!(env <= 1.0);
            last = env;
        }
        // well past the attack, should sit at exactly 1.0
        pool.render(2000);
        assert_eq!(pool.voices()[0].envelope, 1.0);
    }

    #[test]
    fn test_envelope_release_decays_and_frees() {
        let mut pool = pool();
        pool.note_on(0, 69, 127);
        pool.render(1500);
        pool.note_off(0, 69);

        let mut last = pool.voices()[0].envelope;
        let mut frames = 0;
        while pool.voices()[0].active {
            pool.render(1);
            let env = pool.voices()[0].envelope;
            assert!(env < last);
            last = env;
            frames += 1;
            assert!(frames < 20_000, "voice never freed");
        }
        assert!(last < 0.001);
    }

    #[test]
    fn test_velocity_zero_equals_note_off() {
        let mut a = pool();
        let mut b = pool();
        for p in [&mut a, &mut b] {
            p.note_on(2, 64, 100);
            p.render(10);
        }
        a.note_on(2, 64, 0);
        b.note_off(2, 64);
        assert_eq!(a.voices(), b.voices());
        assert!(a.voices()[0].releasing);
    }

    #[test]
    fn test_note_off_is_idempotent() {
        let mut pool = pool();
        pool.note_on(0, 60, 100);
        pool.render(10);
        pool.note_off(0, 60);
        let after_first = pool.voices().to_vec();
        assert!(after_first[0].releasing);

        pool.note_off(0, 60);
        assert_eq!(pool.voices(), &after_first[..]);
    }

    #[test]
    fn test_note_off_releases_one_voice_per_call() {
        let mut pool = pool();
        pool.note_on(0, 60, 100);
        pool.note_on(0, 60, 100);
        pool.note_off(0, 60);
        assert!(pool.voices()[0].releasing);
        assert!(!pool.voices()[1].releasing);
    }

    #[test]
    fn test_note_off_without_match_is_noop() {
        let mut pool = pool();
        pool.note_on(0, 60, 100);
        let before = pool.voices().to_vec();
        pool.note_off(1, 60);
        pool.note_off(0, 61);
        assert_eq!(pool.voices(), &before[..]);
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut pool = pool();
        pool.set_volume(1.5);
        assert_eq!(pool.master_volume(), 1.0);
        pool.set_volume(-0.5);
        assert_eq!(pool.master_volume(), 0.0);
        pool.set_volume(f32::NAN);
        assert_eq!(pool.master_volume(), 0.0);
    }

    #[test]
    fn test_output_is_clipped() {
        let mut pool = pool();
        pool.set_volume(1.0);
        for note in 0..64u8 {
            pool.note_on(3, note, 127);
        }
        for _ in 0..5000 {
            let s = pool.next_sample();
            assert!((-1.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_bad_release_settings_still_go_silent() {
        let config = SynthConfig {
            release_factor: 1.0,
            silence_threshold: 0.0,
            ..SynthConfig::default()
        };
        let mut pool = VoicePool::new(44100, &config);
        pool.note_on(0, 60, 100);
        pool.render(2000);
        pool.all_notes_off();

        let mut calls = 0;
        while pool.active_voices() > 0 {
            pool.render(1024);
            calls += 1;
            assert!(calls < 32, "released voice never freed");
        }
        assert!(pool.render(64).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_bad_attack_settings_fall_back() {
        for attack_increment in [0.0, -0.5, f32::NAN] {
            let config = SynthConfig {
                attack_increment,
                release_factor: f32::NAN,
                voice_gain: -1.0,
                ..SynthConfig::default()
            };
            let mut pool = VoicePool::new(44100, &config);
            pool.note_on(0, 60, 100);
            pool.render(100);
            assert!(pool.voices()[0].envelope > 0.0);
            assert!((pool.voices()[0].envelope - 0.1).abs() < 1e-4);
        }
    }

    #[test]
    fn test_release_factor_above_one_falls_back() {
        let config = SynthConfig {
            release_factor: 1.5,
            ..SynthConfig::default()
        };
        let mut pool = VoicePool::new(44100, &config);
        pool.note_on(0, 60, 100);
        pool.render(1000);
        pool.note_off(0, 60);
        let before = pool.voices()[0].envelope;
        pool.render(1);
        assert!(pool.voices()[0].envelope < before);
    }

    #[test]
    fn test_phase_wraps() {
        let mut pool = pool();
        pool.note_on(0, 127, 100);
        for _ in 0..1000 {
            pool.next_sample();
            let phase = pool.voices()[0].phase;
            assert!((0.0..1.0).contains(&phase));
        }
    }

    #[test]
    fn test_all_notes_off_releases_everything() {
        let mut pool = pool();
        pool.note_on(0, 60, 100);
        pool.note_on(1, 62, 100);
        pool.note_on(2, 64, 100);
        pool.all_notes_off();
        assert!(pool.voices().iter().all(|v| v.releasing));
    }

    #[test]
    fn test_waveform_shapes() {
        assert_eq!(Waveform::Sine.sample(0.0), 0.0);
        assert_eq!(Waveform::Square.sample(0.25), 0.8);
        assert_eq!(Waveform::Square.sample(0.75), -0.8);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
        assert_eq!(Waveform::Triangle.sample(0.5), 1.0);
        assert_eq!(Waveform::Triangle.sample(0.0), -1.0);
    }

    #[test]
    fn test_silent_pool_renders_zero() {
        let mut pool = pool();
        assert!(pool.render(256).iter().all(|&s| s == 0));
    }
}
