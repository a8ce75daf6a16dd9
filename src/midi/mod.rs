/// MIDI input and output using midir
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::audio::Synth;
use crate::error::{Error, Result};
use crate::sequencer::playback::PlaybackEvent;
use crate::sequencer::NoteSink;
use crate::NUM_CHANNELS;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PITCH_BEND: u8 = 0xE0;
const ALL_NOTES_OFF: u8 = 123;

/// Channel voice message received from a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit value, 8192 is centre.
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parses one complete message. Anything else, including system
    /// messages and truncated input, gives `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0F;
        let data1 = *data.first()? & 0x7F;
        let data2 = *data.get(1)? & 0x7F;

        match status & 0xF0 {
            NOTE_ON => Some(MidiMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            }),
            NOTE_OFF => Some(MidiMessage::NoteOff {
                channel,
                note: data1,
            }),
            CONTROL_CHANGE => Some(MidiMessage::ControlChange {
                channel,
                controller: data1,
                value: data2,
            }),
            PITCH_BEND => Some(MidiMessage::PitchBend {
                channel,
                value: (u16::from(data2) << 7) | u16::from(data1),
            }),
            _ => None,
        }
    }

    /// Plays the message on the synth. A note-on with velocity 0 releases
    /// the note. Pitch bend and controllers other than all-notes-off are
    /// not acted on.
    pub fn apply_to(&self, synth: &Synth) {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => synth.note_on(channel, note, velocity),
            MidiMessage::NoteOff { channel, note } => synth.note_off(channel, note),
            MidiMessage::ControlChange {
                controller: ALL_NOTES_OFF,
                ..
            } => synth.all_notes_off(),
            MidiMessage::ControlChange { .. } | MidiMessage::PitchBend { .. } => {}
        }
    }
}

/// Wire bytes for an outgoing event. `AllNotesOff` expands to one CC123
/// per sequencer channel.
pub fn encode_event(event: &PlaybackEvent) -> Vec<[u8; 3]> {
    match *event {
        PlaybackEvent::NoteOn {
            channel,
            note,
            velocity,
        } => vec![[NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F]],
        PlaybackEvent::NoteOff { channel, note } => {
            vec![[NOTE_OFF | (channel & 0x0F), note & 0x7F, 0]]
        }
        PlaybackEvent::AllNotesOff => (0..NUM_CHANNELS as u8)
            .map(|channel| [CONTROL_CHANGE | channel, ALL_NOTES_OFF, 0])
            .collect(),
    }
}

pub struct MidiOutputDevice {
    client_name: String,
    connection: Option<MidiOutputConnection>,
}

impl MidiOutputDevice {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            connection: None,
        }
    }

    pub fn available_ports(client_name: &str) -> Vec<String> {
        match MidiOutput::new(client_name) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("cannot list MIDI outputs: {}", e);
                vec![]
            }
        }
    }

    /// Connects to output port `port_index`, closing any open port first.
    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        self.close();

        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| Error::MidiDevice(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::MidiDevice(format!("no MIDI output port {}", port_index)))?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("port {}", port_index));

        let connection = midi_out
            .connect(port, &self.client_name)
            .map_err(|e| Error::MidiDevice(format!("failed to connect to {}: {}", port_name, e)))?;

        log::info!("MIDI output connected to {}", port_name);
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends an event. Without a connection this does nothing.
    pub fn send(&mut self, event: &PlaybackEvent) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            for message in encode_event(event) {
                conn.send(&message)
                    .map_err(|e| Error::MidiDevice(format!("failed to send {:?}: {}", event, e)))?;
            }
        }
        Ok(())
    }

    /// Silences the receiving device and drops the connection.
    pub fn close(&mut self) {
        if self.connection.is_none() {
            return;
        }
        if let Err(e) = self.send(&PlaybackEvent::AllNotesOff) {
            log::warn!("{}", e);
        }
        if let Some(conn) = self.connection.take() {
            conn.close();
            log::info!("MIDI output closed");
        }
    }

    fn send_logged(&mut self, event: PlaybackEvent) {
        if let Err(e) = self.send(&event) {
            log::warn!("{}", e);
        }
    }
}

impl NoteSink for MidiOutputDevice {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.send_logged(PlaybackEvent::NoteOn {
            channel,
            note,
            velocity,
        });
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        self.send_logged(PlaybackEvent::NoteOff { channel, note });
    }

    fn all_notes_off(&mut self) {
        self.send_logged(PlaybackEvent::AllNotesOff);
    }
}

impl Drop for MidiOutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Live controller input driving the synth.
pub struct MidiInputDevice {
    connection: Option<MidiInputConnection<()>>,
}

impl MidiInputDevice {
    pub fn available_ports(client_name: &str) -> Vec<String> {
        match MidiInput::new(client_name) {
            Ok(midi_in) => midi_in
                .ports()
                .iter()
                .filter_map(|p| midi_in.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("cannot list MIDI inputs: {}", e);
                vec![]
            }
        }
    }

    /// Opens input port `port_index`. Every parsed message is applied to
    /// `synth` and then handed to `observer`.
    pub fn connect<F>(
        port_index: usize,
        client_name: &str,
        synth: Synth,
        mut observer: F,
    ) -> Result<Self>
    where
        F: FnMut(MidiMessage) + Send + 'static,
    {
        let mut midi_in = MidiInput::new(client_name)
            .map_err(|e| Error::MidiDevice(format!("failed to create MIDI input: {}", e)))?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::MidiDevice(format!("no MIDI input port {}", port_index)))?;
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| format!("port {}", port_index));

        let connection = midi_in
            .connect(
                port,
                client_name,
                move |_stamp, bytes, _| match MidiMessage::parse(bytes) {
                    Some(message) => {
                        message.apply_to(&synth);
                        observer(message);
                    }
                    None => log::trace!("ignoring MIDI bytes {:02X?}", bytes),
                },
                (),
            )
            .map_err(|e| Error::MidiDevice(format!("failed to connect to {}: {}", port_name, e)))?;

        log::info!("MIDI input connected to {}", port_name);
        Ok(Self {
            connection: Some(connection),
        })
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            log::info!("MIDI input closed");
        }
    }
}

impl Drop for MidiInputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
