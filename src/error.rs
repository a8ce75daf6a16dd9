use std::path::PathBuf;

/// Errors surfaced to the caller for display.
///
/// The note/render hot path never produces these; out of range input there
/// is clamped instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode MIDI file: {0}")]
    Encode(#[source] std::io::Error),

    #[error("no file path set")]
    NoFilePath,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("MIDI device error: {0}")]
    MidiDevice(String),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
