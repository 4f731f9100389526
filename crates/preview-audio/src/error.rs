//! Error types for the audio module.

use thiserror::Error;

/// Errors that can occur on the audio path.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No default output device.
    #[error("No audio output device available")]
    NoOutputDevice,

    /// The output stream could not be built or started.
    #[error("Audio device error: {0}")]
    Device(String),

    /// The device stopped consuming samples.
    #[error("Audio device stopped consuming samples for {0} ms")]
    Stalled(u64),

    /// A chunk is not a whole number of sample frames.
    #[error("Chunk of {len} bytes is not a multiple of {frame_bytes}")]
    InvalidChunk { len: usize, frame_bytes: usize },

    /// A driver or reader thread could not be started.
    #[error("Failed to start audio thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// The driver thread panicked.
    #[error("Audio driver thread panicked")]
    DriverPanicked,
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::Device(err.to_string())
    }
}
