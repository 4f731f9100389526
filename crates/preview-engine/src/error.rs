//! Error types for the engine module.

use thiserror::Error;

use preview_audio::AudioError;
use preview_ipc::{ConfigError, StartupPhase};
use preview_source::SourceError;
use preview_video::VideoError;

/// Errors that can stop the supervisor from running.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A startup phase failed.
    #[error("{} failed: {source}", .phase.name())]
    Startup {
        phase: StartupPhase,
        #[source]
        source: Box<EngineError>,
    },

    /// Media source error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Video path error.
    #[error(transparent)]
    Video(#[from] VideoError),

    /// Audio path error.
    #[error(transparent)]
    Audio(#[from] AudioError),
}
