//! Error types for the source module.

use std::process::ExitStatus;

use thiserror::Error;

use preview_ipc::ConfigError;

/// Errors that can occur while launching or reading a media source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The ffmpeg executable could not be found.
    #[error("ffmpeg not found at '{0}'; install it or pass --ffmpeg <path>")]
    ToolMissing(String),

    /// The ffmpeg executable ran but reported failure.
    #[error("'{path}' exited with {status}")]
    ToolFailed { path: String, status: ExitStatus },

    /// A process could not be spawned.
    #[error("Failed to spawn {instance} instance: {source}")]
    Spawn {
        instance: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A spawned process did not expose an expected pipe.
    #[error("{instance} instance has no {pipe} pipe")]
    MissingPipe {
        instance: &'static str,
        pipe: &'static str,
    },

    /// The requested topology cannot run on this platform.
    #[error("{0} topology is not supported on this platform")]
    UnsupportedTopology(&'static str),

    /// The source was started twice.
    #[error("Media source already started")]
    AlreadyStarted,

    /// Automatic installation is not available.
    #[error("Automatic ffmpeg installation is not supported here: {0}")]
    InstallUnsupported(String),

    /// Installation was attempted and failed.
    #[error("ffmpeg installation failed: {0}")]
    InstallFailed(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
