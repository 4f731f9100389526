//! Error types for the video module.

use thiserror::Error;

/// Errors that can occur on the video path.
#[derive(Debug, Error)]
pub enum VideoError {
    /// The window or surface could not be created.
    #[error("Failed to create window: {0}")]
    WindowCreation(String),

    /// No usable GPU adapter or device.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// Presenting a frame failed.
    #[error("Render failed: {0}")]
    RenderFailed(String),

    /// A reader thread could not be started.
    #[error("Failed to start frame reader: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}
