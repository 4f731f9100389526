//! Error types for configuration handling.

use thiserror::Error;

/// Errors raised while validating or deriving values from a [`PipelineConfig`].
///
/// [`PipelineConfig`]: crate::PipelineConfig
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric field that must be positive was zero.
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    /// The resync delay is negative, NaN or infinite.
    #[error("Invalid resync delay: {0} seconds")]
    InvalidDelay(f64),

    /// The resync delay holds back more frames than allowed.
    #[error("Resync delay of {delay} seconds exceeds {max_frames} frames")]
    DelayTooLong { delay: f64, max_frames: usize },

    /// The relay port collides with the public ingest port.
    #[error("Relay port {0} must differ from the ingest port")]
    RelayPortConflict(u16),

    /// The ingest URL could not be built.
    #[error("Invalid ingest URL: {0}")]
    InvalidUrl(String),

    /// A frame size does not fit in memory on this platform.
    #[error("Frame dimensions {width}x{height} overflow the addressable size")]
    FrameTooLarge { width: u32, height: u32 },
}
