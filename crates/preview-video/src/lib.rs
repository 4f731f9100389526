//! Video path of the RTMP preview pipeline.
//!
//! Frames are read from the media source's video channel, queued with a
//! drop-on-full policy, held back by a fixed-depth resynchronizer and then
//! handed to a [`Renderer`].

mod error;
mod frame;
mod reader;
mod render;
mod resync;

pub use error::VideoError;
pub use frame::VideoFrame;
pub use reader::spawn_frame_reader;
pub use render::{HeadlessRenderer, Renderer};
pub use resync::Resynchronizer;

/// Result type for video operations.
pub type VideoResult<T> = Result<T, VideoError>;
