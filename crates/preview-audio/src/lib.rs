//! Audio path of the RTMP preview pipeline.
//!
//! PCM chunks are read from the media source's audio channel, queued with a
//! drop-on-full policy and played serially through an [`AudioSink`] by a
//! dedicated driver thread.

mod chunk;
mod device;
mod driver;
mod error;
mod reader;

pub use chunk::{AudioChunk, PcmFormat};
pub use device::CpalSink;
pub use driver::SinkDriver;
pub use error::AudioError;
pub use reader::spawn_sample_reader;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Plays PCM chunks on an output device.
pub trait AudioSink {
    /// Queue `chunk` for playback after every previously played chunk.
    ///
    /// Waits while the device buffer is full.
    fn play(&mut self, chunk: &AudioChunk) -> AudioResult<()>;
}

/// Opens an [`AudioSink`] for a PCM format.
///
/// Invoked on the driver thread, so the sink itself need not be `Send`.
pub type SinkFactory = Box<dyn FnOnce(&PcmFormat) -> AudioResult<Box<dyn AudioSink>> + Send>;
