//! ffmpeg-backed RTMP ingest sources.
//!
//! The RTMP handshake, demuxing and decoding are all done by an external
//! `ffmpeg` process. This crate builds its command lines, supervises the
//! process(es) for both supported topologies and turns their raw output
//! pipes into fixed-size records.

mod channel;
mod error;
mod ffmpeg;
mod framing;
mod process;
mod pump;
mod topology;
mod tool;

pub use channel::{ClosedFlag, ExitNotice, SourceChannel};
pub use error::SourceError;
pub use ffmpeg::{
    audio_instance_command, single_channel_command, video_instance_command, AUDIO_PIPE_FD,
};
pub use framing::{FixedSizeReader, ReadOutcome};
pub use process::FfmpegProcess;
pub use pump::{pump_records, ReaderExit, ReaderSummary};
pub use topology::{create_source, DualInstanceSource, SingleChannelSource, SourceOutputs};
pub use tool::{install_ffmpeg, installer_command, probe_ffmpeg};

use preview_ipc::SourceTopology;

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Delay before retrying a read that returned no bytes.
pub const EMPTY_READ_BACKOFF_MS: u64 = 2;

/// An external process (or set of processes) that ingests RTMP and emits
/// raw video and audio on separate channels.
pub trait MediaSource: Send {
    /// Process layout of this source.
    fn topology(&self) -> SourceTopology;

    /// Spawn the process(es) and hand out their output channels.
    fn start(&mut self) -> SourceResult<SourceOutputs>;

    /// Reap instances that exited on their own since the last call.
    ///
    /// Channels fed by an exited instance are flagged closed.
    fn poll_exits(&mut self) -> SourceResult<Vec<ExitNotice>>;

    /// Kill and reap every instance. Calling it again is a no-op.
    fn terminate(&mut self) -> SourceResult<()>;

    /// Check if any instance is still running.
    fn is_running(&self) -> bool;
}
