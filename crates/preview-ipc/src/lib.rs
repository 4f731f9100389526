//! Typed configuration, state and messages for the RTMP preview pipeline.
//!
//! This crate defines everything the pipeline tasks exchange: the startup
//! configuration, the supervisor state machine, the command/event messages
//! and the bounded drop-on-full queues that connect each reader to its
//! consumer.

mod commands;
mod error;
mod events;
mod queue;
mod state;
mod types;

pub use commands::PipelineCommand;
pub use error::ConfigError;
pub use events::PipelineEvent;
pub use queue::{
    bounded_queue, Dequeue, Enqueue, QueueConsumer, QueueMonitor, QueueProducer, QueueSnapshot,
};
pub use state::{PipelineState, ShutdownPhase, StartupPhase, StopReason};
pub use types::{
    AudioSettings, IngestConfig, PipelineConfig, PipelineMetrics, SourceTopology, VideoSettings,
    WarningType, BYTES_PER_PIXEL, BYTES_PER_SAMPLE, MAX_RESYNC_DEPTH,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (application → supervisor).
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Channel capacity for events (supervisor → application).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<PipelineCommand>, Receiver<PipelineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<PipelineEvent>, Receiver<PipelineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
