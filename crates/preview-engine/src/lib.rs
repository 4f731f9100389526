//! Pipeline supervisor for the RTMP preview.
//!
//! This crate launches the media source, starts the reader and audio
//! threads, runs the resynchronized render loop and tears everything down
//! in a fixed order when the pipeline stops.

mod error;
mod metrics;
mod state;
mod supervisor;

pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use state::{InitializedResources, ResourceManager};
pub use supervisor::{StopHandle, Supervisor};

use crossbeam_channel::{Receiver, Sender};

use preview_ipc::{PipelineCommand, PipelineConfig, PipelineEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create a supervisor with IPC channels.
pub fn create_supervisor(
    config: PipelineConfig,
    command_rx: Receiver<PipelineCommand>,
    event_tx: Sender<PipelineEvent>,
) -> Supervisor {
    Supervisor::new(config, command_rx, event_tx)
}
