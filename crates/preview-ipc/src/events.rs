//! Events sent from the pipeline supervisor.

use serde::{Deserialize, Serialize};

use crate::state::{PipelineState, StopReason};
use crate::types::{PipelineMetrics, WarningType};

/// Events that the supervisor emits while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Supervisor state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<PipelineState>,

        /// Current state.
        current: Box<PipelineState>,
    },

    /// Updated pipeline metrics.
    Metrics(PipelineMetrics),

    /// Something is degrading the preview.
    Warning(WarningType),

    /// A media tool process exited on its own.
    SourceExited {
        /// Which instance exited.
        instance: String,

        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },

    /// The pipeline has fully stopped.
    Stopped(StopReason),
}
