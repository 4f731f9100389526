//! Commands sent to the pipeline supervisor.

use serde::{Deserialize, Serialize};

/// Commands the application can send to a running supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineCommand {
    /// Stop the pipeline and tear everything down.
    Stop,

    /// Request the current supervisor state.
    GetState,

    /// Request a metrics snapshot outside the regular cadence.
    GetMetrics,
}
