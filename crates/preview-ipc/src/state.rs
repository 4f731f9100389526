//! Supervisor state machine types.

use serde::{Deserialize, Serialize};

/// The current state of the pipeline supervisor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing is running.
    #[default]
    Idle,

    /// The pipeline is starting up.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Every task is running; waiting for or receiving a stream.
    Live,

    /// The pipeline is tearing down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,

        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// Startup failed.
    Error {
        /// Error message.
        message: String,
    },
}

impl PipelineState {
    /// Returns true if the pipeline is idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the pipeline is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Returns true if startup failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Live => "Live",
            Self::Stopping { .. } => "Stopping",
            Self::Error { .. } => "Error",
        }
    }
}

/// Startup phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Spawning the media tool process(es).
    LaunchSource,

    /// Starting the frame and sample readers.
    StartReaders,

    /// Starting the audio sink driver.
    StartAudio,

    /// Entering the render loop.
    StartRender,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::LaunchSource => Some(Self::StartReaders),
            Self::StartReaders => Some(Self::StartAudio),
            Self::StartAudio => Some(Self::StartRender),
            Self::StartRender => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::LaunchSource => None,
            Self::StartReaders => Some(Self::LaunchSource),
            Self::StartAudio => Some(Self::StartReaders),
            Self::StartRender => Some(Self::StartAudio),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::LaunchSource => "Launching media source",
            Self::StartReaders => "Starting readers",
            Self::StartAudio => "Opening audio output",
            Self::StartRender => "Starting render loop",
        }
    }
}

/// Shutdown phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Leaving the render loop.
    StopRender,

    /// Killing the media tool process(es).
    TerminateSource,

    /// Joining the reader threads.
    JoinReaders,

    /// Joining the audio sink driver and closing the device.
    CloseAudio,
}

impl ShutdownPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopRender => Some(Self::TerminateSource),
            Self::TerminateSource => Some(Self::JoinReaders),
            Self::JoinReaders => Some(Self::CloseAudio),
            Self::CloseAudio => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopRender => "Stopping render loop",
            Self::TerminateSource => "Terminating media source",
            Self::JoinReaders => "Stopping readers",
            Self::CloseAudio => "Closing audio output",
        }
    }
}

/// Reason the pipeline stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Exit key, window close, Ctrl-C or a stop command.
    UserRequested,

    /// The media source closed its video output.
    SourceClosed,

    /// The media source could not be supervised.
    SourceFailed { message: String },

    /// The renderer failed to present a frame.
    RenderFailed { message: String },

    /// The audio sink failed.
    AudioFailed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stopped by user".to_string(),
            Self::SourceClosed => "Media source closed the stream".to_string(),
            Self::SourceFailed { message } => format!("Media source error: {message}"),
            Self::RenderFailed { message } => format!("Render error: {message}"),
            Self::AudioFailed { message } => format!("Audio error: {message}"),
        }
    }

    /// Returns true for stops that were not asked for.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SourceFailed { .. } | Self::RenderFailed { .. } | Self::AudioFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_walk_both_ways() {
        let mut phase = StartupPhase::LaunchSource;
        let mut forward = vec![phase];
        while let Some(next) = phase.next() {
            forward.push(next);
            phase = next;
        }
        assert_eq!(forward.len(), 4);
        assert_eq!(phase, StartupPhase::StartRender);

        let mut backward = vec![phase];
        while let Some(prev) = phase.previous() {
            backward.push(prev);
            phase = prev;
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_stop_reason_failure_classification() {
        assert!(!StopReason::UserRequested.is_failure());
        assert!(!StopReason::SourceClosed.is_failure());
        assert!(StopReason::RenderFailed {
            message: "surface lost".into()
        }
        .is_failure());
    }
}
