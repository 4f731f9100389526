//! Output channels handed from a media source to its readers.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// End-of-stream signal for one output channel.
///
/// Raised by the media source when the process feeding the channel has
/// exited or been terminated. A reader that sees zero bytes keeps retrying
/// until this flag is up.
#[derive(Debug, Clone, Default)]
pub struct ClosedFlag(Arc<AtomicBool>);

impl ClosedFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check if the flag is up.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One raw output of a media source.
pub struct SourceChannel {
    /// Byte stream (a pipe in production).
    pub reader: Box<dyn Read + Send>,

    /// Raised once no more bytes will ever arrive.
    pub closed: ClosedFlag,
}

impl SourceChannel {
    /// Wrap a reader with a fresh closed flag.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            closed: ClosedFlag::new(),
        }
    }

    /// Wrap a reader with an existing closed flag.
    pub fn with_flag(reader: impl Read + Send + 'static, closed: ClosedFlag) -> Self {
        Self {
            reader: Box::new(reader),
            closed,
        }
    }
}

impl std::fmt::Debug for SourceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceChannel")
            .field("closed", &self.closed.is_set())
            .finish_non_exhaustive()
    }
}

/// A media tool instance that exited without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    /// Instance name ("video", "audio", "ingest").
    pub instance: String,

    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_flag_is_shared_between_clones() {
        let flag = ClosedFlag::new();
        let channel = SourceChannel::with_flag(std::io::empty(), flag.clone());

        assert!(!channel.closed.is_set());
        flag.mark();
        assert!(channel.closed.is_set());
    }
}
