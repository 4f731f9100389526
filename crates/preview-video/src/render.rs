//! Renderer interface.

use std::time::Instant;

use tracing::{debug, info};

use crate::frame::VideoFrame;
use crate::VideoResult;

/// Presents frames to the user.
///
/// Called only from the render loop on the thread that created it.
pub trait Renderer {
    /// Show `frame` in a surface titled `title`.
    fn present(&mut self, frame: &VideoFrame, title: &str) -> VideoResult<()>;

    /// Non-blocking check for an exit request (Escape or window close).
    fn exit_requested(&mut self) -> bool;
}

/// Renderer with no display; counts frames and logs progress.
#[derive(Debug)]
pub struct HeadlessRenderer {
    presented: u64,
    last_report: Instant,
}

impl HeadlessRenderer {
    /// Create a headless renderer.
    pub fn new() -> Self {
        Self {
            presented: 0,
            last_report: Instant::now(),
        }
    }

    /// Frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HeadlessRenderer {
    fn present(&mut self, frame: &VideoFrame, title: &str) -> VideoResult<()> {
        if self.presented == 0 {
            info!(
                title,
                width = frame.width,
                height = frame.height,
                "First frame received"
            );
        }
        self.presented += 1;

        if self.last_report.elapsed().as_secs() >= 5 {
            debug!(presented = self.presented, sequence = frame.sequence, "Headless render progress");
            self.last_report = Instant::now();
        }
        Ok(())
    }

    fn exit_requested(&mut self) -> bool {
        false
    }
}
