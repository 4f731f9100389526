//! Fixed-depth video resynchronizer.

use std::collections::VecDeque;

use tracing::debug;

use crate::frame::VideoFrame;

/// Frames reserved up front; deeper buffers grow as frames arrive.
const PREALLOCATED_FRAMES: usize = 64;

/// Delays video by a fixed number of frames so it lines up with audio.
///
/// Nothing is released until `depth` frames are held; after that every
/// admitted frame releases the oldest one. The delay is counted in frames,
/// never in wall-clock time, so it drifts if the real audio latency differs
/// from the configured delay. A depth of zero passes frames straight
/// through.
#[derive(Debug)]
pub struct Resynchronizer {
    buffer: VecDeque<VideoFrame>,
    depth: usize,
    released: u64,
}

impl Resynchronizer {
    /// Create a resynchronizer holding `depth` frames.
    pub fn new(depth: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(depth.min(PREALLOCATED_FRAMES) + 1),
            depth,
            released: 0,
        }
    }

    /// Admit a frame, returning the frame due for presentation, if any.
    pub fn admit(&mut self, frame: VideoFrame) -> Option<VideoFrame> {
        self.buffer.push_back(frame);
        if self.buffer.len() < self.depth {
            return None;
        }

        let released = self.buffer.pop_front();
        if self.released == 0 {
            debug!(depth = self.depth, "Resynchronizer primed");
        }
        self.released += 1;
        released
    }

    /// Frames currently held.
    pub fn held(&self) -> usize {
        self.buffer.len()
    }

    /// Target depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Frames released so far.
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Discard every held frame, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let held = self.buffer.len();
        self.buffer.clear();
        held
    }
}
