//! Raw video frame type.

use bytes::Bytes;

use preview_ipc::BYTES_PER_PIXEL;

/// One decoded video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Interleaved BGR pixel data, row-major, no padding.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new frame.
    pub fn new(data: Bytes, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// Expected BGR buffer size for the given dimensions.
    pub fn bgr_buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Validate that the frame data matches its dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::bgr_buffer_size(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_follows_dimensions() {
        let frame = VideoFrame::new(Bytes::from(vec![0u8; 4 * 2 * 3]), 4, 2, 1);
        assert!(frame.is_valid());
        assert_eq!(frame.stride(), 12);

        let short = VideoFrame::new(Bytes::from(vec![0u8; 23]), 4, 2, 2);
        assert!(!short.is_valid());
    }
}
