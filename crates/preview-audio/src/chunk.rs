//! PCM chunk and format types.

use bytes::Bytes;

use preview_ipc::{AudioSettings, BYTES_PER_SAMPLE};

/// Interleaved signed 16-bit little-endian PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,

    /// Bytes per sample.
    pub sample_width: u16,
}

impl PcmFormat {
    /// Bytes per sample frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }
}

impl From<&AudioSettings> for PcmFormat {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            sample_width: BYTES_PER_SAMPLE as u16,
        }
    }
}

/// A fixed-size block of PCM read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Interleaved s16le samples.
    pub data: Bytes,

    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
}

impl AudioChunk {
    /// Create a new chunk.
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// Number of sample frames for the given channel count.
    pub fn sample_frames(&self, channels: u16) -> usize {
        self.data.len() / (channels as usize * BYTES_PER_SAMPLE)
    }

    /// Iterate over the interleaved samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Validate that the chunk holds whole sample frames.
    pub fn is_valid(&self, format: &PcmFormat) -> bool {
        self.data.len() % format.frame_bytes() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_decode_little_endian() {
        let chunk = AudioChunk::new(Bytes::from_static(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0xff, 0x7f]), 1);

        assert_eq!(chunk.samples().collect::<Vec<_>>(), vec![1, -1, i16::MIN, i16::MAX]);
        assert_eq!(chunk.sample_frames(2), 2);
    }

    #[test]
    fn test_validity_needs_whole_frames() {
        let format = PcmFormat::from(&AudioSettings::default());
        assert_eq!(format.frame_bytes(), 4);

        assert!(AudioChunk::new(Bytes::from(vec![0u8; 4096]), 1).is_valid(&format));
        assert!(!AudioChunk::new(Bytes::from(vec![0u8; 6]), 2).is_valid(&format));
    }
}
