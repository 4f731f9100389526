//! Common types used across the pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::ConfigResult;

/// Bytes per PCM sample (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Bytes per video pixel (interleaved BGR).
pub const BYTES_PER_PIXEL: usize = 3;

/// Most frames the resynchronizer may hold back.
pub const MAX_RESYNC_DEPTH: usize = 3600;

/// How the external media tool is laid out across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTopology {
    /// One process; video on stdout, audio on an auxiliary pipe.
    SingleChannel,

    /// Two processes; the video instance relays audio to a second listener.
    DualInstance,
}

impl SourceTopology {
    /// Returns the display name for this topology.
    pub fn name(self) -> &'static str {
        match self {
            Self::SingleChannel => "single-channel",
            Self::DualInstance => "dual-instance",
        }
    }
}

impl Default for SourceTopology {
    fn default() -> Self {
        if cfg!(unix) {
            Self::SingleChannel
        } else {
            Self::DualInstance
        }
    }
}

/// Where the media tool listens for publishers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Address the listener binds to.
    pub bind_address: String,

    /// Public RTMP port (default: 1935).
    pub port: u16,

    /// RTMP application path; publishers append any stream key.
    pub app_name: String,

    /// Loopback port used to relay audio between instances (dual-instance only).
    pub relay_port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 1935,
            app_name: "live".to_string(),
            relay_port: 1936,
        }
    }
}

impl IngestConfig {
    /// URL the media tool listens on.
    pub fn listen_url(&self) -> ConfigResult<Url> {
        build_rtmp_url(&self.bind_address, self.port, &self.app_name)
    }

    /// URL advertised to publishers; they append `/<any-key>`.
    pub fn publish_url(&self, host: &str) -> ConfigResult<Url> {
        build_rtmp_url(host, self.port, &self.app_name)
    }

    /// Loopback URL shared by the two instances of a dual-instance source.
    pub fn relay_url(&self) -> ConfigResult<Url> {
        let path = format!("{}/relay", self.app_name.trim_matches('/'));
        build_rtmp_url("127.0.0.1", self.relay_port, &path)
    }
}

fn build_rtmp_url(host: &str, port: u16, app: &str) -> ConfigResult<Url> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    let app = app.trim_matches('/');
    Url::parse(&format!("rtmp://{host}:{port}/{app}"))
        .map_err(|e| ConfigError::InvalidUrl(format!("{host}:{port}/{app}: {e}")))
}

/// Raw video output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Capacity of the video queue, in frames.
    pub queue_capacity: usize,

    /// Title of the preview window.
    pub window_title: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            queue_capacity: 10,
            window_title: "RTMP Preview".to_string(),
        }
    }
}

impl VideoSettings {
    /// Size in bytes of one raw BGR frame.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// Raw PCM output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Whether the audio path runs at all.
    pub enabled: bool,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,

    /// Samples per channel in one chunk.
    pub chunk_samples: usize,

    /// Capacity of the audio queue, in chunks.
    pub queue_capacity: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 44_100,
            channels: 2,
            chunk_samples: 1024,
            queue_capacity: 20,
        }
    }
}

impl AudioSettings {
    /// Size in bytes of one PCM chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_samples * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes per interleaved sample frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// Complete startup configuration for the preview pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ingest listener settings.
    pub ingest: IngestConfig,

    /// Video output settings.
    pub video: VideoSettings,

    /// Audio output settings.
    pub audio: AudioSettings,

    /// Process layout of the media tool.
    pub topology: SourceTopology,

    /// Path or name of the ffmpeg executable.
    pub ffmpeg_path: String,

    /// Video presentation delay used to line picture up with audio.
    pub resync_delay_secs: f64,

    /// Wait granularity for queue consumers and cancellation checks.
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            topology: SourceTopology::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            resync_delay_secs: 0.1,
            poll_interval_ms: 10,
        }
    }
}

impl PipelineConfig {
    /// Configuration with the stock defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames the resynchronizer holds back: floor(delay × fps).
    pub fn resync_depth(&self) -> usize {
        (self.resync_delay_secs * self.video.fps as f64).floor() as usize
    }

    /// Queue wait timeout and cancellation granularity.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check every field for values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("width", self.video.width as u64),
            ("height", self.video.height as u64),
            ("fps", self.video.fps as u64),
            ("video queue capacity", self.video.queue_capacity as u64),
            ("poll interval", self.poll_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        (self.video.width as usize)
            .checked_mul(self.video.height as usize)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
            .ok_or(ConfigError::FrameTooLarge {
                width: self.video.width,
                height: self.video.height,
            })?;

        if self.audio.enabled {
            let positive = [
                ("sample rate", self.audio.sample_rate as u64),
                ("channels", self.audio.channels as u64),
                ("chunk samples", self.audio.chunk_samples as u64),
                ("audio queue capacity", self.audio.queue_capacity as u64),
            ];
            for (field, value) in positive {
                if value == 0 {
                    return Err(ConfigError::Zero { field });
                }
            }

            if self.topology == SourceTopology::DualInstance
                && self.ingest.relay_port == self.ingest.port
            {
                return Err(ConfigError::RelayPortConflict(self.ingest.relay_port));
            }
        }

        if !self.resync_delay_secs.is_finite() || self.resync_delay_secs < 0.0 {
            return Err(ConfigError::InvalidDelay(self.resync_delay_secs));
        }
        let depth = (self.resync_delay_secs * self.video.fps as f64).floor();
        if depth > MAX_RESYNC_DEPTH as f64 {
            return Err(ConfigError::DelayTooLong {
                delay: self.resync_delay_secs,
                max_frames: MAX_RESYNC_DEPTH,
            });
        }

        self.ingest.listen_url()?;
        Ok(())
    }
}

/// Real-time pipeline metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Frames presented per second since the previous report.
    pub fps: f32,

    /// Configured frame rate.
    pub target_fps: f32,

    /// Frames read from the source.
    pub frames_read: u64,

    /// Frames discarded because the video queue was full.
    pub frames_dropped: u64,

    /// Frames handed to the renderer.
    pub frames_rendered: u64,

    /// Frames currently waiting in the video queue.
    pub video_queue_len: usize,

    /// Chunks read from the source.
    pub chunks_read: u64,

    /// Chunks discarded because the audio queue was full.
    pub chunks_dropped: u64,

    /// Chunks handed to the audio sink.
    pub chunks_played: u64,

    /// Chunks currently waiting in the audio queue.
    pub audio_queue_len: usize,

    /// Frames currently held by the resynchronizer.
    pub resync_held: usize,

    /// Target resynchronizer depth.
    pub resync_target: usize,

    /// Seconds since the pipeline went live.
    pub uptime_seconds: u64,
}

/// Types of pipeline warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// Frames were dropped at the video queue since the last report.
    VideoQueueDrops { count: u64 },

    /// Chunks were dropped at the audio queue since the last report.
    AudioQueueDrops { count: u64 },

    /// Frames were flowing but none arrived for a while.
    SourceStalled { seconds: u64 },
}
