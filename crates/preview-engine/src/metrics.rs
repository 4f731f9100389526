//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use preview_ipc::{PipelineMetrics, QueueMonitor, QueueSnapshot, WarningType};

/// No frames for this long after frames were flowing counts as a stall.
const STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Collects pipeline metrics from queue counters and the render loop.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    target_fps: f32,
    video: RwLock<Option<QueueMonitor>>,
    audio: RwLock<Option<QueueMonitor>>,
    chunks_played: RwLock<Option<Arc<AtomicU64>>>,
    frames_rendered: AtomicU64,
    resync_held: AtomicUsize,
    resync_target: usize,
    last_report_time: RwLock<Instant>,
    last_rendered: AtomicU64,
    reported_video_drops: AtomicU64,
    reported_audio_drops: AtomicU64,
    last_frames_read: AtomicU64,
    last_frame_seen: RwLock<Option<Instant>>,
    stall_reported: RwLock<bool>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(target_fps: f32, resync_target: usize) -> Self {
        Self {
            start_time: RwLock::new(None),
            target_fps,
            video: RwLock::new(None),
            audio: RwLock::new(None),
            chunks_played: RwLock::new(None),
            frames_rendered: AtomicU64::new(0),
            resync_held: AtomicUsize::new(0),
            resync_target,
            last_report_time: RwLock::new(Instant::now()),
            last_rendered: AtomicU64::new(0),
            reported_video_drops: AtomicU64::new(0),
            reported_audio_drops: AtomicU64::new(0),
            last_frames_read: AtomicU64::new(0),
            last_frame_seen: RwLock::new(None),
            stall_reported: RwLock::new(false),
        }
    }

    /// Attach the video queue counters.
    pub fn attach_video(&self, monitor: QueueMonitor) {
        *self.video.write() = Some(monitor);
    }

    /// Attach the audio queue counters.
    pub fn attach_audio(&self, monitor: QueueMonitor) {
        *self.audio.write() = Some(monitor);
    }

    /// Attach the sink driver's played counter.
    pub fn attach_played(&self, played: Arc<AtomicU64>) {
        *self.chunks_played.write() = Some(played);
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a frame handed to the renderer.
    pub fn record_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the number of frames held by the resynchronizer.
    pub fn update_resync_held(&self, held: usize) {
        self.resync_held.store(held, Ordering::Relaxed);
    }

    /// Frames handed to the renderer so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    fn video_snapshot(&self) -> QueueSnapshot {
        self.video
            .read()
            .as_ref()
            .map(QueueMonitor::snapshot)
            .unwrap_or_default()
    }

    fn audio_snapshot(&self) -> QueueSnapshot {
        self.audio
            .read()
            .as_ref()
            .map(QueueMonitor::snapshot)
            .unwrap_or_default()
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> PipelineMetrics {
        let now = Instant::now();

        let last_time = *self.last_report_time.read();
        let elapsed = now.duration_since(last_time).as_secs_f32();
        let rendered = self.frames_rendered.load(Ordering::Relaxed);
        let last_rendered = self.last_rendered.load(Ordering::Relaxed);
        let fps = if elapsed > 0.0 {
            rendered.saturating_sub(last_rendered) as f32 / elapsed
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        let video = self.video_snapshot();
        let audio = self.audio_snapshot();
        let chunks_played = self
            .chunks_played
            .read()
            .as_ref()
            .map(|played| played.load(Ordering::Relaxed))
            .unwrap_or(0);

        PipelineMetrics {
            fps,
            target_fps: self.target_fps,
            frames_read: video.enqueued + video.dropped,
            frames_dropped: video.dropped,
            frames_rendered: rendered,
            video_queue_len: video.len(),
            chunks_read: audio.enqueued + audio.dropped,
            chunks_dropped: audio.dropped,
            chunks_played,
            audio_queue_len: audio.len(),
            resync_held: self.resync_held.load(Ordering::Relaxed),
            resync_target: self.resync_target,
            uptime_seconds,
        }
    }

    /// Check for warnings since the previous report.
    pub fn check_warnings(&self) -> Vec<WarningType> {
        let mut warnings = Vec::new();
        let now = Instant::now();

        let video = self.video_snapshot();
        let new_video_drops =
            video.dropped.saturating_sub(self.reported_video_drops.load(Ordering::Relaxed));
        if new_video_drops > 0 {
            warnings.push(WarningType::VideoQueueDrops {
                count: new_video_drops,
            });
        }

        let audio = self.audio_snapshot();
        let new_audio_drops =
            audio.dropped.saturating_sub(self.reported_audio_drops.load(Ordering::Relaxed));
        if new_audio_drops > 0 {
            warnings.push(WarningType::AudioQueueDrops {
                count: new_audio_drops,
            });
        }

        let frames_read = video.enqueued + video.dropped;
        if frames_read != self.last_frames_read.load(Ordering::Relaxed) {
            self.last_frames_read.store(frames_read, Ordering::Relaxed);
            *self.last_frame_seen.write() = Some(now);
            *self.stall_reported.write() = false;
        } else if let Some(seen) = *self.last_frame_seen.read() {
            let idle = now.duration_since(seen);
            if idle >= STALL_THRESHOLD && !*self.stall_reported.read() {
                warnings.push(WarningType::SourceStalled {
                    seconds: idle.as_secs(),
                });
                *self.stall_reported.write() = true;
            }
        }

        if !warnings.is_empty() {
            debug!(?warnings, "Pipeline warnings");
        }
        warnings
    }

    /// Update last report time and drop baselines.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_rendered
            .store(self.frames_rendered.load(Ordering::Relaxed), Ordering::Relaxed);
        self.reported_video_drops
            .store(self.video_snapshot().dropped, Ordering::Relaxed);
        self.reported_audio_drops
            .store(self.audio_snapshot().dropped, Ordering::Relaxed);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(60.0, 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_ipc::bounded_queue;

    #[test]
    fn test_snapshot_reads_queue_counters() {
        let metrics = MetricsCollector::new(60.0, 6);
        let (producer, consumer) = bounded_queue(2);
        metrics.attach_video(producer.monitor());

        for i in 0..5u32 {
            producer.push(i);
        }
        let _ = consumer.try_pop();
        metrics.record_rendered();
        metrics.update_resync_held(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_read, 5);
        assert_eq!(snapshot.frames_dropped, 3);
        assert_eq!(snapshot.video_queue_len, 1);
        assert_eq!(snapshot.frames_rendered, 1);
        assert_eq!(snapshot.resync_held, 4);
        assert_eq!(snapshot.resync_target, 6);
        assert_eq!(snapshot.chunks_read, 0);
    }

    #[test]
    fn test_drop_warnings_only_report_new_drops() {
        let metrics = MetricsCollector::default();
        let (producer, _consumer) = bounded_queue(1);
        metrics.attach_audio(producer.monitor());

        producer.push(1u8);
        producer.push(2u8);
        producer.push(3u8);
        assert_eq!(
            metrics.check_warnings(),
            vec![WarningType::AudioQueueDrops { count: 2 }]
        );

        metrics.mark_reported();
        assert!(metrics.check_warnings().is_empty());

        producer.push(4u8);
        assert_eq!(
            metrics.check_warnings(),
            vec![WarningType::AudioQueueDrops { count: 1 }]
        );
    }

    #[test]
    fn test_played_counter_is_shared() {
        let metrics = MetricsCollector::default();
        let played = Arc::new(AtomicU64::new(0));
        metrics.attach_played(Arc::clone(&played));

        played.fetch_add(7, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().chunks_played, 7);
    }
}
