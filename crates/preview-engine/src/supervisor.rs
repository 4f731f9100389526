//! Pipeline supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use preview_audio::SinkFactory;
use preview_ipc::{
    Dequeue, PipelineCommand, PipelineConfig, PipelineEvent, PipelineState, ShutdownPhase,
    StartupPhase, StopReason,
};
use preview_source::MediaSource;
use preview_video::{Renderer, Resynchronizer};

use crate::metrics::MetricsCollector;
use crate::state::ResourceManager;
use crate::{EngineError, EngineResult};

const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Requests a running supervisor to stop.
///
/// Cloneable and usable from any thread, including a signal handler.
/// Requesting a stop more than once, or after the pipeline has stopped,
/// does nothing.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the supervisor to stop.
    pub fn request_stop(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("Stop requested");
        }
    }

    /// Check if a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Owns the pipeline from launch to teardown.
pub struct Supervisor {
    config: PipelineConfig,
    command_rx: Receiver<PipelineCommand>,
    event_tx: Sender<PipelineEvent>,
    state: Arc<RwLock<PipelineState>>,
    metrics: Arc<MetricsCollector>,
    stop_requested: Arc<AtomicBool>,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new(
        config: PipelineConfig,
        command_rx: Receiver<PipelineCommand>,
        event_tx: Sender<PipelineEvent>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new(
            config.video.fps as f32,
            config.resync_depth(),
        ));

        Self {
            config,
            command_rx,
            event_tx,
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            metrics,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting a stop from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_requested),
        }
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state.read().clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline on the calling thread until it stops (blocking).
    ///
    /// Returns why the pipeline stopped. Every process is reaped and every
    /// thread joined before this returns, on success, on error and when
    /// unwinding.
    #[instrument(name = "supervisor_run", skip_all, fields(topology = source.topology().name()))]
    pub fn run(
        &mut self,
        source: Box<dyn MediaSource>,
        renderer: &mut dyn Renderer,
        sink_factory: SinkFactory,
    ) -> EngineResult<StopReason> {
        if let Err(e) = self.config.validate() {
            return Err(self.fail(EngineError::Config(e)));
        }

        info!("Pipeline starting");
        let mut resources = ResourceManager::new(source, sink_factory, Arc::clone(&self.metrics));

        let started = resources.initialize(&self.config, StartupPhase::StartRender, |phase| {
            self.transition_to(PipelineState::Starting { phase })
        });
        if let Err(e) = started {
            error!("Pipeline start failed: {}", e);
            resources.rollback();
            return Err(self.fail(e));
        }

        self.transition_to(PipelineState::Live);
        info!("Pipeline live");

        let reason = self.render_loop(&mut resources, renderer);

        info!(reason = %reason.message(), "Pipeline stopping");
        let mut phase = ShutdownPhase::StopRender;
        loop {
            self.transition_to(PipelineState::Stopping {
                reason: reason.clone(),
                phase,
            });
            resources.shutdown_phase(phase);
            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }
        drop(resources);

        self.transition_to(PipelineState::Idle);
        self.send_event(PipelineEvent::Stopped(reason.clone()));
        info!("Pipeline stopped");

        Ok(reason)
    }

    fn render_loop(
        &self,
        resources: &mut ResourceManager,
        renderer: &mut dyn Renderer,
    ) -> StopReason {
        let poll = self.config.poll_interval();
        let title = self.config.video.window_title.as_str();
        let mut resync = Resynchronizer::new(self.config.resync_depth());
        let mut last_metrics = Instant::now();

        info!(depth = resync.depth(), "Render loop started");

        let reason = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break StopReason::UserRequested;
            }
            if renderer.exit_requested() {
                info!("Exit requested from the window");
                break StopReason::UserRequested;
            }
            if let Some(reason) = self.drain_commands() {
                break reason;
            }
            if let Some(reason) = self.check_tasks(resources) {
                break reason;
            }

            let Some(video_rx) = resources.resources_mut().video_rx.as_ref() else {
                break StopReason::SourceClosed;
            };
            match video_rx.pop_timeout(poll) {
                Dequeue::Item(frame) => {
                    if !frame.is_valid() {
                        warn!(sequence = frame.sequence, len = frame.data.len(), "Skipping malformed frame");
                        continue;
                    }
                    if let Some(due) = resync.admit(frame) {
                        if let Err(e) = renderer.present(&due, title) {
                            error!("Render failed: {}", e);
                            break StopReason::RenderFailed {
                                message: e.to_string(),
                            };
                        }
                        self.metrics.record_rendered();
                    }
                    self.metrics.update_resync_held(resync.held());
                }
                Dequeue::Empty => {}
                Dequeue::Closed => {
                    info!("Video stream ended");
                    break StopReason::SourceClosed;
                }
            }

            if last_metrics.elapsed() >= METRICS_INTERVAL {
                self.emit_metrics();
                last_metrics = Instant::now();
            }
        };

        let discarded = resync.discard();
        if discarded > 0 {
            debug!(discarded, "Discarded frames held for resync");
        }
        self.metrics.update_resync_held(0);
        reason
    }

    /// Handle pending commands. Returns a stop reason if one asked to stop.
    fn drain_commands(&self) -> Option<StopReason> {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => {
                    debug!(?command, "Handling command");
                    match command {
                        PipelineCommand::Stop => return Some(StopReason::UserRequested),
                        PipelineCommand::GetState => self.send_state(),
                        PipelineCommand::GetMetrics => self.emit_metrics(),
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Reap exited processes and check the audio driver.
    fn check_tasks(&self, resources: &mut ResourceManager) -> Option<StopReason> {
        let resources = resources.resources_mut();

        if let Some(source) = resources.source.as_mut() {
            match source.poll_exits() {
                Ok(exits) => {
                    for exit in exits {
                        warn!(instance = %exit.instance, code = ?exit.code, "Media tool exited");
                        self.send_event(PipelineEvent::SourceExited {
                            instance: exit.instance,
                            code: exit.code,
                        });
                    }
                }
                Err(e) => {
                    error!("Failed to poll media source: {}", e);
                    return Some(StopReason::SourceFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if resources
            .sink_driver
            .as_ref()
            .is_some_and(|driver| driver.is_finished())
        {
            if let Some(mut driver) = resources.sink_driver.take() {
                match driver.join() {
                    Ok(played) => debug!(played, "Audio path finished"),
                    Err(e) => {
                        self.send_event(PipelineEvent::Error {
                            message: e.to_string(),
                        });
                        return Some(StopReason::AudioFailed {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        None
    }

    fn fail(&self, err: EngineError) -> EngineError {
        let message = err.to_string();
        self.transition_to(PipelineState::Error {
            message: message.clone(),
        });
        self.send_event(PipelineEvent::Error { message });
        err
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(PipelineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn emit_metrics(&self) {
        let metrics = self.metrics.snapshot();
        self.send_event(PipelineEvent::Metrics(metrics));

        for warning in self.metrics.check_warnings() {
            self.send_event(PipelineEvent::Warning(warning));
        }

        self.metrics.mark_reported();
    }

    fn transition_to(&self, new_state: PipelineState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(PipelineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: PipelineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use parking_lot::Mutex;

    use preview_audio::{AudioChunk, AudioError, AudioResult, AudioSink, PcmFormat};
    use preview_ipc::{command_channel, event_channel, SourceTopology};
    use preview_source::{ClosedFlag, ExitNotice, SourceChannel, SourceError, SourceOutputs};
    use preview_video::{VideoError, VideoFrame, VideoResult};

    struct FakeSource {
        video: Option<Box<dyn Read + Send>>,
        audio: Option<Box<dyn Read + Send>>,
        close_video: bool,
        close_audio: bool,
        fail_start: bool,
        flags: Vec<ClosedFlag>,
        running: bool,
        terminations: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn new(video: impl Read + Send + 'static) -> Self {
            Self {
                video: Some(Box::new(video)),
                audio: None,
                close_video: false,
                close_audio: false,
                fail_start: false,
                flags: Vec::new(),
                running: false,
                terminations: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_audio(mut self, audio: impl Read + Send + 'static) -> Self {
            self.audio = Some(Box::new(audio));
            self
        }
    }

    impl MediaSource for FakeSource {
        fn topology(&self) -> SourceTopology {
            SourceTopology::SingleChannel
        }

        fn start(&mut self) -> preview_source::SourceResult<SourceOutputs> {
            if self.fail_start {
                return Err(SourceError::ToolMissing("ffmpeg".to_string()));
            }

            let video_flag = ClosedFlag::new();
            if self.close_video {
                video_flag.mark();
            }
            self.flags.push(video_flag.clone());
            let video = SourceChannel::with_flag(self.video.take().unwrap(), video_flag);

            let audio = self.audio.take().map(|reader| {
                let flag = ClosedFlag::new();
                if self.close_audio {
                    flag.mark();
                }
                self.flags.push(flag.clone());
                SourceChannel::with_flag(reader, flag)
            });

            self.running = true;
            Ok(SourceOutputs { video, audio })
        }

        fn poll_exits(&mut self) -> preview_source::SourceResult<Vec<ExitNotice>> {
            Ok(Vec::new())
        }

        fn terminate(&mut self) -> preview_source::SourceResult<()> {
            for flag in &self.flags {
                flag.mark();
            }
            if self.running {
                self.terminations.fetch_add(1, Ordering::SeqCst);
            }
            self.running = false;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    struct RecordingRenderer {
        presented: Vec<(u64, usize)>,
        exit_after: Option<usize>,
        fail: bool,
        exit_when: Option<Box<dyn Fn() -> bool>>,
        deadline: Instant,
    }

    impl RecordingRenderer {
        fn new() -> Self {
            Self {
                presented: Vec::new(),
                exit_after: None,
                fail: false,
                exit_when: None,
                deadline: Instant::now() + Duration::from_secs(10),
            }
        }
    }

    impl Renderer for RecordingRenderer {
        fn present(&mut self, frame: &VideoFrame, title: &str) -> VideoResult<()> {
            assert_eq!(title, "RTMP Preview");
            if self.fail {
                return Err(VideoError::RenderFailed("surface lost".to_string()));
            }
            self.presented.push((frame.sequence, frame.data.len()));
            Ok(())
        }

        fn exit_requested(&mut self) -> bool {
            if Instant::now() > self.deadline {
                return true;
            }
            if let Some(limit) = self.exit_after {
                if self.presented.len() >= limit {
                    return true;
                }
            }
            self.exit_when.as_ref().is_some_and(|check| check())
        }
    }

    struct RecordingSink {
        played: Arc<Mutex<Vec<u64>>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, chunk: &AudioChunk) -> AudioResult<()> {
            self.played.lock().push(chunk.sequence);
            Ok(())
        }
    }

    fn recording_factory(played: &Arc<Mutex<Vec<u64>>>) -> SinkFactory {
        let played = Arc::clone(played);
        Box::new(move |_: &PcmFormat| -> AudioResult<Box<dyn AudioSink>> {
            Ok(Box::new(RecordingSink { played }))
        })
    }

    fn no_audio() -> SinkFactory {
        recording_factory(&Arc::new(Mutex::new(Vec::new())))
    }

    /// 4x2 frames at 30 fps with a 0.1 s delay: three frames held back.
    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::new();
        config.video.width = 4;
        config.video.height = 2;
        config.video.fps = 30;
        config.resync_delay_secs = 0.1;
        config.poll_interval_ms = 5;
        config.audio.enabled = false;
        config
    }

    fn frames(count: usize, config: &PipelineConfig) -> Vec<u8> {
        vec![0x80; count * config.video.frame_size()]
    }

    #[test]
    fn test_renders_resynced_frames_until_source_closes() {
        let config = test_config();
        assert_eq!(config.resync_depth(), 3);

        let mut source = FakeSource::new(Cursor::new(frames(8, &config)));
        source.close_video = true;
        let terminations = Arc::clone(&source.terminations);

        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        command_tx.send(PipelineCommand::GetState).unwrap();
        command_tx.send(PipelineCommand::GetMetrics).unwrap();

        let mut supervisor = Supervisor::new(config.clone(), command_rx, event_tx);
        let mut renderer = RecordingRenderer::new();

        let reason = supervisor
            .run(Box::new(source), &mut renderer, no_audio())
            .unwrap();

        assert_eq!(reason, StopReason::SourceClosed);
        let sequences: Vec<u64> = renderer.presented.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, (1..=6).collect::<Vec<_>>());
        assert!(renderer
            .presented
            .iter()
            .all(|(_, len)| *len == config.video.frame_size()));
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert!(supervisor.state().is_idle());

        let events: Vec<PipelineEvent> = event_rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Metrics(_))));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::StateChanged { current, .. } if current.is_live()
        )));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Stopped(StopReason::SourceClosed))
        ));
    }

    #[test]
    fn test_window_exit_stops_pipeline() {
        let source = FakeSource::new(std::io::repeat(7));
        let terminations = Arc::clone(&source.terminations);
        let (_command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();

        let mut supervisor = Supervisor::new(test_config(), command_rx, event_tx);
        let mut renderer = RecordingRenderer::new();
        renderer.exit_after = Some(2);

        let reason = supervisor
            .run(Box::new(source), &mut renderer, no_audio())
            .unwrap();

        assert_eq!(reason, StopReason::UserRequested);
        assert_eq!(renderer.presented.len(), 2);
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_handle_stops_and_repeat_stop_is_noop() {
        let source = FakeSource::new(std::io::empty());
        let (command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();

        let mut supervisor = Supervisor::new(test_config(), command_rx, event_tx);
        let handle = supervisor.stop_handle();
        let remote = handle.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request_stop();
        });

        let mut renderer = RecordingRenderer::new();
        let reason = supervisor
            .run(Box::new(source), &mut renderer, no_audio())
            .unwrap();
        stopper.join().unwrap();

        assert_eq!(reason, StopReason::UserRequested);
        assert!(renderer.presented.is_empty());

        handle.request_stop();
        assert!(handle.is_stop_requested());
        command_tx.send(PipelineCommand::Stop).unwrap();
        assert!(supervisor.state().is_idle());
    }

    #[test]
    fn test_stop_command_stops_pipeline() {
        let source = FakeSource::new(std::io::empty());
        let (command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();
        command_tx.send(PipelineCommand::Stop).unwrap();

        let mut supervisor = Supervisor::new(test_config(), command_rx, event_tx);
        let reason = supervisor
            .run(Box::new(source), &mut RecordingRenderer::new(), no_audio())
            .unwrap();

        assert_eq!(reason, StopReason::UserRequested);
    }

    #[test]
    fn test_audio_chunks_reach_sink_in_order() {
        let mut config = test_config();
        config.audio.enabled = true;
        config.audio.chunk_samples = 4;
        config.audio.channels = 2;
        let chunk_size = config.audio.chunk_size();

        let audio: Vec<u8> = (1..=3u8)
            .flat_map(|n| std::iter::repeat(n).take(chunk_size))
            .collect();
        let mut source = FakeSource::new(std::io::empty()).with_audio(Cursor::new(audio));
        source.close_audio = true;

        let played = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&played);
        let mut renderer = RecordingRenderer::new();
        renderer.exit_when = Some(Box::new(move || observed.lock().len() >= 3));

        let (_command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();
        let mut supervisor = Supervisor::new(config, command_rx, event_tx);

        let reason = supervisor
            .run(Box::new(source), &mut renderer, recording_factory(&played))
            .unwrap();

        assert_eq!(reason, StopReason::UserRequested);
        assert_eq!(*played.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_startup_failure_reports_error() {
        let mut source = FakeSource::new(std::io::empty());
        source.fail_start = true;
        let (_command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();

        let mut supervisor = Supervisor::new(test_config(), command_rx, event_tx);
        let result = supervisor.run(Box::new(source), &mut RecordingRenderer::new(), no_audio());

        assert!(matches!(
            result,
            Err(EngineError::Startup {
                phase: StartupPhase::LaunchSource,
                ..
            })
        ));
        assert!(supervisor.state().is_error());
        assert!(event_rx
            .try_iter()
            .any(|e| matches!(e, PipelineEvent::Error { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_launch() {
        let mut config = test_config();
        config.video.fps = 0;
        let source = FakeSource::new(std::io::empty());
        let terminations = Arc::clone(&source.terminations);
        let (_command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();

        let mut supervisor = Supervisor::new(config, command_rx, event_tx);
        let result = supervisor.run(Box::new(source), &mut RecordingRenderer::new(), no_audio());

        assert!(matches!(result, Err(EngineError::Config(_))));
        assert_eq!(terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_render_failure_stops_pipeline() {
        let mut config = test_config();
        config.resync_delay_secs = 0.0;
        let mut source = FakeSource::new(Cursor::new(frames(2, &config)));
        source.close_video = true;
        let (_command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();

        let mut supervisor = Supervisor::new(config, command_rx, event_tx);
        let mut renderer = RecordingRenderer::new();
        renderer.fail = true;

        let reason = supervisor
            .run(Box::new(source), &mut renderer, no_audio())
            .unwrap();

        assert!(matches!(reason, StopReason::RenderFailed { .. }));
        assert!(reason.is_failure());
    }

    #[test]
    fn test_sink_open_failure_stops_with_audio_failed() {
        let mut config = test_config();
        config.audio.enabled = true;
        let source = FakeSource::new(std::io::empty()).with_audio(std::io::empty());
        let factory: SinkFactory =
            Box::new(|_: &PcmFormat| -> AudioResult<Box<dyn AudioSink>> {
                Err(AudioError::NoOutputDevice)
            });
        let (_command_tx, command_rx) = command_channel();
        let (event_tx, _event_rx) = event_channel();

        let mut supervisor = Supervisor::new(config, command_rx, event_tx);
        let reason = supervisor
            .run(Box::new(source), &mut RecordingRenderer::new(), factory)
            .unwrap();

        assert!(matches!(reason, StopReason::AudioFailed { .. }));
    }
}
