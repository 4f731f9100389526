//! Resource management and initialization tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, instrument, warn};

use preview_audio::{spawn_sample_reader, AudioChunk, PcmFormat, SinkDriver, SinkFactory};
use preview_ipc::{
    bounded_queue, PipelineConfig, QueueConsumer, ShutdownPhase, StartupPhase,
};
use preview_source::{MediaSource, ReaderSummary, SourceOutputs};
use preview_video::{spawn_frame_reader, VideoFrame};

use crate::metrics::MetricsCollector;
use crate::{EngineError, EngineResult};

/// Resources that have been initialized during startup.
#[derive(Default)]
pub struct InitializedResources {
    /// The media tool process(es).
    pub source: Option<Box<dyn MediaSource>>,

    /// Channels handed out by the source, until the readers take them.
    pub outputs: Option<SourceOutputs>,

    /// Frame reader thread.
    pub frame_reader: Option<JoinHandle<ReaderSummary>>,

    /// Sample reader thread.
    pub sample_reader: Option<JoinHandle<ReaderSummary>>,

    /// Consuming end of the video queue, used by the render loop.
    pub video_rx: Option<QueueConsumer<VideoFrame>>,

    /// Consuming end of the audio queue, until the sink driver takes it.
    pub audio_rx: Option<QueueConsumer<AudioChunk>>,

    /// Audio sink driver thread.
    pub sink_driver: Option<SinkDriver>,
}

impl InitializedResources {
    /// Create empty resources.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Owns every pipeline resource and tears them down in a fixed order.
///
/// Dropping the manager shuts everything down, so resources are released
/// on every exit path out of the supervisor, unwinding included.
pub struct ResourceManager {
    resources: InitializedResources,
    current_phase: Option<StartupPhase>,
    pending_source: Option<Box<dyn MediaSource>>,
    pending_sink: Option<SinkFactory>,
    task_stop: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
}

impl ResourceManager {
    /// Create a manager for `source`, playing audio through a sink built by
    /// `sink_factory`.
    pub fn new(
        source: Box<dyn MediaSource>,
        sink_factory: SinkFactory,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            resources: InitializedResources::new(),
            current_phase: None,
            pending_source: Some(source),
            pending_sink: Some(sink_factory),
            task_stop: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Initialize resources up to and including the specified phase.
    ///
    /// `on_phase` is called as each phase begins.
    #[instrument(name = "init_resources", skip(self, config, on_phase))]
    pub fn initialize(
        &mut self,
        config: &PipelineConfig,
        target_phase: StartupPhase,
        mut on_phase: impl FnMut(StartupPhase),
    ) -> EngineResult<()> {
        let mut phase = StartupPhase::LaunchSource;

        loop {
            self.current_phase = Some(phase);
            on_phase(phase);
            self.init_phase(config, phase)
                .map_err(|source| EngineError::Startup {
                    phase,
                    source: Box::new(source),
                })?;

            if phase == target_phase {
                break;
            }

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        Ok(())
    }

    fn init_phase(&mut self, config: &PipelineConfig, phase: StartupPhase) -> EngineResult<()> {
        info!("Initializing phase: {:?}", phase);

        match phase {
            StartupPhase::LaunchSource => self.launch_source(),
            StartupPhase::StartReaders => self.start_readers(config),
            StartupPhase::StartAudio => self.start_audio(config),
            StartupPhase::StartRender => {
                self.metrics.start();
                debug!("Render loop ready");
                Ok(())
            }
        }
    }

    fn launch_source(&mut self) -> EngineResult<()> {
        let mut source = match self.pending_source.take() {
            Some(source) => source,
            None => return Err(preview_source::SourceError::AlreadyStarted.into()),
        };

        // Keep the source even if start fails so rollback can reap anything
        // it managed to spawn.
        let started = source.start();
        self.resources.source = Some(source);
        self.resources.outputs = Some(started?);

        debug!("Media source launched");
        Ok(())
    }

    fn start_readers(&mut self, config: &PipelineConfig) -> EngineResult<()> {
        let SourceOutputs { video, audio } = self
            .resources
            .outputs
            .take()
            .ok_or(preview_source::SourceError::AlreadyStarted)?;

        let (video_tx, video_rx) = bounded_queue(config.video.queue_capacity);
        self.metrics.attach_video(video_tx.monitor());
        self.resources.frame_reader = Some(spawn_frame_reader(
            video,
            &config.video,
            video_tx,
            Arc::clone(&self.task_stop),
        )?);
        self.resources.video_rx = Some(video_rx);

        match audio {
            Some(channel) if config.audio.enabled => {
                let (audio_tx, audio_rx) = bounded_queue(config.audio.queue_capacity);
                self.metrics.attach_audio(audio_tx.monitor());
                self.resources.sample_reader = Some(spawn_sample_reader(
                    channel,
                    &config.audio,
                    audio_tx,
                    Arc::clone(&self.task_stop),
                )?);
                self.resources.audio_rx = Some(audio_rx);
            }
            _ => debug!("Audio path disabled"),
        }

        debug!("Readers started");
        Ok(())
    }

    fn start_audio(&mut self, config: &PipelineConfig) -> EngineResult<()> {
        let (Some(consumer), Some(factory)) =
            (self.resources.audio_rx.take(), self.pending_sink.take())
        else {
            return Ok(());
        };

        let driver = SinkDriver::spawn(
            consumer,
            PcmFormat::from(&config.audio),
            factory,
            config.poll_interval(),
            Arc::clone(&self.task_stop),
        )?;
        self.metrics.attach_played(driver.played_counter());
        self.resources.sink_driver = Some(driver);

        debug!("Audio sink driver started");
        Ok(())
    }

    /// Rollback resources from the current phase backwards.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&mut self) {
        self.task_stop.store(true, Ordering::SeqCst);

        if let Some(mut phase) = self.current_phase {
            loop {
                info!("Rolling back phase: {:?}", phase);
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
        }

        self.current_phase = None;
    }

    fn rollback_phase(&mut self, phase: StartupPhase) {
        match phase {
            StartupPhase::StartRender => self.metrics.stop(),
            StartupPhase::StartAudio => self.shutdown_phase(ShutdownPhase::CloseAudio),
            StartupPhase::StartReaders => {
                self.resources.video_rx = None;
                self.resources.audio_rx = None;
                // Readers blocked in a pipe read only return once the pipe closes.
                self.shutdown_phase(ShutdownPhase::TerminateSource);
                self.shutdown_phase(ShutdownPhase::JoinReaders);
            }
            StartupPhase::LaunchSource => {
                self.shutdown_phase(ShutdownPhase::TerminateSource);
                self.resources.outputs = None;
                self.resources.source = None;
            }
        }
    }

    /// Run one teardown step. Every step is idempotent.
    pub fn shutdown_phase(&mut self, phase: ShutdownPhase) {
        debug!("Shutdown phase: {}", phase.name());

        match phase {
            ShutdownPhase::StopRender => {
                self.task_stop.store(true, Ordering::SeqCst);
                self.metrics.stop();
            }
            ShutdownPhase::TerminateSource => {
                if let Some(source) = self.resources.source.as_mut() {
                    if let Err(e) = source.terminate() {
                        warn!("Failed to terminate media source: {}", e);
                    }
                }
            }
            ShutdownPhase::JoinReaders => {
                for (name, handle) in [
                    ("frame", self.resources.frame_reader.take()),
                    ("sample", self.resources.sample_reader.take()),
                ] {
                    let Some(handle) = handle else { continue };
                    match handle.join() {
                        Ok(summary) => info!(
                            reader = name,
                            records = summary.records,
                            dropped = summary.dropped,
                            exit = ?summary.exit,
                            "Reader joined"
                        ),
                        Err(_) => warn!(reader = name, "Reader thread panicked"),
                    }
                }
            }
            ShutdownPhase::CloseAudio => {
                if let Some(mut driver) = self.resources.sink_driver.take() {
                    if let Err(e) = driver.join() {
                        warn!("Audio sink driver ended with error: {}", e);
                    }
                }
            }
        }
    }

    /// Shutdown all resources cleanly.
    #[instrument(name = "shutdown_resources", skip(self))]
    pub fn shutdown(&mut self) {
        let mut phase = ShutdownPhase::StopRender;
        loop {
            self.shutdown_phase(phase);
            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }
        self.resources.video_rx = None;
        self.resources.audio_rx = None;
        self.current_phase = None;
    }

    /// Mutable access to the resources (for the render loop).
    pub fn resources_mut(&mut self) -> &mut InitializedResources {
        &mut self.resources
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
