//! `rtmp-preview`: accept one RTMP publisher and show it live.
//!
//! ffmpeg does the RTMP handling and decoding; this binary maps the command
//! line onto a pipeline configuration, makes sure ffmpeg is present, then
//! runs the supervisor with a window (or headless) renderer and the default
//! audio output device.

mod window;

use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use preview_audio::{CpalSink, SinkFactory};
use preview_engine::create_supervisor;
use preview_ipc::{
    command_channel, event_channel, AudioSettings, IngestConfig, PipelineConfig, PipelineEvent,
    SourceTopology, VideoSettings,
};
use preview_source::{create_source, install_ffmpeg, probe_ffmpeg, SourceError};
use preview_video::HeadlessRenderer;

use crate::window::WindowRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TopologyArg {
    /// One ffmpeg process, audio on an extra pipe (Unix only).
    Single,
    /// Two ffmpeg processes, audio relayed over loopback RTMP.
    Dual,
}

impl From<TopologyArg> for SourceTopology {
    fn from(arg: TopologyArg) -> Self {
        match arg {
            TopologyArg::Single => SourceTopology::SingleChannel,
            TopologyArg::Dual => SourceTopology::DualInstance,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Live preview of an RTMP publisher")]
struct Args {
    /// RTMP port to listen on
    #[arg(long, default_value_t = 1935)]
    port: u16,

    /// Address to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// RTMP application name; publishers append any stream key
    #[arg(long, default_value = "live")]
    app: String,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Window title
    #[arg(long, default_value = "RTMP Preview")]
    title: String,

    /// Ignore the publisher's audio
    #[arg(long)]
    no_audio: bool,

    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Sample frames per audio chunk
    #[arg(long, default_value_t = 1024)]
    chunk_samples: usize,

    /// Video queue capacity in frames
    #[arg(long, default_value_t = 10)]
    video_queue: usize,

    /// Audio queue capacity in chunks
    #[arg(long, default_value_t = 20)]
    audio_queue: usize,

    /// Video delay in seconds used to line up with audio
    #[arg(long, default_value_t = 0.1)]
    delay: f64,

    /// Process layout (defaults to single on Unix, dual elsewhere)
    #[arg(long, value_enum)]
    topology: Option<TopologyArg>,

    /// Loopback port for the dual-instance audio relay
    #[arg(long, default_value_t = 1936)]
    relay_port: u16,

    /// Path to the ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Try to install ffmpeg with the system package manager if it is missing
    #[arg(long)]
    install_ffmpeg: bool,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Print metrics as JSON lines on stdout
    #[arg(long)]
    metrics_json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ingest: IngestConfig {
                bind_address: self.bind.clone(),
                port: self.port,
                app_name: self.app.clone(),
                relay_port: self.relay_port,
            },
            video: VideoSettings {
                width: self.width,
                height: self.height,
                fps: self.fps,
                queue_capacity: self.video_queue,
                window_title: self.title.clone(),
            },
            audio: AudioSettings {
                enabled: !self.no_audio,
                sample_rate: self.sample_rate,
                channels: self.channels,
                chunk_samples: self.chunk_samples,
                queue_capacity: self.audio_queue,
            },
            topology: self.topology.map(SourceTopology::from).unwrap_or_default(),
            ffmpeg_path: self.ffmpeg.clone(),
            resync_delay_secs: self.delay,
            ..PipelineConfig::default()
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "rtmp_preview=debug,preview_engine=debug,preview_source=debug,preview_video=debug,preview_audio=debug,ffmpeg=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Make sure ffmpeg runs, installing it first when allowed.
fn ensure_ffmpeg(path: &str, install: bool) -> Result<()> {
    match probe_ffmpeg(path) {
        Ok(version) => {
            info!(%version, "Found ffmpeg");
            Ok(())
        }
        Err(SourceError::ToolMissing(_)) if install => {
            warn!("ffmpeg not found, attempting installation");
            let version = install_ffmpeg(path).context("Failed to install ffmpeg")?;
            info!(%version, "Installed ffmpeg");
            Ok(())
        }
        Err(e @ SourceError::ToolMissing(_)) => Err(e).context(
            "ffmpeg is required; install it or rerun with --install-ffmpeg",
        ),
        Err(e) => Err(e).context("ffmpeg check failed"),
    }
}

fn print_ingest_info(config: &PipelineConfig) -> Result<()> {
    let host = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "<this-ip>".to_string());
    let publish = config.ingest.publish_url(&host)?;

    println!("RTMP preview listening on {}", config.ingest.listen_url()?);
    println!("Publish to: {}/<any-key>", publish.as_str().trim_end_matches('/'));
    println!("Press Esc in the window or Ctrl-C to stop");
    Ok(())
}

/// Log pipeline events, printing metrics as JSON lines when asked to.
fn spawn_event_printer(events: Receiver<PipelineEvent>, metrics_json: bool) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    PipelineEvent::Metrics(metrics) if metrics_json => {
                        match serde_json::to_string(&metrics) {
                            Ok(line) => println!("{line}"),
                            Err(e) => warn!("Failed to encode metrics: {}", e),
                        }
                    }
                    PipelineEvent::Metrics(metrics) => debug!(
                        fps = metrics.fps,
                        rendered = metrics.frames_rendered,
                        frames_dropped = metrics.frames_dropped,
                        chunks_played = metrics.chunks_played,
                        chunks_dropped = metrics.chunks_dropped,
                        "Metrics"
                    ),
                    PipelineEvent::Warning(warning) => warn!(?warning, "Pipeline warning"),
                    PipelineEvent::StateChanged { current, .. } => {
                        debug!(state = current.name(), "Pipeline state")
                    }
                    PipelineEvent::SourceExited { instance, code } => {
                        info!(%instance, ?code, "ffmpeg exited")
                    }
                    PipelineEvent::Error { message } => error!("{}", message),
                    PipelineEvent::Stopped(reason) => info!(reason = %reason.message(), "Stopped"),
                }
            }
        })
        .context("Failed to spawn event printer")?;
    Ok(handle)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.pipeline_config();
    config.validate().context("Invalid configuration")?;

    print_ingest_info(&config)?;
    ensure_ffmpeg(&config.ffmpeg_path, args.install_ffmpeg)?;

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let mut supervisor = create_supervisor(config.clone(), command_rx, event_tx);

    let stop = supervisor.stop_handle();
    ctrlc::set_handler(move || stop.request_stop()).context("Failed to install Ctrl-C handler")?;

    let printer = spawn_event_printer(event_rx, args.metrics_json)?;

    let source = create_source(&config);
    let sink_factory: SinkFactory = Box::new(CpalSink::open_boxed);
    info!(topology = config.topology.name(), "Starting preview");

    let outcome = if args.headless {
        supervisor.run(source, &mut HeadlessRenderer::new(), sink_factory)
    } else {
        let mut renderer = WindowRenderer::new(&config.video)?;
        supervisor.run(source, &mut renderer, sink_factory)
    };

    // Closing the event channel ends the printer.
    drop(supervisor);
    drop(command_tx);
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }

    let reason = outcome?;
    if reason.is_failure() {
        bail!("Preview stopped: {}", reason.message());
    }

    info!(reason = %reason.message(), "Preview closed");
    Ok(())
}
