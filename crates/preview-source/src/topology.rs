//! The two media source topologies.

use tracing::{info, instrument, warn};

use preview_ipc::{PipelineConfig, SourceTopology};

use crate::channel::{ClosedFlag, ExitNotice, SourceChannel};
use crate::ffmpeg;
use crate::process::FfmpegProcess;
use crate::{MediaSource, SourceError, SourceResult};

/// Output channels of a started source.
#[derive(Debug)]
pub struct SourceOutputs {
    /// Raw BGR frames.
    pub video: SourceChannel,

    /// Raw interleaved PCM, absent when audio is disabled.
    pub audio: Option<SourceChannel>,
}

/// Build the media source for the configured topology.
pub fn create_source(config: &PipelineConfig) -> Box<dyn MediaSource> {
    match config.topology {
        SourceTopology::SingleChannel => Box::new(SingleChannelSource::new(config.clone())),
        SourceTopology::DualInstance => Box::new(DualInstanceSource::new(config.clone())),
    }
}

/// Reap `process` if it exited on its own and record a notice the first
/// time that happens.
fn collect_exit(
    process: &mut FfmpegProcess,
    notices: &mut Vec<ExitNotice>,
) -> SourceResult<()> {
    if !process.is_running() {
        return Ok(());
    }

    if let Some(status) = process.try_exit()? {
        notices.push(ExitNotice {
            instance: process.instance().to_string(),
            code: status.code(),
        });
    }
    Ok(())
}

/// Create a pipe whose ends are both close-on-exec.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> SourceResult<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::OFlag;

    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)?)
}

/// Create a pipe whose ends are both close-on-exec.
///
/// No atomic `pipe2` here; a child forked between the two calls can
/// inherit the ends.
#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "freebsd"))
))]
fn cloexec_pipe() -> SourceResult<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use std::os::fd::AsRawFd;

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read_end, write_end) = nix::unistd::pipe().map_err(std::io::Error::from)?;
    for fd in [&read_end, &write_end] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(std::io::Error::from)?;
    }
    Ok((read_end, write_end))
}

/// Spawn `cmd` with a second output pipe installed as its
/// [`ffmpeg::AUDIO_PIPE_FD`], returning the process and the read end.
#[cfg(unix)]
fn spawn_with_audio_pipe(
    instance: &'static str,
    mut cmd: std::process::Command,
    flags: Vec<ClosedFlag>,
) -> SourceResult<(FfmpegProcess, std::fs::File)> {
    use std::os::fd::AsRawFd;
    use std::os::unix::process::CommandExt;

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use nix::unistd::dup2;

    let (read_end, write_end) = cloexec_pipe()?;

    let write_raw = write_end.as_raw_fd();
    unsafe {
        cmd.pre_exec(move || {
            if write_raw == ffmpeg::AUDIO_PIPE_FD {
                fcntl(write_raw, FcntlArg::F_SETFD(FdFlag::empty()))?;
            } else {
                dup2(write_raw, ffmpeg::AUDIO_PIPE_FD)?;
            }
            Ok(())
        });
    }

    let process = FfmpegProcess::spawn(instance, cmd, flags)?;

    // Only the child may hold the write end, or the reader never sees EOF.
    drop(write_end);

    Ok((process, std::fs::File::from(read_end)))
}

/// One ffmpeg instance writing video to stdout and audio to a second pipe.
///
/// Needs inheritable descriptors beyond stdio, so it is unix-only.
pub struct SingleChannelSource {
    config: PipelineConfig,
    process: Option<FfmpegProcess>,
}

impl SingleChannelSource {
    /// Create an unstarted source.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    #[cfg(unix)]
    fn launch(&mut self) -> SourceResult<SourceOutputs> {
        let listen = self.config.ingest.listen_url()?;
        let cmd = ffmpeg::single_channel_command(&self.config, &listen);
        let video_flag = ClosedFlag::new();

        let (mut process, audio) = if self.config.audio.enabled {
            let audio_flag = ClosedFlag::new();
            let (process, pipe) = spawn_with_audio_pipe(
                "ingest",
                cmd,
                vec![video_flag.clone(), audio_flag.clone()],
            )?;
            (process, Some(SourceChannel::with_flag(pipe, audio_flag)))
        } else {
            let process = FfmpegProcess::spawn("ingest", cmd, vec![video_flag.clone()])?;
            (process, None)
        };

        let video = SourceChannel::with_flag(process.take_stdout()?, video_flag);
        info!(url = %listen, "Listening for RTMP publishers");
        self.process = Some(process);

        Ok(SourceOutputs { video, audio })
    }

    #[cfg(not(unix))]
    fn launch(&mut self) -> SourceResult<SourceOutputs> {
        Err(SourceError::UnsupportedTopology(
            SourceTopology::SingleChannel.name(),
        ))
    }
}

impl MediaSource for SingleChannelSource {
    fn topology(&self) -> SourceTopology {
        SourceTopology::SingleChannel
    }

    #[instrument(name = "single_channel_start", skip(self))]
    fn start(&mut self) -> SourceResult<SourceOutputs> {
        if self.process.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        self.launch()
    }

    fn poll_exits(&mut self) -> SourceResult<Vec<ExitNotice>> {
        let mut notices = Vec::new();
        if let Some(process) = self.process.as_mut() {
            collect_exit(process, &mut notices)?;
        }
        Ok(notices)
    }

    fn terminate(&mut self) -> SourceResult<()> {
        if let Some(process) = self.process.as_mut() {
            process.terminate()?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(FfmpegProcess::is_running)
    }
}

/// Two ffmpeg instances: the public listener writes video to stdout and
/// relays the untouched audio track over loopback RTMP to a second
/// listener, which writes PCM to its stdout.
pub struct DualInstanceSource {
    config: PipelineConfig,
    video: Option<FfmpegProcess>,
    audio: Option<FfmpegProcess>,
}

impl DualInstanceSource {
    /// Create an unstarted source.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            video: None,
            audio: None,
        }
    }
}

impl MediaSource for DualInstanceSource {
    fn topology(&self) -> SourceTopology {
        SourceTopology::DualInstance
    }

    #[instrument(name = "dual_instance_start", skip(self))]
    fn start(&mut self) -> SourceResult<SourceOutputs> {
        if self.video.is_some() {
            return Err(SourceError::AlreadyStarted);
        }

        let listen = self.config.ingest.listen_url()?;

        // The relay listener must be up before the video instance pushes to it.
        let (relay, audio_process, audio) = if self.config.audio.enabled {
            let relay = self.config.ingest.relay_url()?;
            let flag = ClosedFlag::new();
            let mut process = FfmpegProcess::spawn(
                "audio",
                ffmpeg::audio_instance_command(&self.config, &relay),
                vec![flag.clone()],
            )?;
            let channel = SourceChannel::with_flag(process.take_stdout()?, flag);
            (Some(relay), Some(process), Some(channel))
        } else {
            (None, None, None)
        };

        let video_flag = ClosedFlag::new();
        let mut video_process = FfmpegProcess::spawn(
            "video",
            ffmpeg::video_instance_command(&self.config, &listen, relay.as_ref()),
            vec![video_flag.clone()],
        )?;
        let video = SourceChannel::with_flag(video_process.take_stdout()?, video_flag);
        info!(url = %listen, relay = ?relay.as_ref().map(|u| u.as_str()), "Listening for RTMP publishers");

        self.video = Some(video_process);
        self.audio = audio_process;

        Ok(SourceOutputs { video, audio })
    }

    fn poll_exits(&mut self) -> SourceResult<Vec<ExitNotice>> {
        let mut notices = Vec::new();
        for process in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            collect_exit(process, &mut notices)?;
        }
        Ok(notices)
    }

    fn terminate(&mut self) -> SourceResult<()> {
        let mut first_error = None;
        for process in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            if let Err(e) = process.terminate() {
                warn!(instance = process.instance(), "Failed to terminate: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn is_running(&self) -> bool {
        [self.video.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .any(FfmpegProcess::is_running)
    }
}
