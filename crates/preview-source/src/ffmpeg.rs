//! ffmpeg command lines for each source topology.
//!
//! Builders only set program and arguments; stdio and pipe wiring are left
//! to the caller.

use std::process::Command;

use url::Url;

use preview_ipc::{AudioSettings, PipelineConfig, VideoSettings};

/// Descriptor the single-channel instance writes PCM audio to.
pub const AUDIO_PIPE_FD: i32 = 3;

fn listener_command(ffmpeg_path: &str, url: &Url) -> Command {
    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(["-hide_banner", "-loglevel", "warning", "-nostdin"]);
    cmd.args(["-listen", "1"]);
    cmd.arg("-i").arg(url.as_str());
    cmd
}

fn push_video_output(cmd: &mut Command, video: &VideoSettings) {
    cmd.args(["-map", "0:v:0"]);
    cmd.arg("-vf")
        .arg(format!("scale={}:{},fps={}", video.width, video.height, video.fps));
    cmd.args(["-vcodec", "rawvideo", "-pix_fmt", "bgr24"]);
    cmd.args(["-f", "rawvideo", "pipe:1"]);
}

fn push_audio_output(cmd: &mut Command, audio: &AudioSettings, target: &str) {
    cmd.args(["-map", "0:a:0?"]);
    cmd.args(["-acodec", "pcm_s16le"]);
    cmd.arg("-ar").arg(audio.sample_rate.to_string());
    cmd.arg("-ac").arg(audio.channels.to_string());
    cmd.args(["-f", "s16le", target]);
}

/// One listener writing video to stdout and audio to [`AUDIO_PIPE_FD`].
pub fn single_channel_command(config: &PipelineConfig, listen: &Url) -> Command {
    let mut cmd = listener_command(&config.ffmpeg_path, listen);
    push_video_output(&mut cmd, &config.video);
    if config.audio.enabled {
        push_audio_output(&mut cmd, &config.audio, &format!("pipe:{AUDIO_PIPE_FD}"));
    }
    cmd
}

/// The public listener of a dual-instance source.
///
/// Writes video to stdout and, when `relay` is given, forwards the audio
/// track untouched to the audio instance.
pub fn video_instance_command(config: &PipelineConfig, listen: &Url, relay: Option<&Url>) -> Command {
    let mut cmd = listener_command(&config.ffmpeg_path, listen);
    push_video_output(&mut cmd, &config.video);
    if let Some(relay) = relay {
        cmd.args(["-map", "0:a:0?", "-c:a", "copy", "-f", "flv"]);
        cmd.arg(relay.as_str());
    }
    cmd
}

/// The loopback listener of a dual-instance source; writes PCM to stdout.
pub fn audio_instance_command(config: &PipelineConfig, relay: &Url) -> Command {
    let mut cmd = listener_command(&config.ffmpeg_path, relay);
    push_audio_output(&mut cmd, &config.audio, "pipe:1");
    cmd
}
