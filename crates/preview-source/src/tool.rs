//! Locating and installing the ffmpeg executable.

use std::io::ErrorKind;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::{SourceError, SourceResult};

/// Run `<path> -version` and return the first line of its output.
pub fn probe_ffmpeg(path: &str) -> SourceResult<String> {
    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                SourceError::ToolMissing(path.to_string())
            }
            _ => SourceError::Io(e),
        })?;

    if !output.status.success() {
        return Err(SourceError::ToolFailed {
            path: path.to_string(),
            status: output.status,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Package manager invocation that installs ffmpeg on this platform.
pub fn installer_command() -> Option<Command> {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("winget");
        cmd.args(["install", "--id", "Gyan.FFmpeg", "-e", "--source", "winget"]);
        Some(cmd)
    } else if cfg!(target_os = "linux") {
        let mut cmd = Command::new("sudo");
        cmd.args(["apt", "install", "-y", "ffmpeg"]);
        Some(cmd)
    } else {
        None
    }
}

/// Install ffmpeg with the platform package manager, then probe it again.
pub fn install_ffmpeg(path: &str) -> SourceResult<String> {
    let mut cmd = installer_command().ok_or_else(|| {
        SourceError::InstallUnsupported(format!(
            "no package manager known for {}; install ffmpeg manually",
            std::env::consts::OS
        ))
    })?;

    info!(program = ?cmd.get_program(), "Installing ffmpeg");
    let status = cmd
        .status()
        .map_err(|e| SourceError::InstallFailed(e.to_string()))?;
    if !status.success() {
        warn!(%status, "ffmpeg installer failed");
        return Err(SourceError::InstallFailed(format!("installer exited with {status}")));
    }

    probe_ffmpeg(path)
}
