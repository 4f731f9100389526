//! Supervision of one media tool process.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, warn};

use crate::channel::ClosedFlag;
use crate::{SourceError, SourceResult};

/// A running media tool instance.
///
/// Stdout is piped for the caller to read; stderr is drained into the log
/// at debug level so the tool can never block on a full diagnostics pipe.
/// Every closed flag registered with the process is raised once it exits.
pub struct FfmpegProcess {
    instance: &'static str,
    child: Child,
    stderr_thread: Option<JoinHandle<()>>,
    flags: Vec<ClosedFlag>,
    exit: Option<ExitStatus>,
}

impl FfmpegProcess {
    /// Spawn `cmd` as the named instance.
    #[instrument(name = "spawn_ffmpeg", skip(cmd, flags))]
    pub fn spawn(
        instance: &'static str,
        mut cmd: Command,
        flags: Vec<ClosedFlag>,
    ) -> SourceResult<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        detach_from_terminal(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|source| SourceError::Spawn { instance, source })?;
        info!(pid = child.id(), "Media tool started");

        let stderr_thread = match child.stderr.take() {
            Some(stderr) => Some(
                thread::Builder::new()
                    .name(format!("ffmpeg-{instance}-stderr"))
                    .spawn(move || {
                        for line in BufReader::new(stderr).lines() {
                            match line {
                                Ok(line) if !line.trim().is_empty() => {
                                    debug!(target: "ffmpeg", instance, "{}", line.trim_end())
                                }
                                Ok(_) => {}
                                Err(_) => break,
                            }
                        }
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            instance,
            child,
            stderr_thread,
            flags,
            exit: None,
        })
    }

    /// Instance name.
    pub fn instance(&self) -> &'static str {
        self.instance
    }

    /// Take the piped stdout. Only succeeds once.
    pub fn take_stdout(&mut self) -> SourceResult<ChildStdout> {
        self.child.stdout.take().ok_or(SourceError::MissingPipe {
            instance: self.instance,
            pipe: "stdout",
        })
    }

    /// Returns the exit status if the process has exited, without blocking.
    ///
    /// The first time an exit is observed the closed flags are raised.
    pub fn try_exit(&mut self) -> SourceResult<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }

        if let Some(status) = self.child.try_wait()? {
            self.reaped(status);
        }
        Ok(self.exit)
    }

    /// Check if the process has not been observed to exit.
    pub fn is_running(&self) -> bool {
        self.exit.is_none()
    }

    /// Kill the process and wait for it. Safe to call more than once.
    pub fn terminate(&mut self) -> SourceResult<()> {
        if self.exit.is_none() {
            if let Err(e) = self.child.kill() {
                // Already exited but not yet reaped.
                debug!(instance = self.instance, "kill: {}", e);
            }
            let status = self.child.wait()?;
            self.reaped(status);
        }

        if let Some(handle) = self.stderr_thread.take() {
            if handle.join().is_err() {
                warn!(instance = self.instance, "stderr drain thread panicked");
            }
        }
        Ok(())
    }

    fn reaped(&mut self, status: ExitStatus) {
        info!(instance = self.instance, %status, "Media tool exited");
        self.exit = Some(status);
        for flag in &self.flags {
            flag.mark();
        }
    }
}

/// Put the child in its own session so a terminal Ctrl-C reaches only us;
/// the supervisor then terminates the child itself.
#[cfg(unix)]
fn detach_from_terminal(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_from_terminal(_cmd: &mut Command) {}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(instance = self.instance, "Failed to terminate media tool: {}", e);
        }
    }
}
