//! Encoder invocation and child process handling.
//!
//! The argument template below is a compatibility surface: ingest
//! endpoints and downstream tooling expect exactly these encoding
//! parameters.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::mask_key;
use crate::config::EncoderConfig;

/// Failure while terminating an encoder process.
#[derive(Debug, thiserror::Error)]
pub enum TerminateError {
    #[error("failed to signal encoder process: {reason}")]
    Signal { reason: String },

    #[error("encoder did not exit within {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("failed to wait for encoder process: {0}")]
    Wait(#[from] io::Error),
}

/// Fully described encoder run for one stream.
#[derive(Clone)]
pub struct EncoderInvocation {
    program: PathBuf,
    input: String,
    ingest_url: String,
    key: String,
    label: String,
}

impl EncoderInvocation {
    pub fn new(config: &EncoderConfig, input: &str, key: &str, label: &str) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            input: input.to_string(),
            ingest_url: config.ingest_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            label: label.to_string(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Human-readable name used to tag log output.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Destination URL including the secret key.
    fn destination(&self) -> String {
        format!("{}/{}", self.ingest_url, self.key)
    }

    /// Destination URL with the key masked, safe for logs.
    pub fn redacted_destination(&self) -> String {
        format!("{}/{}", self.ingest_url, mask_key(&self.key))
    }

    /// Encoder arguments: native-rate looped input, capped H.264, AAC, FLV out.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-re",
            "-stream_loop",
            "-1",
            "-i",
            self.input.as_str(),
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-maxrate",
            "3000k",
            "-bufsize",
            "6000k",
            "-pix_fmt",
            "yuv420p",
            "-g",
            "50",
            "-c:a",
            "aac",
            "-b:a",
            "160k",
            "-ac",
            "2",
            "-ar",
            "44100",
            "-f",
            "flv",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.push(self.destination());
        args
    }
}

impl std::fmt::Debug for EncoderInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderInvocation")
            .field("program", &self.program)
            .field("input", &self.input)
            .field("destination", &self.redacted_destination())
            .field("label", &self.label)
            .finish()
    }
}

/// Launches encoder processes.
pub trait EncoderLauncher: Send + Sync + std::fmt::Debug {
    /// Spawns the encoder described by `invocation`.
    ///
    /// # Errors
    /// - `io::Error` - Binary missing or the spawn itself failed
    fn launch(&self, invocation: &EncoderInvocation) -> io::Result<EncoderProcess>;
}

/// Handle to a running encoder child.
///
/// The child is killed if the handle is dropped while it still runs.
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
}

impl EncoderProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// OS process id, `None` once the child has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Sends a graceful termination signal and waits up to `timeout` for exit.
    ///
    /// # Errors
    /// - `TerminateError::Signal` - Signal could not be delivered
    /// - `TerminateError::TimedOut` - Process still running after `timeout`
    /// - `TerminateError::Wait` - Waiting on the process failed
    pub async fn terminate(&mut self, timeout: Duration) -> Result<ExitStatus, TerminateError> {
        self.signal_terminate()?;

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => Err(TerminateError::TimedOut {
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// Forcefully kills the process without waiting.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Kill of encoder process failed: {}", e);
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> Result<(), TerminateError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // Already reaped; the wait below returns the cached status.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        let pid = i32::try_from(pid).map_err(|_| TerminateError::Signal {
            reason: format!("pid {pid} out of range"),
        })?;

        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| TerminateError::Signal {
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> Result<(), TerminateError> {
        self.child.start_kill().map_err(|e| TerminateError::Signal {
            reason: e.to_string(),
        })
    }
}

/// Launcher running the real encoder binary.
#[derive(Debug, Default, Clone)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, invocation: &EncoderInvocation) -> io::Result<EncoderProcess> {
        tracing::info!("Executing encoder command: {:?}", invocation);

        let mut child = Command::new(invocation.program())
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let label = invocation.label().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(stream = %label, "encoder: {}", line);
                }
                tracing::debug!(stream = %label, "encoder output closed");
            });
        }

        Ok(EncoderProcess::new(child))
    }
}
