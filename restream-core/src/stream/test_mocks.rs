//! Encoder launchers that run cheap stand-in processes.

use std::io;
use std::process::Stdio;

use parking_lot::Mutex;
use tokio::process::Command;

use super::encoder::{EncoderInvocation, EncoderLauncher, EncoderProcess};

fn spawn_stand_in(program: &str, args: &[&str]) -> io::Result<EncoderProcess> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    Ok(EncoderProcess::new(child))
}

/// Launches a long `sleep` that exits promptly on SIGTERM.
#[derive(Debug, Default)]
pub struct SleepLauncher {
    invocations: Mutex<Vec<EncoderInvocation>>,
}

impl SleepLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Invocations received so far, in launch order.
    pub fn invocations(&self) -> Vec<EncoderInvocation> {
        self.invocations.lock().clone()
    }
}

impl EncoderLauncher for SleepLauncher {
    fn launch(&self, invocation: &EncoderInvocation) -> io::Result<EncoderProcess> {
        self.invocations.lock().push(invocation.clone());
        spawn_stand_in("sleep", &["3600"])
    }
}

/// Launches a process that ignores SIGTERM and never exits on its own.
#[derive(Debug, Default)]
pub struct StubbornLauncher;

impl EncoderLauncher for StubbornLauncher {
    fn launch(&self, _invocation: &EncoderInvocation) -> io::Result<EncoderProcess> {
        spawn_stand_in("sh", &["-c", "trap '' TERM; exec sleep 3600"])
    }
}

/// Launcher whose binary is never found.
#[derive(Debug, Default)]
pub struct FailingLauncher;

impl EncoderLauncher for FailingLauncher {
    fn launch(&self, _invocation: &EncoderInvocation) -> io::Result<EncoderProcess> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "encoder binary not found",
        ))
    }
}
