//! Capture process spawning and control.
//!
//! Wraps the external audio capture binary in a `tokio::process::Child` with
//! both output streams piped: stdout carries raw PCM bytes, stderr carries
//! newline-delimited JSON status records.

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Default name of the capture binary, resolved via `PATH`.
pub const DEFAULT_CAPTURE_BINARY: &str = "system-audio-capture";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The capture binary was not found.
    #[error("capture binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("permission denied spawning capture binary")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// A running capture process.
#[derive(Debug)]
pub struct CaptureProcess {
    child: Child,
}

impl CaptureProcess {
    /// Spawn the default capture binary with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(args: &[String]) -> Result<Self, SpawnError> {
        Self::spawn_with_binary(DEFAULT_CAPTURE_BINARY, args)
    }

    /// Spawn a custom binary (for testing with scripted fakes).
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_binary(binary: &str, args: &[String]) -> Result<Self, SpawnError> {
        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SpawnError::from_io)?;

        Ok(Self { child })
    }

    /// Take ownership of the audio stream handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the status stream handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Request termination without waiting for exit.
    ///
    /// On Unix, sends SIGTERM so the binary can flush and close its streams.
    /// On other platforms this is an immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be sent.
    pub fn signal_terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.id() {
                let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
                if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
                    tracing::warn!(pid, error = %e, "Failed to send SIGTERM");
                }
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Forcefully kill the process without waiting for exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}
