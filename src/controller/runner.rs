//! Capture controller: public start/stop surface and the session task.
//!
//! One controller owns one external capture process. The session task is the
//! single place where stream output and process exit are turned into state
//! transitions and events, so no two transitions can interleave mid-update:
//! the task reacts to one stream event at a time, in arrival order.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    forward_audio, records, AudioChunk, CaptureOptions, CaptureProcess, ConfigError, LogRecord,
    MessageType, SpawnError, DEFAULT_CAPTURE_BINARY,
};
use crate::controller::{
    CaptureEvent, Channel, EventBus, LifecycleSignal, LifecycleState, LifecycleStateMachine,
};

/// Default time to wait for the process to exit after SIGTERM before
/// escalating to SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Error type for capture controller operations.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// Invalid or conflicting capture options.
    #[error("invalid capture options: {0}")]
    Config(#[from] ConfigError),
    /// The capture binary could not be spawned.
    #[error("failed to spawn capture process: {0}")]
    Spawn(#[from] SpawnError),
    /// `start` was called while a session already exists.
    #[error("capture already started (state: {0})")]
    AlreadyStarted(LifecycleState),
    /// `stop` was called without a live session.
    #[error("capture is not running (state: {0})")]
    NotRunning(LifecycleState),
    /// The spawned process had no piped audio stream.
    #[error("capture process stdout not available")]
    NoStdout,
    /// The spawned process had no piped status stream.
    #[error("capture process stderr not available")]
    NoStderr,
    /// The process exited abnormally.
    #[error("capture process exited with code {code:?}: {context}")]
    ProcessExited {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Last decoded status message, or a placeholder.
        context: String,
    },
    /// The session was stopped before the stream became ready.
    #[error("capture stopped before the stream became ready")]
    Interrupted,
    /// The session task went away unexpectedly.
    #[error("session task channel closed unexpectedly")]
    ChannelClosed,
}

/// Returns true if diagnostic text matches known permission-denial phrasing.
///
/// The upstream protocol has no structured permission-error record type, so
/// this matching is best-effort and non-authoritative; it may miss phrasing
/// changes in future binary versions.
#[must_use]
pub fn is_permission_denial(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)permission (?:denied|required)|not permitted|\btcc\b|(?:audio|screen) recording permission",
        )
        .expect("permission pattern is valid")
    });
    re.is_match(message)
}

/// Caller requests forwarded to the session task.
enum Command {
    Stop(oneshot::Sender<Result<(), CaptureError>>),
}

/// State shared between the controller handle and the session task.
struct Shared {
    machine: LifecycleStateMachine,
    cmd_tx: Option<UnboundedSender<Command>>,
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controller for one capture session.
///
/// A controller is single-session: once it reaches `Stopped` or `Errored`
/// it stays there, and a fresh capture requires a fresh controller.
pub struct CaptureController {
    binary: String,
    options: CaptureOptions,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<Shared>>,
    grace: Duration,
    cancel: CancellationToken,
}

impl CaptureController {
    /// Create a controller that spawns the default capture binary.
    #[must_use]
    pub fn new(options: CaptureOptions) -> Self {
        Self::with_binary(DEFAULT_CAPTURE_BINARY, options)
    }

    /// Create a controller for a custom binary (for testing with scripted
    /// fakes).
    #[must_use]
    pub fn with_binary(binary: impl Into<String>, options: CaptureOptions) -> Self {
        Self {
            binary: binary.into(),
            options,
            bus: Arc::new(EventBus::new()),
            shared: Arc::new(Mutex::new(Shared {
                machine: LifecycleStateMachine::new(),
                cmd_tx: None,
            })),
            grace: DEFAULT_GRACE_PERIOD,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the SIGTERM-to-SIGKILL grace period.
    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        lock_shared(&self.shared).machine.state()
    }

    /// Subscribe to one event channel.
    pub fn subscribe(&self, channel: Channel) -> UnboundedReceiver<CaptureEvent> {
        self.bus.subscribe(channel)
    }

    /// Subscribe one receiver to every event channel, in emission order.
    pub fn subscribe_all(&self) -> UnboundedReceiver<CaptureEvent> {
        self.bus.subscribe_all()
    }

    /// Subscribe to one event channel as a `Stream`.
    pub fn subscribe_stream(&self, channel: Channel) -> UnboundedReceiverStream<CaptureEvent> {
        self.bus.subscribe_stream(channel)
    }

    /// Start the capture session.
    ///
    /// Completion is defined as reaching `Running` (first `stream_start`
    /// record), not as process spawn: a spawned process is not yet a
    /// capturing one. The future settles once the child emits
    /// `stream_start`, exits, or fails to spawn.
    ///
    /// # Errors
    ///
    /// - `CaptureError::Config` for invalid options, before any spawn.
    /// - `CaptureError::AlreadyStarted` if the controller is not `Idle`.
    /// - `CaptureError::Spawn` if the binary is missing or unexecutable.
    /// - `CaptureError::ProcessExited` / `CaptureError::Interrupted` if the
    ///   child goes away before readiness.
    pub async fn start(&self) -> Result<(), CaptureError> {
        // Configuration errors are reported before any process is spawned
        // and leave the controller in `Idle`.
        let args = self.options.to_args()?;

        let ready_rx = {
            let mut shared = lock_shared(&self.shared);
            let state = shared.machine.state();
            if state != LifecycleState::Idle {
                return Err(CaptureError::AlreadyStarted(state));
            }
            shared.machine.apply(LifecycleSignal::StartRequested);

            match Self::spawn_session(&self.binary, &args) {
                Ok((process, audio_rx, log_rx)) => {
                    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                    let (ready_tx, ready_rx) = oneshot::channel();
                    shared.cmd_tx = Some(cmd_tx);

                    tracing::info!(
                        binary = %self.binary,
                        pid = ?process.id(),
                        "Capture process spawned"
                    );

                    let task = SessionTask {
                        process,
                        audio_rx,
                        log_rx,
                        cmd_rx,
                        bus: Arc::clone(&self.bus),
                        shared: Arc::clone(&self.shared),
                        ready: Some(ready_tx),
                        stop_acks: Vec::new(),
                        stop_requested: false,
                        last_log: None,
                        grace: self.grace,
                        kill_deadline: None,
                        cancel: self.cancel.clone(),
                    };
                    tokio::spawn(task.run());
                    ready_rx
                }
                Err(e) => {
                    shared.machine.apply(LifecycleSignal::SpawnFailed);
                    drop(shared);
                    self.bus.emit(CaptureEvent::Error(e.to_string()));
                    return Err(e);
                }
            }
        };

        ready_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }

    /// Stop the capture session.
    ///
    /// Resolves only when the process has actually exited, since only exit
    /// guarantees the audio descriptor is closed and no further `Data`
    /// events will fire. Safe to call while `start` is still pending.
    ///
    /// # Errors
    ///
    /// - `CaptureError::NotRunning` if the session is neither `Starting`
    ///   nor `Running`.
    /// - `CaptureError::ProcessExited` if the session ends abnormally
    ///   while the stop is pending.
    pub async fn stop(&self) -> Result<(), CaptureError> {
        let ack_rx = {
            let shared = lock_shared(&self.shared);
            let state = shared.machine.state();
            if !matches!(state, LifecycleState::Starting | LifecycleState::Running) {
                return Err(CaptureError::NotRunning(state));
            }

            let cmd_tx = shared.cmd_tx.as_ref().ok_or(CaptureError::ChannelClosed)?;
            let (ack_tx, ack_rx) = oneshot::channel();
            cmd_tx
                .send(Command::Stop(ack_tx))
                .map_err(|_| CaptureError::ChannelClosed)?;
            ack_rx
        };

        ack_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }

    /// Spawn the process and wire both streams to their decoder tasks.
    fn spawn_session(
        binary: &str,
        args: &[String],
    ) -> Result<
        (
            CaptureProcess,
            UnboundedReceiver<AudioChunk>,
            UnboundedReceiver<LogRecord>,
        ),
        CaptureError,
    > {
        let mut process = CaptureProcess::spawn_with_binary(binary, args)?;

        let Some(stdout) = process.take_stdout() else {
            let _ = process.start_kill();
            return Err(CaptureError::NoStdout);
        };
        let Some(stderr) = process.take_stderr() else {
            let _ = process.start_kill();
            return Err(CaptureError::NoStderr);
        };

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_audio(stdout, audio_tx));
        tokio::spawn(pump_records(stderr, log_tx));

        Ok((process, audio_rx, log_rx))
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        // Kills a still-running child and lets the session task finalize.
        self.cancel.cancel();
    }
}

/// Decode the status stream and forward records in line order.
async fn pump_records(
    stderr: tokio::process::ChildStderr,
    tx: UnboundedSender<LogRecord>,
) {
    let mut stream = std::pin::pin!(records(stderr));
    while let Some(record) = stream.next().await {
        if tx.send(record).is_err() {
            break;
        }
    }
}

/// One iteration's outcome for the session loop.
enum Step {
    Audio(Option<AudioChunk>),
    Log(Option<LogRecord>),
    Cmd(Option<Command>),
    Exited(std::io::Result<ExitStatus>),
    GraceElapsed,
    Cancelled,
}

/// The per-session event loop.
///
/// Owns the process handle and serializes every state transition and event
/// dispatch. Terminal events (`Stopped`/`Error`) are only emitted after
/// both stream channels have drained, so queued audio and log output is
/// never lost to a racing exit notification.
struct SessionTask {
    process: CaptureProcess,
    audio_rx: UnboundedReceiver<AudioChunk>,
    log_rx: UnboundedReceiver<LogRecord>,
    cmd_rx: UnboundedReceiver<Command>,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<Shared>>,
    ready: Option<oneshot::Sender<Result<(), CaptureError>>>,
    stop_acks: Vec<oneshot::Sender<Result<(), CaptureError>>>,
    stop_requested: bool,
    last_log: Option<String>,
    grace: Duration,
    kill_deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut audio_open = true;
        let mut log_open = true;
        let mut cmd_open = true;
        let mut cancelled = false;
        let mut exited: Option<std::io::Result<ExitStatus>> = None;

        while exited.is_none() || audio_open || log_open {
            let step = tokio::select! {
                chunk = self.audio_rx.recv(), if audio_open => Step::Audio(chunk),
                record = self.log_rx.recv(), if log_open => Step::Log(record),
                cmd = self.cmd_rx.recv(), if cmd_open => Step::Cmd(cmd),
                status = self.process.wait(), if exited.is_none() => Step::Exited(status),
                () = sleep_until_opt(self.kill_deadline), if self.kill_deadline.is_some() => {
                    Step::GraceElapsed
                }
                () = cancel.cancelled(), if !cancelled => Step::Cancelled,
            };

            match step {
                Step::Audio(Some(chunk)) => self.bus.emit(CaptureEvent::Data(chunk)),
                Step::Audio(None) => audio_open = false,
                Step::Log(Some(record)) => self.handle_record(record),
                Step::Log(None) => log_open = false,
                Step::Cmd(Some(Command::Stop(ack))) => {
                    self.handle_stop(ack, exited.is_some());
                }
                Step::Cmd(None) => cmd_open = false,
                Step::Exited(status) => {
                    self.kill_deadline = None;
                    exited = Some(status);
                }
                Step::GraceElapsed => {
                    tracing::warn!(
                        grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                        "Grace period elapsed, escalating to forceful kill"
                    );
                    self.kill_deadline = None;
                    if let Err(e) = self.process.start_kill() {
                        tracing::warn!(error = %e, "Failed to kill capture process");
                    }
                }
                Step::Cancelled => {
                    cancelled = true;
                    self.stop_requested = true;
                    if exited.is_none() {
                        let _ = self.process.start_kill();
                    }
                }
            }
        }

        let Some(exit) = exited else { return };
        self.finalize(exit);
    }

    fn apply(&self, signal: LifecycleSignal) -> Option<LifecycleState> {
        lock_shared(&self.shared).machine.apply(signal)
    }

    /// Interpret one decoded status record as lifecycle signals and forward
    /// it on the log channel.
    fn handle_record(&mut self, record: LogRecord) {
        if is_permission_denial(&record.message) {
            tracing::info!(message = %record.message, "Permission denial phrasing detected");
            self.bus.emit(CaptureEvent::PermissionRequired);
        }

        match record.message_type {
            MessageType::StreamStart => {
                if self.apply(LifecycleSignal::StreamStarted) == Some(LifecycleState::Running) {
                    self.bus.emit(CaptureEvent::Started);
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                }
            }
            MessageType::StreamStop => {
                // External stop, e.g. revoked permission. The terminal
                // transition still waits for process exit.
                self.apply(LifecycleSignal::StreamStopped);
            }
            _ => {}
        }

        self.last_log = Some(record.message.clone());
        self.bus.emit(CaptureEvent::Log(record));
    }

    fn handle_stop(
        &mut self,
        ack: oneshot::Sender<Result<(), CaptureError>>,
        already_exited: bool,
    ) {
        self.stop_acks.push(ack);
        if self.stop_requested {
            return;
        }
        if already_exited {
            // The exit outcome decides the terminal state.
            return;
        }
        self.stop_requested = true;
        self.apply(LifecycleSignal::StopRequested);

        if let Err(e) = self.process.signal_terminate() {
            tracing::warn!(error = %e, "Failed to signal capture process");
        }
        self.kill_deadline = Some(Instant::now() + self.grace);
    }

    /// Apply the terminal transition and settle every pending operation.
    fn finalize(mut self, exit: std::io::Result<ExitStatus>) {
        let code = exit.as_ref().ok().and_then(ExitStatus::code);
        let clean = match &exit {
            // A signal death we caused ourselves is not an error.
            Ok(status) => status.success() || self.stop_requested,
            Err(_) => self.stop_requested,
        };
        let context = self
            .last_log
            .clone()
            .unwrap_or_else(|| "no diagnostic output".to_string());

        if clean {
            tracing::info!(?code, "Capture process exited");
            self.apply(LifecycleSignal::ExitedClean);
            self.bus.emit(CaptureEvent::Stopped);
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(CaptureError::Interrupted));
            }
            for ack in self.stop_acks.drain(..) {
                let _ = ack.send(Ok(()));
            }
        } else {
            tracing::warn!(?code, context = %context, "Capture process exited abnormally");
            self.apply(LifecycleSignal::ExitedError);
            self.bus.emit(
                CaptureEvent::Error(
                    CaptureError::ProcessExited {
                        code,
                        context: context.clone(),
                    }
                    .to_string(),
                ),
            );
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(CaptureError::ProcessExited {
                    code,
                    context: context.clone(),
                }));
            }
            for ack in self.stop_acks.drain(..) {
                let _ = ack.send(Err(CaptureError::ProcessExited {
                    code,
                    context: context.clone(),
                }));
            }
        }

        // A stop can land between the loop's last iteration and here: the
        // caller observed a live state under the shared lock and sent before
        // the terminal transition above. Drain those commands and answer
        // them with the same outcome as the acks above.
        self.cmd_rx.close();
        while let Ok(Command::Stop(ack)) = self.cmd_rx.try_recv() {
            let _ = ack.send(if clean {
                Ok(())
            } else {
                Err(CaptureError::ProcessExited {
                    code,
                    context: context.clone(),
                })
            });
        }

        lock_shared(&self.shared).cmd_tx = None;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
