use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientMessage, ServerMessage, Utf8Decoder, INTERRUPT};
use crate::pty::{self, Pty, PtyError, ShellSpec, DEFAULT_COLS, DEFAULT_ROWS};

/// How long a session may run without an attached viewer.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before the initial command is typed, so the prompt is up first.
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_millis(100);

/// Time between SIGHUP and SIGKILL when a session is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(3);

/// PTY output chunks buffered between the reader thread and the event pump.
/// The reader blocks when this is full, pushing back on the child process.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

const INPUT_CHANNEL_CAPACITY: usize = 64;

/// After the child exits, how long to keep collecting output that is still
/// in flight from the reader thread before sending `exit`.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

const EVENTS_CAPACITY: usize = 64;

/// Knobs shared by every session created through one registry.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub command_delay: Duration,
    pub kill_grace: Duration,
    /// Shell binary; `None` uses `$SHELL`.
    pub shell: Option<String>,
    pub login_shell: bool,
    pub extra_path: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            command_delay: DEFAULT_COMMAND_DELAY,
            kill_grace: DEFAULT_KILL_GRACE,
            shell: None,
            login_shell: true,
            extra_path: pty::DEFAULT_EXTRA_PATH.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Parameters for a new session, as resolved by the listener.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Logical project identifier. Not unique across sessions.
    pub project_id: String,
    /// Working directory. Must already exist.
    pub cwd: PathBuf,
    /// Typed into the shell after [`SessionSettings::command_delay`].
    /// Empty means no initial command.
    pub command: String,
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub project_id: String,
    pub cwd: String,
    pub command: String,
    pub pid: Option<u32>,
    pub attached: bool,
}

/// How the shell process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_code: u32,
    pub signal: Option<String>,
}

impl From<portable_pty::ExitStatus> for ExitReport {
    fn from(status: portable_pty::ExitStatus) -> Self {
        Self {
            exit_code: status.exit_code(),
            signal: status.signal().map(str::to_string),
        }
    }
}

/// Lifecycle notifications emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: String, project_id: String },
    Destroyed { id: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session {0} is no longer running")]
    Dead(String),

    #[error("session {0} is not accepting input")]
    InputClosed(String),

    #[error(transparent)]
    Pty(#[from] PtyError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("server is shutting down")]
    ShuttingDown,

    #[error("failed to start shell: {0}")]
    Spawn(#[from] PtyError),

    #[error("shell spawn task failed: {0}")]
    SpawnTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Attach(#[from] SessionError),
}

/// The connection currently receiving a session's output.
struct Viewer {
    id: u64,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Session lifecycle.
///
/// ```text
/// Created  -> Attached             first attach
/// Attached -> Attached             another viewer supersedes the current one
/// Attached -> Detached             viewer closed without kill; timer armed
/// Detached -> Attached             reattach before the timer fires; timer disarmed
/// Detached -> Dead                 idle timeout or shell exit
/// Attached -> Dead                 kill or shell exit
/// ```
///
/// `kill()` and the exit monitor do not move straight to `Dead`: they set
/// `terminating`, which makes `attach` fail at once, and leave the viewer in
/// place so it still receives trailing output and `exit`.
enum Phase {
    Created,
    Attached(Viewer),
    Detached,
    Dead,
}

struct EvictionTimer {
    generation: u64,
    handle: AbortHandle,
}

struct SessionState {
    phase: Phase,
    /// Present only while `phase` is `Detached` and the session is not
    /// terminating.
    eviction: Option<EvictionTimer>,
    terminating: bool,
    next_viewer_id: u64,
    next_generation: u64,
}

/// Handle returned by [`Session::attach`].
///
/// `rx` yields a `session` message first, then `stdout` chunks and finally
/// `exit`. It closes when this viewer is superseded or the session dies.
#[derive(Debug)]
pub struct Attachment {
    pub viewer_id: u64,
    pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Process-side handles moved into the session's I/O tasks by `start`.
struct SessionIo {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Option<Box<dyn portable_pty::Child + Send + Sync>>,
    input_rx: mpsc::Receiver<Bytes>,
}

/// One interactive shell and the viewer (if any) watching it.
///
/// A session owns exactly one shell process for its whole life. Viewers come
/// and go through [`attach`](Self::attach) / [`detach`](Self::detach)
/// without touching the process. When the shell exits, for whatever reason,
/// the session removes itself from its registry and can never be attached
/// again.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Session {
    /// Server-generated identifier, stable for the session's lifetime.
    pub id: String,
    pub project_id: String,
    pub cwd: PathBuf,
    /// Initial command typed into the shell.
    pub command: String,
    /// PID of the shell, which leads its own process group.
    pub pid: Option<u32>,
    input_tx: mpsc::Sender<Bytes>,
    pty: Arc<Mutex<Pty>>,
    state: Arc<Mutex<SessionState>>,
    /// Set by the exit monitor as soon as the child is reaped. Checked
    /// before signalling so a recycled PID is never hit.
    child_exited: Arc<AtomicBool>,
    /// Fires once the session is destroyed.
    cancelled: CancellationToken,
    settings: Arc<SessionSettings>,
    registry: Weak<RegistryInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the shell. The session is inert until [`start`](Self::start)
    /// wires up its I/O tasks; the registry inserts it in between so the
    /// exit notification can never race ahead of registration.
    fn spawn(
        request: LaunchRequest,
        settings: Arc<SessionSettings>,
        registry: Weak<RegistryInner>,
    ) -> Result<(Self, SessionIo), PtyError> {
        let spec = ShellSpec {
            shell: settings.shell.clone(),
            login: settings.login_shell,
            cwd: request.cwd.clone(),
            extra_path: settings.extra_path.clone(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        };
        let mut pty = Pty::spawn(&spec)?;
        let reader = pty.take_reader()?;
        let writer = pty.take_writer()?;
        let child = pty.take_child();
        let pid = pty.pid();

        let (input_tx, input_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_CAPACITY);

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: request.project_id,
            cwd: request.cwd,
            command: request.command,
            pid,
            input_tx,
            pty: Arc::new(Mutex::new(pty)),
            state: Arc::new(Mutex::new(SessionState {
                phase: Phase::Created,
                eviction: None,
                terminating: false,
                next_viewer_id: 0,
                next_generation: 0,
            })),
            child_exited: Arc::new(AtomicBool::new(false)),
            cancelled: CancellationToken::new(),
            settings,
            registry,
        };
        let io = SessionIo {
            reader,
            writer,
            child,
            input_rx,
        };
        Ok((session, io))
    }

    /// Start the exit monitor, PTY reader/writer, event pump and the
    /// delayed initial command.
    fn start(&self, io: SessionIo) {
        let SessionIo {
            reader,
            writer,
            child,
            input_rx,
        } = io;

        let (exit_tx, exit_rx) = oneshot::channel::<ExitReport>();
        match child {
            Some(mut child) => {
                let session = self.clone();
                tokio::task::spawn_blocking(move || {
                    let report = match child.wait() {
                        Ok(status) => ExitReport::from(status),
                        Err(e) => {
                            tracing::error!(session = %session.id, ?e, "error waiting for session child");
                            ExitReport {
                                exit_code: 1,
                                signal: None,
                            }
                        }
                    };
                    session.mark_exited();
                    let _ = exit_tx.send(report);
                });
            }
            None => {
                self.mark_exited();
                let _ = exit_tx.send(ExitReport::default());
            }
        }

        let (output_tx, output_rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if output_tx.blocking_send(data).is_err() {
                            break;
                        }
                    }
                    // EIO once the slave side is gone.
                    Err(_) => break,
                }
            }
        });

        tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let mut rx = input_rx;
            while let Some(data) = rx.blocking_recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        tokio::spawn(self.clone().pump(output_rx, exit_rx));

        if !self.command.is_empty() {
            let input_tx = self.input_tx.clone();
            let cancelled = self.cancelled.clone();
            let delay = self.settings.command_delay;
            let line = format!("{}\r", self.command);
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancelled.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let _ = input_tx.send(Bytes::from(line)).await;
                    }
                }
            });
        }
    }

    /// Single consumer of the session's process events: output chunks are
    /// forwarded in arrival order, and the exit notification ends the
    /// session.
    async fn pump(
        self,
        mut output_rx: mpsc::Receiver<Bytes>,
        mut exit_rx: oneshot::Receiver<ExitReport>,
    ) {
        let mut decoder = Utf8Decoder::new();
        let mut output_open = true;
        let report = loop {
            tokio::select! {
                biased;
                chunk = output_rx.recv(), if output_open => match chunk {
                    Some(data) => self.forward(decoder.decode(&data)),
                    None => output_open = false,
                },
                report = &mut exit_rx => break report.unwrap_or(ExitReport {
                    exit_code: 1,
                    signal: None,
                }),
            }
        };

        if output_open {
            let _ = tokio::time::timeout(EXIT_DRAIN_TIMEOUT, async {
                while let Some(data) = output_rx.recv().await {
                    self.forward(decoder.decode(&data));
                }
            })
            .await;
        }
        self.forward(decoder.finish());
        self.handle_exit(report);
    }

    fn forward(&self, text: String) {
        if text.is_empty() {
            return;
        }
        let state = self.state.lock();
        if let Phase::Attached(viewer) = &state.phase {
            let _ = viewer.tx.send(ServerMessage::Stdout { text });
        }
    }

    /// Runs on the exit monitor as soon as the shell is reaped, before any
    /// trailing output is drained. From here on `attach` fails and the id no
    /// longer resolves; the current viewer stays in place to receive `exit`.
    fn mark_exited(&self) {
        {
            let mut state = self.state.lock();
            state.terminating = true;
            if let Some(timer) = state.eviction.take() {
                timer.handle.abort();
            }
        }
        self.remove_from_registry();
        self.child_exited.store(true, Ordering::Release);
    }

    fn handle_exit(&self, report: ExitReport) {
        tracing::info!(
            session = %self.id,
            exit_code = report.exit_code,
            signal = ?report.signal,
            "session shell exited"
        );
        // No-op unless the exit monitor went away without reporting.
        self.remove_from_registry();

        let viewer = {
            let mut state = self.state.lock();
            if let Some(timer) = state.eviction.take() {
                timer.handle.abort();
            }
            match std::mem::replace(&mut state.phase, Phase::Dead) {
                Phase::Attached(viewer) => Some(viewer),
                _ => None,
            }
        };
        if let Some(viewer) = viewer {
            let _ = viewer.tx.send(ServerMessage::Exit {
                exit_code: report.exit_code,
                signal: report.signal,
            });
        }
        self.cancelled.cancel();
    }

    /// Make a new viewer the output target.
    ///
    /// Disarms the eviction timer and queues the `session` message before
    /// any output. A previously attached viewer stops receiving output (its
    /// receiver closes) but is not otherwise touched.
    pub fn attach(&self) -> Result<Attachment, SessionError> {
        let mut state = self.state.lock();
        if state.terminating || matches!(state.phase, Phase::Dead) {
            return Err(SessionError::Dead(self.id.clone()));
        }
        if let Some(timer) = state.eviction.take() {
            timer.handle.abort();
        }

        state.next_viewer_id += 1;
        let viewer_id = state.next_viewer_id;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServerMessage::Session {
            session_id: self.id.clone(),
        });

        let previous = std::mem::replace(&mut state.phase, Phase::Attached(Viewer { id: viewer_id, tx }));
        match previous {
            Phase::Attached(old) => {
                tracing::info!(session = %self.id, viewer = viewer_id, superseded = old.id, "viewer superseded");
            }
            Phase::Detached => {
                tracing::info!(session = %self.id, viewer = viewer_id, "viewer reattached");
            }
            _ => {
                tracing::info!(session = %self.id, viewer = viewer_id, "viewer attached");
            }
        }
        Ok(Attachment { viewer_id, rx })
    }

    /// Called when a viewer connection closes. No-op unless `viewer_id` is
    /// the current viewer; otherwise the session keeps running and the
    /// eviction timer is armed.
    pub fn detach(&self, viewer_id: u64) {
        let mut state = self.state.lock();
        match &state.phase {
            Phase::Attached(viewer) if viewer.id == viewer_id => {}
            _ => return,
        }
        state.phase = Phase::Detached;
        if state.terminating {
            return;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let timeout = self.settings.idle_timeout;
        let session = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            session.evict(generation);
        });
        state.eviction = Some(EvictionTimer {
            generation,
            handle: handle.abort_handle(),
        });
        tracing::info!(
            session = %self.id,
            timeout_ms = timeout.as_millis() as u64,
            "viewer detached, eviction timer armed"
        );
    }

    fn evict(&self, generation: u64) {
        {
            let state = self.state.lock();
            let armed = matches!(&state.eviction, Some(t) if t.generation == generation);
            if !armed || !matches!(state.phase, Phase::Detached) {
                return;
            }
        }
        tracing::info!(session = %self.id, "session idle timeout");
        self.kill();
    }

    /// Terminate the session. Idempotent.
    ///
    /// Removes the session from the registry immediately, then sends SIGHUP
    /// to the shell's process group and SIGKILL if it is still alive after
    /// the grace period. The attached viewer, if any, gets `exit` once the
    /// shell is reaped.
    pub fn kill(&self) {
        {
            let mut state = self.state.lock();
            if state.terminating || matches!(state.phase, Phase::Dead) {
                return;
            }
            state.terminating = true;
            if let Some(timer) = state.eviction.take() {
                timer.handle.abort();
            }
        }
        tracing::info!(session = %self.id, pid = ?self.pid, "killing session");
        self.remove_from_registry();
        self.terminate_child();
    }

    fn terminate_child(&self) {
        let Some(pid) = self.pid else { return };
        if self.child_exited.load(Ordering::Acquire) {
            tracing::debug!(pid, "child already exited, skipping SIGHUP");
            return;
        }
        pty::signal_process_group(pid, libc::SIGHUP);

        let child_exited = Arc::clone(&self.child_exited);
        let grace = self.settings.kill_grace;
        let id = self.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !child_exited.load(Ordering::Acquire) {
                tracing::warn!(session = %id, pid, "shell ignored SIGHUP, sending SIGKILL");
                pty::signal_process_group(pid, libc::SIGKILL);
            }
        });
    }

    /// SIGKILL the shell's process group right away, if it is still alive.
    fn force_kill_child(&self) {
        if let Some(pid) = self.pid {
            if !self.child_exited.load(Ordering::Acquire) {
                pty::signal_process_group(pid, libc::SIGKILL);
            }
        }
    }

    fn remove_from_registry(&self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.id);
        }
    }

    /// Apply one viewer message to the shell.
    pub async fn apply(&self, msg: ClientMessage) -> Result<(), SessionError> {
        match msg {
            ClientMessage::Input { data } => self.write_input(Bytes::from(data)).await,
            ClientMessage::Resize { cols, rows } => {
                let (cols, rows) = ClientMessage::resize_dimensions(cols, rows);
                self.resize(cols, rows)
            }
            ClientMessage::Signal { signal } => match signal.as_deref() {
                Some("SIGINT") => self.interrupt().await,
                other => {
                    tracing::debug!(session = %self.id, signal = ?other, "ignoring unsupported signal");
                    Ok(())
                }
            },
            ClientMessage::Kill => {
                tracing::info!(session = %self.id, "kill requested by viewer");
                self.kill();
                Ok(())
            }
        }
    }

    /// Write bytes to the shell's stdin, in order.
    pub async fn write_input(&self, data: Bytes) -> Result<(), SessionError> {
        self.input_tx
            .send(data)
            .await
            .map_err(|_| SessionError::InputClosed(self.id.clone()))
    }

    /// Emulate Ctrl-C.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        self.write_input(Bytes::from_static(&[INTERRUPT])).await
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.pty.lock().resize(rows, cols)?;
        Ok(())
    }

    /// Current PTY geometry as `(cols, rows)`.
    pub fn size(&self) -> Option<(u16, u16)> {
        self.pty.lock().size().map(|(rows, cols)| (cols, rows))
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Attached(_))
    }

    pub fn is_alive(&self) -> bool {
        let state = self.state.lock();
        !state.terminating && !matches!(state.phase, Phase::Dead)
    }

    pub fn has_eviction_timer(&self) -> bool {
        self.state.lock().eviction.is_some()
    }

    /// Resolves once the shell has exited and the session is destroyed.
    pub async fn closed(&self) {
        self.cancelled.cancelled().await
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            cwd: self.cwd.display().to_string(),
            command: self.command.clone(),
            pid: self.pid,
            attached: self.is_attached(),
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────

struct RegistryInner {
    sessions: RwLock<HashMap<String, Session>>,
    /// Set once shutdown begins; no session is created afterwards.
    closed: AtomicBool,
    settings: Arc<SessionSettings>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl RegistryInner {
    fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let remaining = self.sessions.read().len();
            tracing::info!(session = %id, remaining, "session removed");
            let _ = self.events_tx.send(SessionEvent::Destroyed { id: id.to_string() });
        }
        removed
    }
}

/// Live sessions keyed by id.
///
/// Constructed explicitly and handed to the listener, so each test can own
/// an isolated registry. Cloning shares the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                settings: Arc::new(settings),
                events_tx,
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Spawn a shell for `request` and register it.
    ///
    /// The fork/exec runs on the blocking pool. Fails only if the shell
    /// cannot be started or shutdown has begun.
    pub async fn create(&self, request: LaunchRequest) -> Result<Session, RegistryError> {
        let (session, io) = self.spawn_registered(request).await?;
        session.start(io);
        Ok(session)
    }

    /// Like [`create`](Self::create), with the first viewer attached before
    /// the shell's I/O is wired up. A shell that dies immediately still
    /// reports `session` then `exit` to that viewer.
    pub async fn create_attached(
        &self,
        request: LaunchRequest,
    ) -> Result<(Session, Attachment), RegistryError> {
        let (session, io) = self.spawn_registered(request).await?;
        // Only a concurrent kill (shutdown, HTTP delete) can fail this.
        let attachment = session.attach();
        session.start(io);
        Ok((session, attachment?))
    }

    async fn spawn_registered(
        &self,
        request: LaunchRequest,
    ) -> Result<(Session, SessionIo), RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::ShuttingDown);
        }
        let settings = Arc::clone(&self.inner.settings);
        let registry = Arc::downgrade(&self.inner);
        let (session, io) =
            tokio::task::spawn_blocking(move || Session::spawn(request, settings, registry))
                .await??;

        let registered = {
            let mut sessions = self.inner.sessions.write();
            if self.inner.closed.load(Ordering::Acquire) {
                false
            } else {
                sessions.insert(session.id.clone(), session.clone());
                true
            }
        };

        if !registered {
            // Started anyway so the child is reaped.
            session.start(io);
            session.kill();
            return Err(RegistryError::ShuttingDown);
        }

        tracing::info!(
            session = %session.id,
            project = %session.project_id,
            pid = ?session.pid,
            cwd = %session.cwd.display(),
            active = self.len(),
            "session created"
        );
        let _ = self.inner.events_tx.send(SessionEvent::Created {
            id: session.id.clone(),
            project_id: session.project_id.clone(),
        });
        Ok((session, io))
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.sessions.read().get(id).cloned()
    }

    /// Idempotent; returns the session if it was still registered.
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.inner.remove(id)
    }

    /// Kill every live session.
    pub fn kill_all(&self) {
        let sessions: Vec<Session> = self.inner.sessions.read().values().cloned().collect();
        for session in sessions {
            session.kill();
        }
    }

    /// Refuse all further `create` calls.
    pub fn close(&self) {
        let _sessions = self.inner.sessions.write();
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the registry, kill every session and wait for the shells to
    /// exit. Shells still alive after the kill grace period are SIGKILLed.
    pub async fn shutdown(&self) {
        self.close();
        let sessions: Vec<Session> = self.inner.sessions.read().values().cloned().collect();
        if sessions.is_empty() {
            return;
        }
        tracing::info!(count = sessions.len(), "killing all sessions");
        for session in &sessions {
            session.kill();
        }
        let all_closed = async {
            for session in &sessions {
                session.closed().await;
            }
        };
        if tokio::time::timeout(self.inner.settings.kill_grace, all_closed)
            .await
            .is_err()
        {
            tracing::warn!("sessions still alive after kill grace, sending SIGKILL");
            for session in &sessions {
                session.force_kill_child();
            }
        }
    }

    /// Snapshot of live sessions, ordered by project then id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .values()
            .map(Session::info)
            .collect();
        infos.sort_by(|a, b| a.project_id.cmp(&b.project_id).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }
}
