//! Session lifecycle: one external server process end to end.
//!
//! A session owns the child process, the transport tasks, the pending
//! request map, and the negotiated capability snapshot. It is constructed
//! in `Initializing` state; [`Session::initialize`] drives the handshake
//! and readiness probe to `Ready`. Once `Stopped` a session is never
//! reused.

use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

use crate::capabilities::{CapabilitySet, Feature};
use crate::error::LspError;
use crate::protocol;
use crate::rpc::{self, NotificationRouter, PendingMap, Rpc, WriterCommand};
use crate::transport::{FrameReader, FrameWriter};
use crate::types::{ClientConfig, SessionEvent, StopReason};

const WRITER_CHANNEL_CAPACITY: usize = 64;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait between readiness probe attempts when the server
/// rejects the probe outright.
const PROBE_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is wired; the handshake has not completed.
    Initializing,
    /// Handshake done; operations may be sent.
    Ready,
    /// `stop` is in progress.
    ShuttingDown,
    /// The process exited or was stopped. Terminal.
    Stopped,
}

pub(crate) struct Session {
    rpc: Rpc,
    state: Arc<StdMutex<SessionState>>,
    /// Snapshot taken once when the initialize response arrives.
    capabilities: OnceLock<CapabilitySet>,
    child: Mutex<Option<Child>>,
    request_timeout: Duration,
    readiness_timeout: Duration,
    root_uri: url::Url,
}

impl Session {
    /// Spawn the configured executable and wire a session over its
    /// standard streams. The returned session is `Initializing`.
    /// Must be called from within a tokio runtime; the transport tasks
    /// are spawned here.
    pub fn spawn(
        config: &ClientConfig,
        workspace_root: &Path,
        router: NotificationRouter,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, LspError> {
        let resolved = which::which(&config.command).map_err(|e| LspError::Startup {
            message: format!("{} not found in PATH: {e}", config.command),
        })?;

        tracing::info!(command = %resolved.display(), "spawning language server");
        let mut child = Command::new(&resolved)
            .args(&config.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LspError::Startup {
                message: format!("spawning {}: {e}", config.command),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| LspError::Startup {
            message: "child has no stdout".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| LspError::Startup {
            message: "child has no stdin".to_string(),
        })?;

        // Stderr is log-only; drain it so the child never blocks on a
        // full pipe.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(%line, "server stderr");
                }
            });
        }

        Self::wire(
            stdout,
            stdin,
            config,
            workspace_root,
            router,
            event_tx,
            Some(child),
        )
    }

    /// Wire a session over arbitrary async streams (in-memory pipes in
    /// tests, or a non-stdio transport). The returned session is
    /// `Initializing`.
    pub fn connect<R, W>(
        reader: R,
        writer: W,
        config: &ClientConfig,
        workspace_root: &Path,
        router: NotificationRouter,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::wire(reader, writer, config, workspace_root, router, event_tx, None)
    }

    fn wire<R, W>(
        reader: R,
        writer: W,
        config: &ClientConfig,
        workspace_root: &Path,
        router: NotificationRouter,
        event_tx: mpsc::Sender<SessionEvent>,
        child: Option<Child>,
    ) -> Result<Self, LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let root_uri = protocol::path_to_file_uri(workspace_root)
            .map_err(|e| LspError::Startup { message: e.to_string() })?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut frames = FrameWriter::new(writer);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = frames.write_frame(&frame).await {
                            tracing::warn!(error = %e, "transport write failed");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let pending = PendingMap::default();
        let closed = Arc::new(AtomicBool::new(false));
        let state = Arc::new(StdMutex::new(SessionState::Initializing));

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader_state = state.clone();
        let reader_writer_tx = writer_tx.clone();
        tokio::spawn(async move {
            let mut frames = FrameReader::new(reader);
            let reason = loop {
                match frames.read_frame().await {
                    Ok(Some(frame)) => {
                        rpc::dispatch_frame(&frame, &reader_pending, &router, &reader_writer_tx)
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!("server closed its stream");
                        break StopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport read failed");
                        break StopReason::Failed(e.to_string());
                    }
                }
            };
            rpc::close_transport(&reader_pending, &reader_closed).await;
            *reader_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = SessionState::Stopped;
            if event_tx
                .try_send(SessionEvent::Stopped { reason })
                .is_err()
            {
                tracing::trace!("dropping stop event, consumer is gone or behind");
            }
        });

        Ok(Self {
            rpc: Rpc::new(writer_tx, pending, closed),
            state,
            capabilities: OnceLock::new(),
            child: Mutex::new(child),
            request_timeout: config.request_timeout(),
            readiness_timeout: config.readiness_timeout(),
            root_uri,
        })
    }

    /// Perform the handshake, then the best-effort readiness probe.
    ///
    /// Handshake failure is fatal and leaves the session unusable; the
    /// probe timing out is logged and ignored.
    pub async fn initialize(&self) -> Result<(), LspError> {
        let params = protocol::initialize_params(self.root_uri.as_str());
        let result = self
            .rpc
            .request("initialize", Some(params), self.request_timeout)
            .await
            .map_err(|e| LspError::Startup {
                message: format!("initialize request failed: {e}"),
            })?;

        let _ = self.capabilities.set(CapabilitySet::from_initialize(&result));

        self.rpc
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| LspError::Startup {
                message: format!("initialized notification failed: {e}"),
            })?;

        self.probe_readiness().await;
        self.mark_ready();
        Ok(())
    }

    /// Absorb the server's own project-loading latency by polling an
    /// innocuous workspace-symbol query until it answers. A protocol
    /// signal for "project loaded" does not exist; this is a warm-up,
    /// not a correctness gate.
    async fn probe_readiness(&self) {
        let deadline = tokio::time::Instant::now() + self.readiness_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::warn!("readiness probe exhausted its budget, continuing anyway");
                return;
            }
            match self
                .rpc
                .request(
                    "workspace/symbol",
                    Some(serde_json::json!({ "query": "" })),
                    remaining,
                )
                .await
            {
                Ok(_) => {
                    tracing::debug!("server answered the readiness probe");
                    return;
                }
                Err(LspError::Timeout { .. }) => {
                    tracing::warn!("readiness probe timed out, continuing anyway");
                    return;
                }
                Err(LspError::TransportClosed) => {
                    tracing::warn!("transport closed during readiness probe");
                    return;
                }
                Err(e) => {
                    tracing::trace!(error = %e, "readiness probe rejected, retrying");
                    tokio::time::sleep(PROBE_RETRY_INTERVAL).await;
                }
            }
        }
    }

    fn mark_ready(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // The process may have died during the probe; Stopped is terminal.
        if *state == SessionState::Initializing {
            *state = SessionState::Ready;
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate for operations: `NotReady` while initializing, closed once
    /// stopping or stopped.
    pub fn require_ready(&self) -> Result<(), LspError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Initializing => Err(LspError::NotReady),
            SessionState::ShuttingDown | SessionState::Stopped => Err(LspError::TransportClosed),
        }
    }

    /// Whether the server advertised `feature`. False when the handshake
    /// never completed; a pure snapshot lookup afterwards.
    pub fn supports(&self, feature: Feature) -> bool {
        self.capabilities
            .get()
            .is_some_and(|set| set.supports(feature))
    }

    /// One correlated request, gated on readiness.
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, LspError> {
        self.require_ready()?;
        self.rpc.request(method, params, self.request_timeout).await
    }

    pub(crate) fn rpc(&self) -> &Rpc {
        &self.rpc
    }

    /// Graceful stop: `shutdown` request, `exit` notification, then kill
    /// the process if it lingers. Idempotent, and safe to call while
    /// operations are in flight; they fail when the transport closes.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(
                *state,
                SessionState::ShuttingDown | SessionState::Stopped
            ) {
                return;
            }
            *state = SessionState::ShuttingDown;
        }

        if !self.rpc.is_closed() {
            // Tolerate failures of either: the process may already be dead.
            if self.rpc.request("shutdown", None, SHUTDOWN_TIMEOUT).await.is_ok() {
                let _ = self.rpc.notify("exit", None).await;
            }
        }
        self.rpc.shutdown_writer().await;

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!("server did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Stopped;
        tracing::info!("session stopped");
    }
}
