//! Message transport over one subprocess's standard streams.
//!
//! One line is one JSON-RPC message. Requests carry a transport-assigned
//! numeric id; a background reader task matches each incoming response to
//! the outstanding request with the same id, so responses may arrive in any
//! order and multiple requests may be in flight concurrently.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use agentforge_protocols::{RequestId, RpcRequest, RpcResponse};

use crate::config::ServerSpec;

/// Consecutive malformed messages tolerated before the transport reports
/// itself unhealthy to its owner.
const VIOLATION_THRESHOLD: u32 = 3;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Transport health as observed by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Streams open, messages flowing.
    Open,
    /// Repeated protocol violations observed; still connected.
    Unhealthy,
    /// Stream closed (process exited or transport closed).
    Closed,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// One outstanding request.
///
/// Dropping it abandons the slot; [`PendingCall::wait`] reclaims the slot on
/// deadline so a response that never arrives cannot leak memory.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<RpcResponse>,
    pending: PendingMap,
}

impl PendingCall {
    /// The request id this call is waiting on.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Await the matching response within `deadline`.
    ///
    /// On timeout the pending slot is removed; a response arriving later is
    /// dropped by the reader as unmatched.
    pub async fn wait(mut self, deadline: Duration) -> Result<RpcResponse, TransportError> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => {
                self.pending.lock().remove(&self.id);
                Err(TransportError::Timeout(deadline))
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Stdio transport for one tool-server subprocess.
pub struct StdioTransport {
    label: String,
    writer: tokio::sync::Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    next_id: AtomicU64,
    status_tx: Arc<watch::Sender<TransportStatus>>,
    status_rx: watch::Receiver<TransportStatus>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    /// Launch the subprocess described by `spec` and take ownership of its
    /// standard streams. The process's stderr is forwarded to tracing.
    pub async fn spawn(spec: &ServerSpec) -> Result<Self, TransportError> {
        info!("Starting tool server [{}]: {} {:?}", spec.id, spec.command, spec.args);

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let label = spec.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", label, line);
                }
            });
        }

        Ok(Self::build(spec.id.clone(), stdout, stdin, Some(child)))
    }

    /// Build a transport over arbitrary byte streams.
    ///
    /// Used by in-process test doubles; the subprocess variant goes through
    /// [`StdioTransport::spawn`].
    pub fn from_streams<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(label.into(), reader, writer, None)
    }

    fn build<R, W>(label: String, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (status_tx, status_rx) = watch::channel(TransportStatus::Open);
        let status_tx = Arc::new(status_tx);

        let reader_task = {
            let pending = pending.clone();
            let status_tx = status_tx.clone();
            let label = label.clone();
            tokio::spawn(async move {
                Self::read_loop(label, reader, pending, status_tx).await;
            })
        };

        Self {
            label,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            status_tx,
            status_rx,
            reader_task,
        }
    }

    /// Reader task: match responses to pending requests by id.
    async fn read_loop<R>(
        label: String,
        reader: R,
        pending: PendingMap,
        status_tx: Arc<watch::Sender<TransportStatus>>,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut violations: u32 = 0;
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("[{}] read error: {}", label, e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<RpcResponse>(line) {
                Ok(response) => {
                    violations = 0;
                    let id = match &response.id {
                        Some(RequestId::Number(n)) => *n,
                        other => {
                            warn!("[{}] dropping response with unusable id {:?}", label, other);
                            continue;
                        }
                    };
                    let slot = pending.lock().remove(&id);
                    match slot {
                        Some(tx) => {
                            // Receiver may have timed out between removal and
                            // here; the send result is deliberately ignored.
                            let _ = tx.send(response);
                        }
                        None => {
                            debug!("[{}] dropping unmatched response id {}", label, id);
                        }
                    }
                }
                Err(e) => {
                    violations += 1;
                    warn!(
                        "[{}] protocol violation ({}/{}): {} in line: {}",
                        label,
                        violations,
                        VIOLATION_THRESHOLD,
                        e,
                        &line[..line.len().min(200)]
                    );
                    if violations >= VIOLATION_THRESHOLD {
                        let _ = status_tx.send(TransportStatus::Unhealthy);
                    }
                }
            }
        }

        // Stream closed: every outstanding request resolves to ConnectionLost
        // by dropping its sender.
        let outstanding = {
            let mut map = pending.lock();
            let n = map.len();
            map.clear();
            n
        };
        if outstanding > 0 {
            info!("[{}] stream closed with {} outstanding requests", label, outstanding);
        }
        let _ = status_tx.send(TransportStatus::Closed);
    }

    /// Send a request; returns a token to await the matching response.
    ///
    /// Ids are unique among outstanding requests (monotonic counter), so a
    /// late response can never be delivered to a newer call.
    pub async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<PendingCall, TransportError> {
        if self.status() == TransportStatus::Closed {
            return Err(TransportError::ConnectionLost);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = RpcRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let line = serde_json::to_string(&request)?;
        debug!("[{}] send: {} (id={})", self.label, method, id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let write_result = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                    Ok::<(), std::io::Error>(())
                }
                .await,
                None => {
                    self.pending.lock().remove(&id);
                    return Err(TransportError::ConnectionLost);
                }
            }
        };

        if let Err(e) = write_result {
            self.pending.lock().remove(&id);
            // A broken pipe means the process went away.
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Err(TransportError::ConnectionLost);
            }
            return Err(TransportError::Io(e));
        }

        Ok(PendingCall {
            id,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Send a request and await its response within `deadline`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> Result<RpcResponse, TransportError> {
        self.send(method, params).await?.wait(deadline).await
    }

    /// Current health as seen by the reader task.
    pub fn status(&self) -> TransportStatus {
        *self.status_rx.borrow()
    }

    /// Watch for status transitions (Open -> Unhealthy -> Closed).
    pub fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.status_rx.clone()
    }

    pub fn is_open(&self) -> bool {
        self.status() == TransportStatus::Open
    }

    /// Number of requests currently awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }

    /// Close the transport and terminate the subprocess, failing every
    /// outstanding request with `ConnectionLost`. Idempotent.
    pub async fn close(&self) {
        *self.writer.lock().await = None;

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("[{}] kill failed (already exited?): {}", self.label, e);
            }
        }

        self.pending.lock().clear();
        let _ = self.status_tx.send(TransportStatus::Closed);
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
