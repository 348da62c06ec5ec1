//! Tool server supervision.
//!
//! The supervisor owns a pool of transports, one per tool-server
//! subprocess. Servers are supervised independently: a crash or slow
//! response on one never blocks invocations against another.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use agentforge_protocols::{ArgumentSchema, CapabilityDescriptor, Method, RpcError};

use crate::config::{ServerSpec, SupervisorConfig};
use crate::transport::{StdioTransport, TransportError, TransportStatus};

/// Lifecycle state of one supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Process launched, capability discovery not yet complete.
    Starting,
    /// Discovery succeeded; accepting invocations.
    Ready,
    /// Health check failed or protocol violations observed; invocations
    /// rejected, process not yet torn down.
    Unhealthy,
    /// Process terminated (deliberately or by crash). Terminal until a
    /// caller-triggered restart.
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Unhealthy => "unhealthy",
            ServerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Supervisor errors. Every failure category stays distinguishable so a
/// caller can decide to retry, fall back, or abort.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server already registered: {0}")]
    AlreadyRegistered(String),

    #[error("server already running: {0}")]
    AlreadyRunning(String),

    #[error("failed to launch {id}: {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("capability discovery failed for {id}: {reason}")]
    DiscoveryFailed { id: String, reason: String },

    #[error("server {id} unavailable (state: {state})")]
    ServerUnavailable { id: String, state: ServerState },

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("capability reported an error: {0}")]
    Execution(RpcError),

    #[error("restart of {id} failed after {attempts} attempts: {reason}")]
    RestartFailed {
        id: String,
        attempts: u32,
        reason: String,
    },
}

fn map_transport(err: TransportError) -> SupervisorError {
    match err {
        TransportError::Timeout(d) => SupervisorError::Timeout(d),
        TransportError::ConnectionLost | TransportError::Io(_) => SupervisorError::ConnectionLost,
        TransportError::Json(e) => SupervisorError::Protocol(e.to_string()),
        TransportError::Process(e) => SupervisorError::Protocol(e),
    }
}

/// One discovered capability plus its compiled argument schema.
pub struct CapabilityEntry {
    pub descriptor: CapabilityDescriptor,
    /// Compiled once at discovery; `None` when the advertised schema did not
    /// compile (such capabilities skip local validation).
    pub schema: Option<Arc<ArgumentSchema>>,
}

/// Capability set discovered from one server, read-only after discovery.
pub struct CapabilitySet {
    /// Bumped on every (re)start; bound callables from an older generation
    /// are stale.
    pub generation: u64,
    pub entries: Vec<CapabilityEntry>,
}

impl CapabilitySet {
    fn empty() -> Self {
        Self {
            generation: 0,
            entries: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }
}

struct ServerEntry {
    spec: ServerSpec,
    state: RwLock<ServerState>,
    transport: RwLock<Option<Arc<StdioTransport>>>,
    capabilities: RwLock<Arc<CapabilitySet>>,
    limiter: RwLock<Arc<Semaphore>>,
    generation: AtomicU64,
    monitor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Manages the lifecycle of a pool of tool-server subprocesses.
pub struct ServerSupervisor {
    config: SupervisorConfig,
    servers: DashMap<String, Arc<ServerEntry>>,
}

impl ServerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            servers: DashMap::new(),
        }
    }

    /// Register a server spec without starting it.
    pub fn register(&self, spec: ServerSpec) -> Result<(), SupervisorError> {
        if self.servers.contains_key(&spec.id) {
            return Err(SupervisorError::AlreadyRegistered(spec.id));
        }
        let id = spec.id.clone();
        self.servers.insert(
            id.clone(),
            Arc::new(ServerEntry {
                spec,
                state: RwLock::new(ServerState::Stopped),
                transport: RwLock::new(None),
                capabilities: RwLock::new(Arc::new(CapabilitySet::empty())),
                limiter: RwLock::new(Arc::new(Semaphore::new(1))),
                generation: AtomicU64::new(0),
                monitor: Mutex::new(None),
            }),
        );
        info!("Registered server: {}", id);
        Ok(())
    }

    /// Start a server and discover its capabilities.
    pub async fn start(&self, id: &str) -> Result<Vec<CapabilityDescriptor>, SupervisorError> {
        let entry = self.entry(id)?;
        {
            // Check and claim in one critical section so two concurrent
            // starts cannot both launch a process.
            let mut state = entry.state.write();
            if matches!(*state, ServerState::Starting | ServerState::Ready) {
                return Err(SupervisorError::AlreadyRunning(id.to_string()));
            }
            *state = ServerState::Starting;
        }
        self.start_entry(&entry).await
    }

    /// Start every registered server. A failure on one server is logged and
    /// reported, never fatal to the others.
    pub async fn start_all(
        &self,
    ) -> HashMap<String, Result<Vec<CapabilityDescriptor>, SupervisorError>> {
        let ids: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        let mut results = HashMap::new();
        for id in ids {
            let result = self.start(&id).await;
            if let Err(e) = &result {
                error!("Failed to start {}: {}", id, e);
            }
            results.insert(id, result);
        }
        results
    }

    async fn start_entry(
        &self,
        entry: &Arc<ServerEntry>,
    ) -> Result<Vec<CapabilityDescriptor>, SupervisorError> {
        let id = entry.spec.id.clone();
        *entry.state.write() = ServerState::Starting;

        let transport = match StdioTransport::spawn(&entry.spec).await {
            Ok(t) => Arc::new(t),
            Err(e) => {
                *entry.state.write() = ServerState::Stopped;
                return Err(SupervisorError::SpawnFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        };
        *entry.transport.write() = Some(transport.clone());

        // Discovery round trip: a fixed request asking the process to
        // enumerate its capabilities.
        let response = match transport
            .request(
                Method::ListCapabilities.as_str(),
                None,
                self.config.discovery_timeout,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                *entry.state.write() = ServerState::Unhealthy;
                return Err(SupervisorError::DiscoveryFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        };
        if let Some(err) = response.error {
            *entry.state.write() = ServerState::Unhealthy;
            return Err(SupervisorError::DiscoveryFailed {
                id,
                reason: err.to_string(),
            });
        }

        let descriptors: Vec<CapabilityDescriptor> =
            match serde_json::from_value(response.result.unwrap_or(Value::Null)) {
                Ok(d) => d,
                Err(e) => {
                    *entry.state.write() = ServerState::Unhealthy;
                    return Err(SupervisorError::DiscoveryFailed {
                        id,
                        reason: format!("malformed capability list: {}", e),
                    });
                }
            };

        let entries: Vec<CapabilityEntry> = descriptors
            .iter()
            .map(|descriptor| {
                let schema = match ArgumentSchema::compile(&descriptor.parameters) {
                    Ok(s) => Some(Arc::new(s)),
                    Err(e) => {
                        warn!(
                            "Schema for {}/{} did not compile, skipping validation: {}",
                            id, descriptor.name, e
                        );
                        None
                    }
                };
                CapabilityEntry {
                    descriptor: descriptor.clone(),
                    schema,
                }
            })
            .collect();

        let generation = entry.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *entry.capabilities.write() = Arc::new(CapabilitySet {
            generation,
            entries,
        });

        let permits = entry
            .spec
            .max_in_flight
            .unwrap_or(self.config.max_in_flight)
            .max(1);
        *entry.limiter.write() = Arc::new(Semaphore::new(permits));

        *entry.state.write() = ServerState::Ready;
        self.spawn_monitor(entry.clone(), transport);

        info!(
            "Started {} (generation {}): capabilities={:?}",
            id,
            generation,
            descriptors.iter().map(|d| &d.name).collect::<Vec<_>>()
        );
        Ok(descriptors)
    }

    /// Watch the transport independently of any in-flight call so a crash
    /// is observed even while the server is idle.
    fn spawn_monitor(&self, entry: Arc<ServerEntry>, transport: Arc<StdioTransport>) {
        let mut status = transport.watch_status();
        let task_entry = Arc::clone(&entry);
        let handle = tokio::spawn(async move {
            let entry = task_entry;
            let id = entry.spec.id.clone();
            loop {
                if status.changed().await.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match current {
                    TransportStatus::Unhealthy => {
                        warn!("Server {} violated the protocol repeatedly, marking unhealthy", id);
                        let mut state = entry.state.write();
                        if *state == ServerState::Ready {
                            *state = ServerState::Unhealthy;
                        }
                    }
                    TransportStatus::Closed => {
                        info!("Server {} process exited", id);
                        *entry.state.write() = ServerState::Stopped;
                        break;
                    }
                    TransportStatus::Open => {}
                }
            }
        });

        let mut slot = entry.monitor.lock();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Invoke a capability on a server within `deadline`.
    ///
    /// Fails fast with `ServerUnavailable` on a non-Ready server, before any
    /// I/O. A timeout leaves the server Ready; the subprocess is not assumed
    /// dead.
    pub async fn invoke(
        &self,
        id: &str,
        capability: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, SupervisorError> {
        let entry = self.entry(id)?;

        let state = *entry.state.read();
        if state != ServerState::Ready {
            return Err(SupervisorError::ServerUnavailable {
                id: id.to_string(),
                state,
            });
        }
        let transport = entry.transport.read().clone().ok_or_else(|| {
            SupervisorError::ServerUnavailable {
                id: id.to_string(),
                state: ServerState::Stopped,
            }
        })?;
        let limiter = entry.limiter.read().clone();

        let started = Instant::now();
        let permit = tokio::time::timeout(deadline, limiter.acquire_owned())
            .await
            .map_err(|_| SupervisorError::Timeout(deadline))?
            .map_err(|_| SupervisorError::ConnectionLost)?;
        let remaining = deadline.saturating_sub(started.elapsed());

        debug!("Invoking {}/{}", id, capability);
        let params = json!({"name": capability, "arguments": arguments});
        let call = transport
            .send(Method::Invoke.as_str(), Some(params))
            .await
            .map_err(map_transport)?;
        let response = call.wait(remaining).await.map_err(map_transport)?;
        drop(permit);

        if let Some(err) = response.error {
            return Err(SupervisorError::Execution(err));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Discovered capabilities of one Ready server.
    pub fn list_capabilities(
        &self,
        id: &str,
    ) -> Result<Vec<CapabilityDescriptor>, SupervisorError> {
        let entry = self.entry(id)?;
        let state = *entry.state.read();
        if state != ServerState::Ready {
            return Err(SupervisorError::ServerUnavailable {
                id: id.to_string(),
                state,
            });
        }
        Ok(entry.capabilities.read().descriptors())
    }

    /// Capability sets of every Ready server, for the bridge to resolve
    /// against. Non-Ready servers are not offered.
    pub fn capability_sets(&self) -> Vec<(String, Arc<CapabilitySet>)> {
        self.servers
            .iter()
            .filter(|e| *e.value().state.read() == ServerState::Ready)
            .map(|e| (e.key().clone(), e.value().capabilities.read().clone()))
            .collect()
    }

    /// Ping a server. Returns false (and marks the server Unhealthy) when
    /// the round trip fails; non-Ready servers are false without I/O.
    pub async fn health_check(&self, id: &str) -> bool {
        let Ok(entry) = self.entry(id) else {
            return false;
        };
        if *entry.state.read() != ServerState::Ready {
            return false;
        }
        let Some(transport) = entry.transport.read().clone() else {
            return false;
        };

        match transport
            .request(Method::Ping.as_str(), None, self.config.health_timeout)
            .await
        {
            Ok(response) if !response.is_error() => true,
            outcome => {
                warn!("Health check failed for {}: {:?}", id, outcome.err());
                let mut state = entry.state.write();
                if *state == ServerState::Ready {
                    *state = ServerState::Unhealthy;
                }
                false
            }
        }
    }

    /// Caller-triggered restart with bounded retry and increasing backoff.
    ///
    /// Restart is never automatic: it changes the advertised capability set,
    /// so it must be observable by the caller.
    pub async fn restart(&self, id: &str) -> Result<Vec<CapabilityDescriptor>, SupervisorError> {
        let entry = self.entry(id)?;
        info!("Restarting server {}", id);
        self.shutdown_entry(&entry).await;

        let mut last_error = None;
        for attempt in 0..self.config.restart_attempts {
            if attempt > 0 {
                let backoff = self.config.restart_backoff * 2u32.pow(attempt - 1);
                debug!("Restart backoff for {}: {:?}", id, backoff);
                tokio::time::sleep(backoff).await;
            }
            match self.start_entry(&entry).await {
                Ok(descriptors) => return Ok(descriptors),
                Err(e) => {
                    warn!("Restart attempt {} for {} failed: {}", attempt + 1, id, e);
                    self.shutdown_entry(&entry).await;
                    last_error = Some(e);
                }
            }
        }

        Err(SupervisorError::RestartFailed {
            id: id.to_string(),
            attempts: self.config.restart_attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    /// Stop a server, failing its outstanding invocations with
    /// `ConnectionLost`. Safe to call on an already-stopped server.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let entry = self.entry(id)?;
        self.shutdown_entry(&entry).await;
        info!("Stopped {}", id);
        Ok(())
    }

    /// Stop every server. Idempotent.
    pub async fn stop_all(&self) {
        let entries: Vec<Arc<ServerEntry>> =
            self.servers.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            self.shutdown_entry(&entry).await;
        }
        info!("All servers stopped");
    }

    async fn shutdown_entry(&self, entry: &Arc<ServerEntry>) {
        if let Some(monitor) = entry.monitor.lock().take() {
            monitor.abort();
        }
        let transport = entry.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        *entry.state.write() = ServerState::Stopped;
    }

    pub fn state(&self, id: &str) -> Option<ServerState> {
        self.servers.get(id).map(|e| *e.value().state.read())
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.state(id) == Some(ServerState::Ready)
    }

    /// Capability-set generation of a server; bumps on every (re)start.
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.servers
            .get(id)
            .map(|e| e.value().generation.load(Ordering::SeqCst))
    }

    /// All registered servers and their states.
    pub fn list_servers(&self) -> Vec<(String, ServerState)> {
        self.servers
            .iter()
            .map(|e| (e.key().clone(), *e.value().state.read()))
            .collect()
    }

    fn entry(&self, id: &str) -> Result<Arc<ServerEntry>, SupervisorError> {
        self.servers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))
    }
}

impl Default for ServerSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
