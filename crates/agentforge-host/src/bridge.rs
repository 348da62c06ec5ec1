//! Capability bridge: the single gate between a reasoning loop and the
//! capabilities it may call.
//!
//! Arguments are validated against the discovered schema before any message
//! is sent, so a malformed call costs zero server round trips. Host-side
//! capabilities register here too and are invoked through the same path as
//! subprocess-backed ones.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use agentforge_protocols::{ArgumentSchema, CapabilityDescriptor, RpcError};

use crate::supervisor::{ServerSupervisor, SupervisorError};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Why a capability could not be reached. Carried inside
/// [`BridgeError::ToolUnavailable`] so callers can pick a recovery strategy
/// without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The per-call deadline elapsed; the server may still be healthy.
    Timeout,
    /// The server process went away mid-call.
    ConnectionLost,
    /// The server was not in a state that accepts invocations.
    ServerUnavailable,
    /// The server answered with something that was not the protocol.
    Protocol,
}

/// Bridge errors, one variant per caller-visible failure category.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no such capability: {0}")]
    NotFound(String),

    #[error("invalid arguments for {name}: {}", issues.join("; "))]
    InvalidArguments { name: String, issues: Vec<String> },

    #[error("capability {name} failed: {error}")]
    ToolExecutionError { name: String, error: RpcError },

    #[error("capability {name} unavailable ({reason:?})")]
    ToolUnavailable {
        name: String,
        reason: UnavailableReason,
    },

    #[error("binding for {0} is stale, resolve it again")]
    StaleBinding(String),

    #[error("capability {name} failed: {reason}")]
    LocalExecution { name: String, reason: String },
}

/// A capability implemented in the host process rather than behind a
/// subprocess. Invoked through the bridge exactly like a remote one,
/// including argument validation against its descriptor's schema.
#[async_trait]
pub trait LocalCapability: Send + Sync {
    fn descriptor(&self) -> CapabilityDescriptor;

    async fn invoke(&self, arguments: Value) -> Result<Value, BridgeError>;
}

struct LocalEntry {
    descriptor: CapabilityDescriptor,
    schema: Option<Arc<ArgumentSchema>>,
    capability: Arc<dyn LocalCapability>,
}

enum Target {
    Server { id: String, generation: u64 },
    Local(Arc<dyn LocalCapability>),
}

/// A resolved capability, pinned to the server generation it was resolved
/// against. Invoking a binding after its server restarted fails with
/// [`BridgeError::StaleBinding`] instead of silently calling a capability
/// whose contract may have changed.
pub struct BoundCapability {
    descriptor: CapabilityDescriptor,
    schema: Option<Arc<ArgumentSchema>>,
    target: Target,
    supervisor: Arc<ServerSupervisor>,
    deadline: Duration,
}

impl std::fmt::Debug for BoundCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCapability")
            .field("descriptor", &self.descriptor)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl BoundCapability {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    /// Where this binding dispatches: `local` or `server:<id>`.
    pub fn origin(&self) -> String {
        match &self.target {
            Target::Local(_) => "local".to_string(),
            Target::Server { id, .. } => format!("server:{}", id),
        }
    }

    pub async fn invoke(&self, arguments: Value) -> Result<Value, BridgeError> {
        self.invoke_within(arguments, self.deadline).await
    }

    /// Invoke with an explicit per-call deadline.
    pub async fn invoke_within(
        &self,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, BridgeError> {
        let name = self.descriptor.name.clone();

        // Validation happens before any dispatch, local or remote.
        if let Some(schema) = &self.schema {
            if let Err(issues) = schema.check(&arguments) {
                debug!("Rejected arguments for {}: {:?}", name, issues);
                return Err(BridgeError::InvalidArguments { name, issues });
            }
        }

        match &self.target {
            Target::Local(capability) => capability.invoke(arguments).await,
            Target::Server { id, generation } => {
                if self.supervisor.generation(id) != Some(*generation) {
                    return Err(BridgeError::StaleBinding(name));
                }
                match self.supervisor.invoke(id, &name, arguments, deadline).await {
                    Ok(value) => Ok(value),
                    Err(SupervisorError::Execution(error)) => {
                        Err(BridgeError::ToolExecutionError { name, error })
                    }
                    Err(SupervisorError::Timeout(_)) => Err(BridgeError::ToolUnavailable {
                        name,
                        reason: UnavailableReason::Timeout,
                    }),
                    Err(SupervisorError::ConnectionLost) => Err(BridgeError::ToolUnavailable {
                        name,
                        reason: UnavailableReason::ConnectionLost,
                    }),
                    Err(SupervisorError::Protocol(detail)) => {
                        warn!("Protocol fault invoking {}: {}", name, detail);
                        Err(BridgeError::ToolUnavailable {
                            name,
                            reason: UnavailableReason::Protocol,
                        })
                    }
                    Err(other) => {
                        debug!("Server fault invoking {}: {}", name, other);
                        Err(BridgeError::ToolUnavailable {
                            name,
                            reason: UnavailableReason::ServerUnavailable,
                        })
                    }
                }
            }
        }
    }
}

/// One name in the unified capability namespace and where it dispatches.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEntry {
    pub name: String,
    pub origin: String,
    /// Origins whose same-named capability is hidden by this one.
    pub shadowed: Vec<String>,
}

/// Snapshot of the unified namespace: every resolvable name, its winning
/// origin, and any origins it shadows.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub capabilities: Vec<ResolvedEntry>,
}

/// Validating dispatch layer over local capabilities and every Ready server.
pub struct CapabilityBridge {
    supervisor: Arc<ServerSupervisor>,
    locals: RwLock<Vec<Arc<LocalEntry>>>,
    deadline: Duration,
}

impl CapabilityBridge {
    pub fn new(supervisor: Arc<ServerSupervisor>) -> Self {
        Self {
            supervisor,
            locals: RwLock::new(Vec::new()),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Register a host-side capability. Replaces an earlier local capability
    /// with the same name; shadows server capabilities with the same name.
    pub fn register_local(&self, capability: Arc<dyn LocalCapability>) {
        let descriptor = capability.descriptor();
        let schema = match ArgumentSchema::compile(&descriptor.parameters) {
            Ok(s) => Some(Arc::new(s)),
            Err(e) => {
                warn!(
                    "Schema for local capability {} did not compile, skipping validation: {}",
                    descriptor.name, e
                );
                None
            }
        };
        let entry = Arc::new(LocalEntry {
            descriptor,
            schema,
            capability,
        });

        let mut locals = self.locals.write();
        locals.retain(|e| e.descriptor.name != entry.descriptor.name);
        locals.push(entry);
    }

    /// Resolve a name to an invokable binding.
    ///
    /// Local capabilities win over server ones; among servers, the
    /// lexicographically first Ready server id wins, so resolution is
    /// deterministic across calls.
    pub fn resolve(&self, name: &str) -> Result<BoundCapability, BridgeError> {
        if let Some(entry) = self
            .locals
            .read()
            .iter()
            .find(|e| e.descriptor.name == name)
        {
            return Ok(BoundCapability {
                descriptor: entry.descriptor.clone(),
                schema: entry.schema.clone(),
                target: Target::Local(entry.capability.clone()),
                supervisor: self.supervisor.clone(),
                deadline: self.deadline,
            });
        }

        let mut sets = self.supervisor.capability_sets();
        sets.sort_by(|a, b| a.0.cmp(&b.0));
        for (server_id, set) in sets {
            if let Some(entry) = set.find(name) {
                return Ok(BoundCapability {
                    descriptor: entry.descriptor.clone(),
                    schema: entry.schema.clone(),
                    target: Target::Server {
                        id: server_id,
                        generation: set.generation,
                    },
                    supervisor: self.supervisor.clone(),
                    deadline: self.deadline,
                });
            }
        }

        Err(BridgeError::NotFound(name.to_string()))
    }

    /// Resolve and invoke in one step with the default deadline.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        self.resolve(name)?.invoke(arguments).await
    }

    /// Descriptors of every resolvable capability (winners only), for
    /// presenting the available surface to a reasoning loop.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.report()
            .capabilities
            .iter()
            .filter_map(|entry| self.resolve(&entry.name).ok())
            .map(|bound| bound.descriptor.clone())
            .collect()
    }

    /// Snapshot the unified namespace, including shadowing.
    pub fn report(&self) -> ResolutionReport {
        // name -> (winning origin, shadowed origins), ordered by name.
        let mut names: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();

        for entry in self.locals.read().iter() {
            names.insert(
                entry.descriptor.name.clone(),
                ("local".to_string(), Vec::new()),
            );
        }

        let mut sets = self.supervisor.capability_sets();
        sets.sort_by(|a, b| a.0.cmp(&b.0));
        for (server_id, set) in sets {
            let origin = format!("server:{}", server_id);
            for name in set.names() {
                match names.get_mut(&name) {
                    Some((_, shadowed)) => shadowed.push(origin.clone()),
                    None => {
                        names.insert(name, (origin.clone(), Vec::new()));
                    }
                }
            }
        }

        ResolutionReport {
            capabilities: names
                .into_iter()
                .map(|(name, (origin, shadowed))| ResolvedEntry {
                    name,
                    origin,
                    shadowed,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
