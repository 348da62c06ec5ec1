//! AgentForge: tool-process orchestration for recursive reasoning agents.
//!
//! Tool servers are external subprocesses speaking line-delimited JSON-RPC
//! over their standard streams. The host discovers their capabilities,
//! supervises their lifecycle, validates every invocation at the trust
//! boundary, and lets agents spawn bounded sub-agent contexts.
//!
//! The workspace crates, re-exported here:
//!
//! - [`protocols`] — wire types: requests, responses, capability descriptors,
//!   compiled argument schemas.
//! - [`server`] — the tool-server side: a stdio serve loop plus built-in
//!   handlers (echo, calculator, unit conversion).
//! - [`host`] — the host side: stdio transport with request/response
//!   correlation, server supervisor, validating capability bridge.
//! - [`spawn`] — sub-agent spawning with a hard depth ceiling and an
//!   append-only genealogy.

pub use agentforge_host as host;
pub use agentforge_protocols as protocols;
pub use agentforge_server as server;
pub use agentforge_spawn as spawn;

pub use agentforge_host::{
    BoundCapability, BridgeError, CapabilityBridge, LocalCapability, ServerSpec, ServerState,
    ServerSupervisor, SupervisorConfig, SupervisorError,
};
pub use agentforge_protocols::{CapabilityDescriptor, RpcError, RpcRequest, RpcResponse};
pub use agentforge_spawn::{
    AgentTemplate, GenealogyArena, SpawnBudget, SpawnCapability, SpawnController, SpawnError,
    SpawnResult, StaticTemplateSource, TemplateSource,
};
