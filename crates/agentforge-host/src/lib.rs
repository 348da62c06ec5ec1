//! Host side of AgentForge tool-process orchestration.
//!
//! Three layers, leaves first:
//!
//! - [`StdioTransport`] owns one subprocess's standard streams, frames
//!   line-delimited JSON-RPC messages, and matches responses to outstanding
//!   requests by id.
//! - [`ServerSupervisor`] owns a pool of transports, one per tool-server
//!   subprocess, and manages their lifecycle: start, capability discovery,
//!   health checks, caller-triggered restart, stop.
//! - [`CapabilityBridge`] validates arguments against discovered schemas
//!   before dispatch and normalizes results and failures for the reasoning
//!   loop that consumes them.

mod bridge;
mod config;
mod supervisor;
mod transport;

pub use bridge::{
    BoundCapability, BridgeError, CapabilityBridge, LocalCapability, ResolutionReport,
    ResolvedEntry, UnavailableReason,
};
pub use config::{ServerSpec, SupervisorConfig};
pub use supervisor::{
    CapabilityEntry, CapabilitySet, ServerState, ServerSupervisor, SupervisorError,
};
pub use transport::{PendingCall, StdioTransport, TransportError, TransportStatus};
