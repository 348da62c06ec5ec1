//! Wire protocol types for AgentForge tool servers.
//!
//! Tool servers are subprocesses that speak line-delimited JSON-RPC over
//! their standard streams. This crate defines the request/response framing,
//! the capability descriptors servers advertise, and the schema validation
//! applied to arguments before they cross the process boundary.

mod capability;
mod rpc;
mod schema;

pub use capability::CapabilityDescriptor;
pub use rpc::{Method, RequestId, RpcError, RpcRequest, RpcResponse};
pub use schema::{ArgumentSchema, SchemaError};
