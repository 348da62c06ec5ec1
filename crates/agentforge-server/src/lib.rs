//! Tool server side of the AgentForge wire protocol.
//!
//! A tool server is a standalone process that reads JSON-RPC requests from
//! stdin, dispatches them to registered [`CapabilityHandler`]s, and writes
//! responses to stdout. One line is one message; logs go to stderr because
//! stdout is the wire.

pub mod handlers;

mod handler;
mod server;

pub use handler::{CapabilityHandler, HandlerError};
pub use server::StdioCapabilityServer;
