//! Calculator tool server: `calculate` and `convert_units` capabilities.
//!
//! Test manually:
//!   echo '{"jsonrpc":"2.0","method":"tools/call","params":{"name":"calculate","arguments":{"expression":"2+2"}},"id":1}' | agentforge-calc-server

use std::sync::Arc;

use agentforge_server::handlers::{CalculateHandler, ConvertUnitsHandler};
use agentforge_server::StdioCapabilityServer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = StdioCapabilityServer::new();
    server.register(Arc::new(CalculateHandler::new()));
    server.register(Arc::new(ConvertUnitsHandler::new()));
    server.run().await
}
