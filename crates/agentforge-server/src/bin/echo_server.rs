//! Minimal reference tool server: a single `echo` capability.
//!
//! Test manually:
//!   echo '{"jsonrpc":"2.0","method":"ping","params":{},"id":1}' | agentforge-echo-server

use std::sync::Arc;

use agentforge_server::handlers::EchoHandler;
use agentforge_server::StdioCapabilityServer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    // stdout is the wire; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = StdioCapabilityServer::new();
    server.register(Arc::new(EchoHandler::new()));
    server.run().await
}
