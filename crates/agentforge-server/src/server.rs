//! Stdio serve loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use agentforge_protocols::{Method, RequestId, RpcError, RpcResponse};

use crate::handler::CapabilityHandler;

/// JSON-RPC capability server over stdin/stdout.
///
/// One JSON-RPC message per line. Supported methods: `ping`, `tools/list`,
/// `tools/call`.
pub struct StdioCapabilityServer {
    handlers: Vec<Arc<dyn CapabilityHandler>>,
    by_name: HashMap<String, usize>,
}

impl StdioCapabilityServer {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a capability handler. A later registration with the same
    /// name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        let name = handler.descriptor().name.clone();
        if let Some(&idx) = self.by_name.get(&name) {
            warn!("Replacing capability handler: {}", name);
            self.handlers[idx] = handler;
            return;
        }
        self.by_name.insert(name.clone(), self.handlers.len());
        self.handlers.push(handler);
        info!("Registered capability: {}", name);
    }

    /// Names of registered capabilities, in registration order.
    pub fn capability_names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|h| h.descriptor().name.clone())
            .collect()
    }

    /// Main loop over the process standard streams.
    ///
    /// Blocks until stdin closes (the owning host went away).
    pub async fn run(&self) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve requests over arbitrary byte streams.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            "Capability server starting with {} capabilities: {:?}",
            self.handlers.len(),
            self.capability_names()
        );

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = self.handle_line(line).await;
            let encoded = match serde_json::to_string(&response) {
                Ok(s) => s,
                Err(e) => {
                    // Result payload was not serializable; answer with an error
                    // instead of dropping the request on the floor.
                    warn!("Failed to encode response: {}", e);
                    serde_json::to_string(&RpcResponse::error(
                        response.id,
                        RpcError::internal_error(e.to_string()),
                    ))
                    .unwrap_or_default()
                }
            };
            writer.write_all(encoded.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        info!("Capability server stdin closed, shutting down");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> RpcResponse {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return RpcResponse::error(None, RpcError::parse_error(e.to_string())),
        };

        let id: Option<RequestId> = parsed
            .get("id")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let Some(method) = parsed.get("method").and_then(Value::as_str) else {
            return RpcResponse::error(id, RpcError::invalid_request());
        };
        let params = parsed.get("params").cloned().unwrap_or(Value::Null);

        debug!("Dispatching method: {}", method);
        match self.dispatch(method, params).await {
            Ok(result) => RpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => RpcResponse::error(id, e),
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match Method::parse(method) {
            Some(Method::Ping) => Ok(json!({
                "status": "ok",
                "tools": self.capability_names(),
            })),
            Some(Method::ListCapabilities) => {
                let descriptors: Vec<_> =
                    self.handlers.iter().map(|h| h.descriptor().clone()).collect();
                Ok(serde_json::to_value(descriptors)
                    .map_err(|e| RpcError::internal_error(e.to_string()))?)
            }
            Some(Method::Invoke) => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("missing capability name"))?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let handler = self
                    .by_name
                    .get(name)
                    .map(|&idx| &self.handlers[idx])
                    .ok_or_else(|| {
                        RpcError::internal_error(format!(
                            "Unknown capability: '{}'. Available: {:?}",
                            name,
                            self.capability_names()
                        ))
                    })?;

                handler
                    .handle(arguments)
                    .await
                    .map_err(|e| RpcError::internal_error(e.to_string()))
            }
            None => Err(RpcError::method_not_found(method)),
        }
    }
}

impl Default for StdioCapabilityServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
