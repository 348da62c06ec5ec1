//! Echo capability, useful for testing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use agentforge_protocols::CapabilityDescriptor;

use crate::handler::{CapabilityHandler, HandlerError};

#[derive(Debug, Deserialize)]
struct EchoArgs {
    message: String,
}

/// Echoes back the input message.
pub struct EchoHandler {
    descriptor: CapabilityDescriptor,
}

impl EchoHandler {
    pub fn new() -> Self {
        let schema = json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        });

        Self {
            descriptor: CapabilityDescriptor::new(
                "echo",
                "Echoes back the input message. Useful for testing.",
            )
            .with_parameters(schema),
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for EchoHandler {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn handle(&self, arguments: Value) -> Result<Value, HandlerError> {
        let args: EchoArgs = serde_json::from_value(arguments)
            .map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;

        Ok(json!({
            "echoed": args.message,
            "length": args.message.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let handler = EchoHandler::new();
        let result = handler.handle(json!({"message": "hello"})).await.unwrap();
        assert_eq!(result["echoed"], "hello");
        assert_eq!(result["length"], 5);
    }

    #[tokio::test]
    async fn test_echo_empty_message() {
        let handler = EchoHandler::new();
        let result = handler.handle(json!({"message": ""})).await.unwrap();
        assert_eq!(result["length"], 0);
    }

    #[tokio::test]
    async fn test_echo_missing_message() {
        let handler = EchoHandler::new();
        let result = handler.handle(json!({"count": 1})).await;
        assert!(matches!(result, Err(HandlerError::InvalidArguments(_))));
    }

    #[test]
    fn test_descriptor_schema_requires_message() {
        let handler = EchoHandler::new();
        assert_eq!(handler.descriptor().parameters["required"][0], "message");
    }
}
