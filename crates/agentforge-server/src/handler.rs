//! Capability handler trait.

use async_trait::async_trait;

use agentforge_protocols::CapabilityDescriptor;

/// Errors a capability implementation can report.
///
/// These surface to the caller as application-level errors in the response
/// payload; they never tear down the server.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// One capability a server exposes.
///
/// Implementations define what the operation does; the serve loop owns
/// framing and dispatch.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// The advertised descriptor (name, description, parameter schema).
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Execute the capability with the given arguments.
    async fn handle(&self, arguments: serde_json::Value) -> Result<serde_json::Value, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        descriptor: CapabilityDescriptor,
    }

    #[async_trait]
    impl CapabilityHandler for Noop {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn handle(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_handler_object_safety() {
        let handler: Box<dyn CapabilityHandler> = Box::new(Noop {
            descriptor: CapabilityDescriptor::new("noop", "Does nothing"),
        });
        assert_eq!(handler.descriptor().name, "noop");
        let out = handler.handle(serde_json::json!({})).await.unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError::InvalidArguments("missing expression".to_string());
        assert_eq!(err.to_string(), "invalid arguments: missing expression");

        let err = HandlerError::Failed("division by zero".to_string());
        assert_eq!(err.to_string(), "division by zero");
    }
}
