//! Capability descriptor types.

use serde::{Deserialize, Serialize};

/// One operation a tool server advertises.
///
/// Discovered once at server startup and immutable afterwards; a restarted
/// server is re-discovered from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Capability name, unique within a server.
    pub name: String,

    /// Description of what the capability does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
        }
    }

    /// Set the parameter schema.
    pub fn with_parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = schema;
        self
    }
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}
