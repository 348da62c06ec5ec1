//! Spawn controller: composes child execution contexts under a hard depth
//! ceiling.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use agentforge_host::{BridgeError, CapabilityBridge, LocalCapability, ServerSupervisor};
use agentforge_protocols::CapabilityDescriptor;

use crate::genealogy::{GenealogyArena, GenealogyError, GenealogyRecord};
use crate::template::TemplateSource;

const DEFAULT_MAX_DEPTH: u32 = 3;

/// Spawn-time rejections. All of them happen before any side effect: no
/// process starts and no genealogy record is written on failure.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("spawn depth {requested} exceeds the ceiling of {max}")]
    DepthExceeded { requested: u32, max: u32 },

    #[error("unknown parent context: {0}")]
    UnknownParent(String),
}

/// Execution limits handed to the new context.
///
/// Opaque to the controller: recorded and passed through, enforced by the
/// reasoning loop that consumes the context. Never derived from the parent's
/// remaining budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_invocations: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

/// What a successful spawn hands back to the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    pub context_id: String,
    pub depth: u32,
    pub tools_attached: Vec<String>,
    pub tools_missing: Vec<String>,
}

/// A live child context: its genealogy record, its own supervisor and
/// bridge, and the budget it was given.
pub struct SpawnedContext {
    pub record: Arc<GenealogyRecord>,
    pub supervisor: Arc<ServerSupervisor>,
    pub bridge: Arc<CapabilityBridge>,
    pub budget: SpawnBudget,
}

impl SpawnedContext {
    pub fn id(&self) -> &str {
        &self.record.agent_id
    }
}

/// Composes child contexts from templates, bounded by `max_depth`.
pub struct SpawnController {
    templates: Arc<dyn TemplateSource>,
    /// The capability surface spawns are resolved against.
    bridge: Arc<CapabilityBridge>,
    genealogy: Arc<GenealogyArena>,
    contexts: DashMap<String, Arc<SpawnedContext>>,
    max_depth: u32,
}

impl SpawnController {
    pub fn new(templates: Arc<dyn TemplateSource>, bridge: Arc<CapabilityBridge>) -> Self {
        Self {
            templates,
            bridge,
            genealogy: Arc::new(GenealogyArena::new()),
            contexts: DashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn genealogy(&self) -> &GenealogyArena {
        &self.genealogy
    }

    pub fn context(&self, context_id: &str) -> Option<Arc<SpawnedContext>> {
        self.contexts.get(context_id).map(|e| e.value().clone())
    }

    /// Spawn a new execution context.
    ///
    /// `requested` is resolved together with the template's declared
    /// capabilities; names that resolve against the current surface are
    /// attached, the rest come back as `tools_missing`. Partial attachment
    /// is allowed, but a missing required capability is logged.
    pub async fn spawn(
        &self,
        template_id: &str,
        requested: &[String],
        budget: SpawnBudget,
        parent: Option<&str>,
    ) -> Result<SpawnResult, SpawnError> {
        // Everything that can fail is checked up front.
        let depth = match parent {
            None => 0,
            Some(parent_id) => {
                let parent_depth = self
                    .genealogy
                    .depth_of(parent_id)
                    .ok_or_else(|| SpawnError::UnknownParent(parent_id.to_string()))?;
                parent_depth + 1
            }
        };
        if depth > self.max_depth {
            return Err(SpawnError::DepthExceeded {
                requested: depth,
                max: self.max_depth,
            });
        }

        let template = self
            .templates
            .get(template_id)
            .await
            .ok_or_else(|| SpawnError::TemplateNotFound(template_id.to_string()))?;

        let mut wanted: Vec<String> = Vec::new();
        for name in template
            .required_capabilities
            .iter()
            .chain(template.optional_capabilities.iter())
            .chain(requested.iter())
        {
            if !wanted.iter().any(|w| w == name) {
                wanted.push(name.clone());
            }
        }

        let mut attached = Vec::new();
        let mut missing = Vec::new();
        for name in wanted {
            if self.bridge.resolve(&name).is_ok() {
                attached.push(name);
            } else {
                missing.push(name);
            }
        }
        for name in &missing {
            if template.required_capabilities.contains(name) {
                warn!(
                    "Template {} requires {} but it is not available",
                    template_id, name
                );
            }
        }

        let record = self
            .genealogy
            .append(parent, template_id, attached.clone())
            .map_err(|GenealogyError::UnknownParent(id)| SpawnError::UnknownParent(id))?;

        // The child gets its own supervisor and bridge; its servers and
        // lifecycle belong to it, not to the parent.
        let supervisor = Arc::new(ServerSupervisor::default());
        let bridge = Arc::new(CapabilityBridge::new(supervisor.clone()));
        let context = Arc::new(SpawnedContext {
            record: record.clone(),
            supervisor,
            bridge,
            budget,
        });
        self.contexts
            .insert(record.agent_id.clone(), context);

        info!(
            "Spawned {} from template {} at depth {} (attached: {:?}, missing: {:?})",
            record.agent_id, template_id, record.depth, attached, missing
        );

        Ok(SpawnResult {
            context_id: record.agent_id.clone(),
            depth: record.depth,
            tools_attached: attached,
            tools_missing: missing,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpawnRequest {
    template_id: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    budget: SpawnBudget,
    #[serde(default)]
    parent_id: Option<String>,
}

/// The controller exposed as an ordinary capability, so an agent asks for a
/// sub-agent the same way it asks for any other tool.
pub struct SpawnCapability {
    controller: Arc<SpawnController>,
}

impl SpawnCapability {
    pub fn new(controller: Arc<SpawnController>) -> Arc<Self> {
        Arc::new(Self { controller })
    }
}

#[async_trait]
impl LocalCapability for SpawnCapability {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "spawn_agent",
            "Spawn a sub-agent from a template with a capability wish-list and a budget",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "template_id": {"type": "string"},
                "capabilities": {"type": "array", "items": {"type": "string"}},
                "budget": {
                    "type": "object",
                    "properties": {
                        "max_tool_invocations": {"type": "integer"},
                        "max_iterations": {"type": "integer"}
                    }
                },
                "parent_id": {"type": "string"}
            },
            "required": ["template_id"]
        }))
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, BridgeError> {
        let request: SpawnRequest =
            serde_json::from_value(arguments).map_err(|e| BridgeError::InvalidArguments {
                name: "spawn_agent".to_string(),
                issues: vec![e.to_string()],
            })?;

        let result = self
            .controller
            .spawn(
                &request.template_id,
                &request.capabilities,
                request.budget,
                request.parent_id.as_deref(),
            )
            .await
            .map_err(|e| BridgeError::LocalExecution {
                name: "spawn_agent".to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| BridgeError::LocalExecution {
            name: "spawn_agent".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
