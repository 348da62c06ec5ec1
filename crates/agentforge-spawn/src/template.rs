//! Agent templates and their source.
//!
//! A template declares which capabilities a context of that kind needs; the
//! controller only resolves those names against what is discoverable, it
//! never interprets template content.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Declaration of one kind of spawnable agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Capabilities the template cannot work without. A spawn still succeeds
    /// when one is unresolvable, but the miss is reported and logged.
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Nice-to-have capabilities; silently reported as missing when absent.
    #[serde(default)]
    pub optional_capabilities: Vec<String>,
}

impl AgentTemplate {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            required_capabilities: Vec::new(),
            optional_capabilities: Vec::new(),
        }
    }

    pub fn with_required<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optional<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Where templates come from.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn get(&self, template_id: &str) -> Option<AgentTemplate>;

    async fn list(&self) -> Vec<AgentTemplate>;
}

/// In-memory template source.
pub struct StaticTemplateSource {
    templates: RwLock<HashMap<String, AgentTemplate>>,
}

impl StaticTemplateSource {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a template, replacing an earlier one with the same id.
    pub fn insert(&self, template: AgentTemplate) {
        self.templates.write().insert(template.id.clone(), template);
    }

    pub fn with_template(self, template: AgentTemplate) -> Self {
        self.insert(template);
        self
    }
}

impl Default for StaticTemplateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateSource for StaticTemplateSource {
    async fn get(&self, template_id: &str) -> Option<AgentTemplate> {
        self.templates.read().get(template_id).cloned()
    }

    async fn list(&self) -> Vec<AgentTemplate> {
        self.templates.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_lookup() {
        let source = StaticTemplateSource::new().with_template(
            AgentTemplate::new("researcher", "Gathers information")
                .with_required(["echo"])
                .with_optional(["calculate"]),
        );

        let template = source.get("researcher").await.unwrap();
        assert_eq!(template.required_capabilities, vec!["echo"]);
        assert_eq!(template.optional_capabilities, vec!["calculate"]);
        assert!(source.get("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let source = StaticTemplateSource::new();
        source.insert(AgentTemplate::new("worker", "first"));
        source.insert(AgentTemplate::new("worker", "second"));
        assert_eq!(source.list().await.len(), 1);
        assert_eq!(source.get("worker").await.unwrap().description, "second");
    }

    #[test]
    fn test_template_deserialize_defaults() {
        let template: AgentTemplate = serde_json::from_str(r#"{"id":"minimal"}"#).unwrap();
        assert!(template.required_capabilities.is_empty());
        assert!(template.optional_capabilities.is_empty());
    }
}
