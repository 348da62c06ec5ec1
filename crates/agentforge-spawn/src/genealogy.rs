//! Append-only genealogy of spawned execution contexts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GenealogyError {
    #[error("unknown parent context: {0}")]
    UnknownParent(String),
}

/// One spawned context. Written once at spawn time, immutable afterwards,
/// retained for the lifetime of the arena.
#[derive(Debug, Clone, Serialize)]
pub struct GenealogyRecord {
    pub agent_id: String,
    /// `None` for root contexts.
    pub parent_id: Option<String>,
    /// Number of ancestor spawns between this context and its root.
    pub depth: u32,
    pub template_id: String,
    pub tools_attached: Vec<String>,
    pub created_at: DateTime<Utc>,
}

struct ArenaInner {
    records: Vec<Arc<GenealogyRecord>>,
    by_id: HashMap<String, usize>,
}

/// The spawn tree, indexed by agent id.
///
/// Appends are serialized behind the write lock so ids stay unique and a
/// child's depth is always computed against a fully written parent; reads
/// are concurrent.
pub struct GenealogyArena {
    inner: RwLock<ArenaInner>,
}

impl GenealogyArena {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ArenaInner {
                records: Vec::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    /// Append a record for a freshly spawned context.
    ///
    /// `parent_id: None` creates a root with depth 0; otherwise the child's
    /// depth is the parent's depth plus one.
    pub fn append(
        &self,
        parent_id: Option<&str>,
        template_id: impl Into<String>,
        tools_attached: Vec<String>,
    ) -> Result<Arc<GenealogyRecord>, GenealogyError> {
        let mut inner = self.inner.write();

        let depth = match parent_id {
            None => 0,
            Some(parent) => {
                let index = inner
                    .by_id
                    .get(parent)
                    .copied()
                    .ok_or_else(|| GenealogyError::UnknownParent(parent.to_string()))?;
                inner.records[index].depth + 1
            }
        };

        let record = Arc::new(GenealogyRecord {
            agent_id: uuid::Uuid::new_v4().to_string(),
            parent_id: parent_id.map(str::to_string),
            depth,
            template_id: template_id.into(),
            tools_attached,
            created_at: Utc::now(),
        });

        let index = inner.records.len();
        inner.by_id.insert(record.agent_id.clone(), index);
        inner.records.push(record.clone());
        Ok(record)
    }

    pub fn record(&self, agent_id: &str) -> Option<Arc<GenealogyRecord>> {
        let inner = self.inner.read();
        inner
            .by_id
            .get(agent_id)
            .map(|&index| inner.records[index].clone())
    }

    pub fn depth_of(&self, agent_id: &str) -> Option<u32> {
        self.record(agent_id).map(|r| r.depth)
    }

    /// Direct children of a context, in spawn order.
    pub fn children_of(&self, agent_id: &str) -> Vec<Arc<GenealogyRecord>> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.parent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    /// Records with no parent, in spawn order.
    pub fn roots(&self) -> Vec<Arc<GenealogyRecord>> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.parent_id.is_none())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

impl Default for GenealogyArena {
    fn default() -> Self {
        Self::new()
    }
}
