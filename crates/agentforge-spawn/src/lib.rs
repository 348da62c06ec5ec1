//! Bounded recursive spawning of agent execution contexts.
//!
//! A [`SpawnController`] composes a child context from a template, a
//! capability wish-list, and an execution budget. Recursion is bounded by a
//! hard depth ceiling checked before any side effect, and every spawn is
//! recorded in an append-only [`GenealogyArena`]. The controller can itself
//! be registered on a `CapabilityBridge` as the `spawn_agent` capability, so
//! an agent requests a sub-agent the same way it requests any other tool.

mod controller;
mod genealogy;
mod template;

pub use controller::{
    SpawnBudget, SpawnCapability, SpawnController, SpawnError, SpawnResult, SpawnedContext,
};
pub use genealogy::{GenealogyArena, GenealogyError, GenealogyRecord};
pub use template::{AgentTemplate, StaticTemplateSource, TemplateSource};
