//! UI-framework component model: nodes, instances, hooks, and render cadence.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Millis;

/// A UI framework with an introspectable runtime representation.
///
/// Declaration order is detection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    React,
    Vue,
    Angular,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Angular => "angular",
            Framework::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable component identifier derived from DOM node identity.
///
/// Stays the same across re-renders as long as the backing DOM node is the
/// same object; never derived from sibling position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Page-side handle to a DOM node, held in a page `WeakMap`/`WeakRef`.
///
/// The host only ever sees this number; it never keeps the node alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomRef(pub u64);

/// One node of the component tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub id: ComponentId,
    pub name: String,
    pub framework: Framework,
    /// Depth from the nearest traversal root (0 = root).
    pub depth: u32,
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    pub dom: Option<DomRef>,
}

/// A framework hook, identified only by its call-order index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookInfo {
    pub index: usize,
    #[serde(flatten)]
    pub kind: HookKind,
}

/// Runtime shape of a hook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HookKind {
    /// A value with a setter (state or reducer).
    State { value: Value },
    /// A value with a dependency list (effect, memo, callback).
    Effect { value: Value, deps: Vec<Value> },
    /// Anything else, kept raw.
    Unknown { raw: Value },
}

impl HookKind {
    pub fn label(&self) -> &'static str {
        match self {
            HookKind::State { .. } => "state",
            HookKind::Effect { .. } => "effect",
            HookKind::Unknown { .. } => "unknown",
        }
    }
}

/// An active context value visible to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextValue {
    pub provider: String,
    pub value: Value,
}

/// A point-in-time copy of a component and its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstance {
    pub node: ComponentNode,
    pub props: Value,
    pub state: Value,
    pub hooks: Vec<HookInfo>,
    pub context: Vec<ContextValue>,
}

/// A single observed render of a tracked component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEvent {
    pub component_id: ComponentId,
    pub timestamp: Millis,
    pub reason: Option<String>,
}

/// Why a render-tracking window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderEnd {
    Timeout,
    EarlyCompletion,
    Navigation,
    Cancelled,
}

/// Summary of a render-tracking window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub component_id: ComponentId,
    pub window_ms: u64,
    pub total_renders: usize,
    /// Mean gap between consecutive renders; `None` with fewer than two.
    pub average_interval_ms: Option<f64>,
    pub events: Vec<RenderEvent>,
    pub ended_by: RenderEnd,
}

impl RenderStats {
    /// Summarize buffered events, ordering them by timestamp first.
    pub fn from_events(
        component_id: ComponentId,
        window_ms: u64,
        mut events: Vec<RenderEvent>,
        ended_by: RenderEnd,
    ) -> Self {
        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let average_interval_ms = if events.len() >= 2 {
            let gaps: f64 = events
                .windows(2)
                .map(|w| w[1].timestamp - w[0].timestamp)
                .sum();
            Some(gaps / (events.len() - 1) as f64)
        } else {
            None
        };
        Self {
            component_id,
            window_ms,
            total_renders: events.len(),
            average_interval_ms,
            events,
            ended_by,
        }
    }
}
