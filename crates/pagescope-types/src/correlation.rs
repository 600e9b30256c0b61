//! Runtime errors and the debugging context assembled around them.

use serde::{Deserialize, Serialize};

use crate::component::{ComponentInstance, ComponentNode};
use crate::location::StackTrace;
use crate::network::NetworkTrace;
use crate::Millis;

/// An error raised by the page, as reported by the agent or a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeError {
    pub message: String,
    /// Raw stack text (`error.stack`).
    #[serde(default)]
    pub stack: String,
    pub timestamp: Millis,
    /// Script URL reported by the `error` event, if any.
    #[serde(default)]
    pub source: Option<String>,
}

/// How many independent signals backed a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Everything known about an error at the moment it was correlated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub error: RuntimeError,
    pub stack: StackTrace,
    /// Components in scope: the selector's subtree, or the whole tree.
    pub related_components: Vec<ComponentNode>,
    /// Detail of the selector's component when a selector was given.
    pub focus: Option<ComponentInstance>,
    /// Requests dispatched inside the correlation window, oldest first.
    pub related_network: Vec<NetworkTrace>,
    pub confidence: Confidence,
    /// One entry per degraded signal.
    pub notes: Vec<String>,
}

/// Earlier errors sharing a normalized message pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarErrors {
    pub pattern: String,
    /// Occurrences of the pattern in the error log, including this one if recorded.
    pub occurrences: usize,
    /// Matching earlier errors, most recent first.
    pub matches: Vec<RuntimeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CauseKind {
    FailedRequest,
    RecurringError,
}

/// A ranked candidate explanation for an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseCandidate {
    pub kind: CauseKind,
    pub description: String,
    /// In `[0, 1]`; higher is more likely.
    pub score: f64,
    pub timestamp: Millis,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCauseReport {
    pub pattern: String,
    pub occurrences: usize,
    pub recurring: bool,
    /// Sorted by descending score.
    pub candidates: Vec<CauseCandidate>,
}
