//! Error correlation.
//!
//! Joins an error's resolved stack, the component state around it, and the
//! requests that preceded it into one [`ErrorContext`]. Correlation never
//! fails: a signal that cannot be gathered is left empty and explained in
//! `notes`.

pub mod history;
pub mod normalize;

use std::sync::Arc;

use async_trait::async_trait;

use pagescope_types::{
    ComponentId, ComponentInstance, Confidence, ErrorContext, Lookup, NetworkTrace,
    RootCauseReport, RuntimeError, SimilarErrors, StackTrace,
};

use crate::components::ComponentTree;
use crate::error::IntrospectError;
use crate::network::NetworkTracer;
use crate::sourcemap::SourceLocationResolver;

pub use history::ErrorLog;
pub use normalize::normalize_message;

/// Label for how many independent signals back a correlation.
///
/// Network activity is the only link to a cause outside the stack, so
/// without it confidence stays `Low`.
pub fn confidence(stack_resolved: bool, has_components: bool, has_network: bool) -> Confidence {
    if !has_network {
        return Confidence::Low;
    }
    let signals = [stack_resolved, has_components, has_network]
        .iter()
        .filter(|s| **s)
        .count();
    match signals {
        3 => Confidence::High,
        2 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Where correlation reads component state from.
///
/// The introspector implements this with its navigation retry, so a query
/// that races a page load is re-run once before it turns into a note.
#[async_trait]
pub trait ComponentSource: Send + Sync {
    async fn tree(&self, selector: Option<&str>) -> Result<Lookup<ComponentTree>, IntrospectError>;

    async fn detail(&self, id: &ComponentId) -> Result<Lookup<ComponentInstance>, IntrospectError>;
}

pub struct ErrorCorrelator {
    resolver: Arc<SourceLocationResolver>,
    network: Arc<NetworkTracer>,
    errors: Arc<ErrorLog>,
}

impl ErrorCorrelator {
    pub fn new(
        resolver: Arc<SourceLocationResolver>,
        network: Arc<NetworkTracer>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        Self {
            resolver,
            network,
            errors,
        }
    }

    /// Requests dispatched in the `window_ms` before the error.
    fn preceding_traces(&self, error: &RuntimeError, window_ms: u64) -> Vec<NetworkTrace> {
        self.network
            .get_window(error.timestamp - window_ms as f64, error.timestamp)
    }

    pub async fn correlate(
        &self,
        error: &RuntimeError,
        window_ms: u64,
        selector: Option<&str>,
        components: &dyn ComponentSource,
    ) -> ErrorContext {
        let mut notes = Vec::new();

        let stack = if error.stack.trim().is_empty() {
            notes.push("error carried no stack trace".to_string());
            StackTrace::from_frames(Vec::new())
        } else {
            let stack = self.resolver.trace_stack(&error.stack).await;
            if !stack.frames.is_empty() && !stack.has_resolved_frames() {
                notes.push("no stack frame could be mapped to original source".to_string());
            }
            stack
        };

        let mut related_components = Vec::new();
        let mut focus = None;
        match components.tree(selector).await {
            Ok(Lookup::Found(tree)) => {
                let root = tree.roots().first().cloned();
                related_components = tree.nodes().to_vec();
                if let (Some(_), Some(root)) = (selector, root) {
                    match components.detail(&root).await {
                        Ok(Lookup::Found(instance)) => focus = Some(instance),
                        Ok(Lookup::NotFound { message }) => notes.push(message),
                        Ok(Lookup::Degraded { reason }) => notes.push(reason),
                        Err(e) => notes.push(format!("component detail unavailable: {e}")),
                    }
                }
            }
            Ok(Lookup::NotFound { message }) => notes.push(message),
            Ok(Lookup::Degraded { reason }) => notes.push(reason),
            Err(e) => {
                tracing::warn!(error = %e, "component state unavailable for correlation");
                notes.push(format!("component state unavailable: {e}"));
            }
        }

        let related_network = self.preceding_traces(error, window_ms);
        if related_network.is_empty() {
            notes.push(format!("no network activity in the {window_ms} ms before the error"));
        }

        let confidence = confidence(
            stack.has_resolved_frames(),
            !related_components.is_empty(),
            !related_network.is_empty(),
        );
        tracing::debug!(
            message = %error.message,
            frames = stack.frames.len(),
            components = related_components.len(),
            requests = related_network.len(),
            ?confidence,
            "error correlated"
        );

        ErrorContext {
            error: error.clone(),
            stack,
            related_components,
            focus,
            related_network,
            confidence,
            notes,
        }
    }

    pub fn find_similar(&self, error: &RuntimeError) -> SimilarErrors {
        self.errors.find_similar(error)
    }

    pub fn find_root_cause(&self, error: &RuntimeError, window_ms: u64) -> RootCauseReport {
        let similar = self.errors.find_similar(error);
        let traces = self.preceding_traces(error, window_ms);
        history::rank_causes(error, &similar, &traces, window_ms)
    }
}
