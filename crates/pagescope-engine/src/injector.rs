//! Instrumentation registry: installs the page agent once per page.
//!
//! Installation registers the event binding, registers the agent as a
//! document-start script for future navigations, and evaluates it in the
//! current document. The host remembers a successful install; the agent's
//! own `installed` marker keeps repeated evaluation from patching twice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use pagescope_browser::PageContext;

use crate::agent::{self, AgentOptions, AGENT_VERSION};
use crate::error::IntrospectError;

/// How the immediate evaluation in the current document went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImmediateInstall {
    /// The agent was installed by this evaluation.
    Fresh,
    /// The document already carried the agent.
    AlreadyPresent,
    /// The document went away mid-evaluation; the document-start script
    /// covers its replacement.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub init_script_id: String,
    pub immediate: ImmediateInstall,
    pub version: u32,
}

#[derive(Debug, Deserialize)]
struct InstallOutcome {
    fresh: bool,
    version: u32,
}

pub struct InstrumentationRegistry {
    page: Arc<dyn PageContext>,
    options: AgentOptions,
    report: OnceCell<InstallReport>,
}

impl InstrumentationRegistry {
    pub fn new(page: Arc<dyn PageContext>, options: AgentOptions) -> Self {
        Self {
            page,
            options,
            report: OnceCell::new(),
        }
    }

    pub fn binding(&self) -> &str {
        &self.options.binding
    }

    pub fn is_installed(&self) -> bool {
        self.report.initialized()
    }

    /// Install once. Concurrent callers share one attempt; a failed attempt
    /// is reported as [`IntrospectError::Fatal`] and not remembered.
    pub async fn install(&self) -> Result<InstallReport, IntrospectError> {
        self.report
            .get_or_try_init(|| self.install_once())
            .await
            .cloned()
    }

    async fn install_once(&self) -> Result<InstallReport, IntrospectError> {
        let script = agent::agent_script(&self.options);

        self.page
            .add_binding(&self.options.binding)
            .await
            .map_err(|e| IntrospectError::Fatal(format!("binding registration failed: {e}")))?;

        let init_script_id = self
            .page
            .add_init_script(&script)
            .await
            .map_err(|e| IntrospectError::Fatal(format!("document-start script rejected: {e}")))?;

        let immediate = self.evaluate_agent(&script).await?;
        tracing::info!(
            binding = %self.options.binding,
            init_script_id = %init_script_id,
            ?immediate,
            "page agent installed"
        );
        Ok(InstallReport {
            init_script_id,
            immediate,
            version: AGENT_VERSION,
        })
    }

    /// Evaluate the agent in the current document. Safe to repeat; used
    /// after navigations where the document-start script may not have run.
    pub async fn install_current_document(&self) -> Result<ImmediateInstall, IntrospectError> {
        self.evaluate_agent(&agent::agent_script(&self.options))
            .await
    }

    async fn evaluate_agent(&self, script: &str) -> Result<ImmediateInstall, IntrospectError> {
        let raw = match self.page.evaluate(script).await {
            Ok(raw) => raw,
            Err(e) if e.is_context_lost() => {
                tracing::debug!(error = %e, "document replaced during agent evaluation");
                return Ok(ImmediateInstall::Deferred);
            }
            Err(e) => return Err(IntrospectError::Fatal(format!("agent evaluation failed: {e}"))),
        };

        let outcome: InstallOutcome = serde_json::from_value(raw).map_err(|e| {
            IntrospectError::Fatal(format!("agent did not report its installation: {e}"))
        })?;
        if outcome.version != AGENT_VERSION {
            tracing::warn!(
                page_version = outcome.version,
                host_version = AGENT_VERSION,
                "page carries a different agent version"
            );
        }
        Ok(if outcome.fresh {
            ImmediateInstall::Fresh
        } else {
            ImmediateInstall::AlreadyPresent
        })
    }
}
