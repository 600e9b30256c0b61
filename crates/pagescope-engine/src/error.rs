//! Error taxonomy for page introspection.
//!
//! Only failures that leave the caller without any answer are errors.
//! Missing targets are [`pagescope_types::Lookup::NotFound`] and reduced
//! fidelity is reported in-band, so neither appears here.

use pagescope_browser::BrowserError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntrospectError {
    /// Instrumentation could not be installed. Never retried.
    #[error("instrumentation failed to install: {0}")]
    Fatal(String),

    /// The page navigated while the query ran. Retried once by the
    /// introspector, then reported as degraded.
    #[error("page navigated during query: {0}")]
    Transient(String),

    /// The page agent caught an exception and reported it.
    #[error("page agent error in {method}: {message}")]
    Agent { method: String, message: String },

    /// The page replied with something that does not match the agent protocol.
    #[error("unexpected reply from page agent for {method}: {detail}")]
    Protocol { method: String, detail: String },

    #[error("invalid URL pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(transparent)]
    Browser(BrowserError),
}

impl IntrospectError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IntrospectError::Transient(_))
    }
}

impl From<BrowserError> for IntrospectError {
    fn from(err: BrowserError) -> Self {
        if err.is_context_lost() {
            IntrospectError::Transient(err.to_string())
        } else {
            IntrospectError::Browser(err)
        }
    }
}
