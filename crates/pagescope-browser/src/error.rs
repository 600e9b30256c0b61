//! Error types for the pagescope-browser crate.

use std::time::Duration;

use thiserror::Error;

/// Messages Chrome returns when the page navigated while a command ran.
const CONTEXT_LOST_MARKERS: &[&str] = &[
    "Execution context was destroyed",
    "Cannot find context with specified id",
    "Inspected target navigated or closed",
    "Cannot find default execution context",
];

/// Errors that can occur while talking to a page over CDP.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to establish a WebSocket connection to Chrome DevTools.
    #[error("failed to connect to Chrome DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message format, etc.).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// JavaScript evaluation returned an exception.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },
}

impl BrowserError {
    /// True when the command failed because the page navigated underneath it.
    pub fn is_context_lost(&self) -> bool {
        let text = match self {
            BrowserError::CdpError { message, .. } => message.as_str(),
            BrowserError::JsException { message } => message.as_str(),
            _ => return false,
        };
        CONTEXT_LOST_MARKERS.iter().any(|m| text.contains(m))
    }
}
