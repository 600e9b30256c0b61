//! The page seam: everything the introspection engine needs from a live page.
//!
//! [`PageContext`] is implemented by [`crate::PageDriver`] for real pages and
//! by scripted fakes in tests. Every page-side operation is one awaited round
//! trip; events flow back through a broadcast subscription.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cdp::CdpEvent;
use crate::error::BrowserError;

/// Event emitted when page script calls a registered binding.
pub const BINDING_CALLED: &str = "Runtime.bindingCalled";
/// Event emitted when a frame commits a navigation.
pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";

/// A live page context that can run script and publish events.
#[async_trait]
pub trait PageContext: Send + Sync + 'static {
    /// Evaluate an expression in the page's main world and return its
    /// JSON value. Promises are awaited.
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError>;

    /// Register a script to run in every new document before page script.
    /// Returns the script identifier.
    async fn add_init_script(&self, source: &str) -> Result<String, BrowserError>;

    /// Expose a `window.<name>(payload: string)` function whose calls arrive
    /// as [`BINDING_CALLED`] events.
    async fn add_binding(&self, name: &str) -> Result<(), BrowserError>;

    /// Subscribe to protocol events received after this call.
    fn subscribe(&self) -> broadcast::Receiver<CdpEvent>;
}

/// Extract the payload of a binding call addressed to `binding`.
pub fn binding_payload<'a>(event: &'a CdpEvent, binding: &str) -> Option<&'a str> {
    if event.method != BINDING_CALLED {
        return None;
    }
    if event.params.get("name").and_then(Value::as_str) != Some(binding) {
        return None;
    }
    event.params.get("payload").and_then(Value::as_str)
}

/// True for a committed navigation of the top-level frame.
pub fn is_main_frame_navigation(event: &CdpEvent) -> bool {
    event.method == FRAME_NAVIGATED
        && event
            .params
            .get("frame")
            .is_some_and(|frame| frame.get("parentId").is_none())
}

/// Build a `Runtime.bindingCalled` event, as Chrome would deliver it.
pub fn binding_event(binding: &str, payload: &str) -> CdpEvent {
    CdpEvent {
        method: BINDING_CALLED.to_string(),
        params: serde_json::json!({
            "name": binding,
            "payload": payload,
            "executionContextId": 1,
        }),
    }
}

/// Build a main-frame `Page.frameNavigated` event.
pub fn main_frame_navigated_event(url: &str) -> CdpEvent {
    CdpEvent {
        method: FRAME_NAVIGATED.to_string(),
        params: serde_json::json!({
            "frame": { "id": "main", "loaderId": "L1", "url": url },
            "type": "Navigation",
        }),
    }
}
