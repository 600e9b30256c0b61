//! Page-to-host events and their in-process fan-out.
//!
//! The agent emits one JSON object per binding call, tagged by `kind`.
//! Network and error events go straight into the tracer and error log;
//! render signals and navigations are fanned out through [`EventHub`] to
//! whichever render-tracking windows are open.

use std::collections::BTreeMap;

use serde::Deserialize;
use tokio::sync::{broadcast, watch};

use pagescope_types::{ComponentId, Millis, RuntimeError, TransportTiming};

const RENDER_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PageEvent {
    Dispatch(DispatchEvent),
    Complete(CompletionEvent),
    Failed(FailureEvent),
    Render(RenderSignal),
    Error(RuntimeError),
}

/// A request leaving the page, with the stack captured at the call site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub timestamp: Millis,
    #[serde(default)]
    pub stack: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A response. Carries no request id; the tracer matches it to a dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub duration_ms: f64,
    pub timestamp: Millis,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timing: Option<TransportTiming>,
}

/// A request that ended without a response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub url: String,
    pub method: String,
    pub timestamp: Millis,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    pub reason: String,
}

/// One render of a component under an active subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSignal {
    pub subscription: String,
    pub component_id: ComponentId,
    pub timestamp: Millis,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn parse_event(payload: &str) -> Result<PageEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Fan-out for render signals and the navigation epoch.
pub struct EventHub {
    renders: broadcast::Sender<RenderSignal>,
    navigation: watch::Sender<u64>,
}

impl EventHub {
    pub fn new() -> Self {
        let (renders, _) = broadcast::channel(RENDER_CHANNEL_CAPACITY);
        let (navigation, _) = watch::channel(0);
        Self {
            renders,
            navigation,
        }
    }

    pub fn publish_render(&self, signal: RenderSignal) {
        // No receivers just means no window is open.
        let _ = self.renders.send(signal);
    }

    pub fn subscribe_renders(&self) -> broadcast::Receiver<RenderSignal> {
        self.renders.subscribe()
    }

    /// Record a main-frame navigation; every open window observes it.
    pub fn advance_navigation(&self) {
        self.navigation.send_modify(|epoch| *epoch += 1);
    }

    pub fn navigation_epoch(&self) -> u64 {
        *self.navigation.borrow()
    }

    pub fn watch_navigation(&self) -> watch::Receiver<u64> {
        self.navigation.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
