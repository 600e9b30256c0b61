//! Render-tracking windows.
//!
//! A window holds one page-side subscription to a component's update
//! signal. It closes on timeout, on reaching its event cap, on main-frame
//! navigation, or when the event hub goes away. The subscription is released
//! on every one of those paths, and by `Drop` if the window's future is
//! itself dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use pagescope_browser::PageContext;
use pagescope_types::{RenderEnd, RenderEvent};

use crate::agent;
use crate::error::IntrospectError;
use crate::protocol::RenderSignal;

#[derive(Debug, Deserialize)]
struct ReleaseReply {
    released: bool,
}

/// A live page-side render subscription.
pub struct RenderSubscription {
    page: Arc<dyn PageContext>,
    id: String,
    released: AtomicBool,
}

impl RenderSubscription {
    pub(crate) fn new(page: Arc<dyn PageContext>, id: String) -> Self {
        Self {
            page,
            id,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Remove the page-side subscription. Returns whether the page still
    /// had it.
    pub async fn release(&self) -> Result<bool, IntrospectError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let reply: ReleaseReply = agent::invoke(
            self.page.as_ref(),
            "unsubscribeRenders",
            json!({ "subscription": self.id }),
        )
        .await?;
        tracing::debug!(subscription = %self.id, released = reply.released, "render subscription released");
        Ok(reply.released)
    }

    /// Forget the subscription without a page call. Used when the document
    /// that held it is gone.
    pub fn release_local(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl Drop for RenderSubscription {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(subscription = %self.id, "render subscription dropped outside a runtime");
            return;
        };
        let page = Arc::clone(&self.page);
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            let result: Result<ReleaseReply, _> =
                agent::invoke(page.as_ref(), "unsubscribeRenders", json!({ "subscription": id })).await;
            if let Err(e) = result {
                tracing::debug!(subscription = %id, error = %e, "deferred render release failed");
            }
        });
    }
}

/// Buffer render signals for `subscription` until the window closes.
///
/// Both receivers must be taken before the page-side subscription is made
/// so no early render or navigation is missed.
pub async fn collect(
    subscription: &RenderSubscription,
    mut renders: broadcast::Receiver<RenderSignal>,
    mut navigation: watch::Receiver<u64>,
    window: Duration,
    max_events: usize,
) -> (Vec<RenderEvent>, RenderEnd) {
    let mut events = Vec::new();
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return (events, RenderEnd::Timeout),
            changed = navigation.changed() => {
                let end = match changed {
                    Ok(()) => RenderEnd::Navigation,
                    Err(_) => RenderEnd::Cancelled,
                };
                return (events, end);
            }
            signal = renders.recv() => match signal {
                Ok(signal) if signal.subscription == subscription.id() => {
                    events.push(RenderEvent {
                        component_id: signal.component_id,
                        timestamp: signal.timestamp,
                        reason: signal.reason,
                    });
                    if events.len() >= max_events {
                        return (events, RenderEnd::EarlyCompletion);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscription = %subscription.id(), skipped, "render events dropped");
                }
                Err(RecvError::Closed) => return (events, RenderEnd::Cancelled),
            },
        }
    }
}
