//! High-level page driver wrapping the CDP client.
//!
//! Provides the operations the introspection engine performs against a live
//! page: script evaluation, pre-navigation scripts, and bindings. The driver
//! owns a [`CdpClient`] and enables the CDP domains it relies on at connect
//! time.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cdp::{CdpClient, CdpEvent};
use crate::error::BrowserError;
use crate::page::PageContext;

// ---------------------------------------------------------------------------
// PageDriver
// ---------------------------------------------------------------------------

/// Driver for one page target.
///
/// # Example (conceptual)
///
/// ```ignore
/// let driver = PageDriver::connect("ws://localhost:9222/devtools/page/ABC").await?;
/// let title = driver.evaluate("document.title").await?;
/// driver.add_binding("__pagescopeEmit").await?;
/// ```
pub struct PageDriver {
    client: CdpClient,
}

impl PageDriver {
    /// Connect to a Chrome DevTools page target.
    ///
    /// Enables the Page and Runtime domains, which carry navigation and
    /// binding events.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let client = CdpClient::connect(ws_url).await?;
        Self::from_client(client).await
    }

    /// Wrap an existing client, enabling the required domains.
    pub async fn from_client(client: CdpClient) -> Result<Self, BrowserError> {
        client.enable_domain("Page").await?;
        client.enable_domain("Runtime").await?;
        Ok(Self { client })
    }

    /// Return the underlying CDP client for direct command access.
    pub fn client(&self) -> &CdpClient {
        &self.client
    }
}

#[async_trait]
impl PageContext for PageDriver {
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .client
            .send_command("Runtime.evaluate", build_evaluate_params(expression))
            .await?;
        evaluate_result_value(&result)
    }

    async fn add_init_script(&self, source: &str) -> Result<String, BrowserError> {
        let result = self
            .client
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                build_init_script_params(source),
            )
            .await?;
        result
            .get("identifier")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "addScriptToEvaluateOnNewDocument returned no identifier".to_string(),
            })
    }

    async fn add_binding(&self, name: &str) -> Result<(), BrowserError> {
        self.client
            .send_command("Runtime.addBinding", serde_json::json!({ "name": name }))
            .await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.client.subscribe()
    }
}

// ---------------------------------------------------------------------------
// CDP parameter builders and response parsing
// ---------------------------------------------------------------------------

/// Build CDP `Runtime.evaluate` parameters.
pub fn build_evaluate_params(expression: &str) -> Value {
    serde_json::json!({
        "expression": expression,
        "returnByValue": true,
        "awaitPromise": true,
    })
}

/// Build CDP `Page.addScriptToEvaluateOnNewDocument` parameters.
pub fn build_init_script_params(source: &str) -> Value {
    serde_json::json!({ "source": source })
}

/// Extract the value of a `Runtime.evaluate` result, surfacing exceptions.
pub fn evaluate_result_value(result: &Value) -> Result<Value, BrowserError> {
    if let Some(exception) = result.get("exceptionDetails") {
        let message = exception
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| exception.get("text").and_then(|t| t.as_str()))
            .unwrap_or("unknown exception")
            .to_string();
        return Err(BrowserError::JsException { message });
    }

    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
