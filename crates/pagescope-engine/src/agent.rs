//! Host side of the page agent protocol.
//!
//! The page agent (`js/agent.js`) is installed once per document and exposes
//! `window.__pagescope__.call(method, args)`, which always returns
//! `{ok: true, value}` or `{ok: false, error}`; page exceptions never escape
//! it unstructured. This module builds the agent script and call
//! expressions and decodes replies.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use pagescope_browser::PageContext;

use crate::error::IntrospectError;

/// Global the agent installs itself under.
pub const AGENT_GLOBAL: &str = "__pagescope__";

/// Bumped whenever the agent's call surface changes.
pub const AGENT_VERSION: u32 = 1;

const AGENT_SOURCE: &str = include_str!("../js/agent.js");
const OPTIONS_PLACEHOLDER: &str = "__PAGESCOPE_OPTIONS__";

/// Settings baked into the agent script.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub binding: String,
    pub max_body_bytes: usize,
}

/// The agent script with its options substituted.
pub fn agent_script(options: &AgentOptions) -> String {
    let options = serde_json::json!({
        "binding": options.binding,
        "maxBodyBytes": options.max_body_bytes,
        "version": AGENT_VERSION,
    });
    AGENT_SOURCE.replace(OPTIONS_PLACEHOLDER, &options.to_string())
}

/// Expression that calls one agent method with JSON arguments.
///
/// Evaluates to a `not_installed` failure instead of throwing when the
/// current document has no agent.
pub fn call_expression(method: &str, args: &Value) -> String {
    format!(
        "(function(){{var a=window.{AGENT_GLOBAL};\
         if(!a||!a.installed){{return {{ok:false,code:'not_installed',error:'page agent is not installed'}};}}\
         return a.call({method},{args});}})()",
        method = Value::from(method),
    )
}

#[derive(Debug, Deserialize)]
struct AgentReply {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Decode an agent reply into `T`.
pub fn decode_reply<T: DeserializeOwned>(method: &str, raw: Value) -> Result<T, IntrospectError> {
    let reply: AgentReply = serde_json::from_value(raw).map_err(|e| IntrospectError::Protocol {
        method: method.to_string(),
        detail: e.to_string(),
    })?;

    if !reply.ok {
        let message = reply.error.unwrap_or_else(|| "unknown agent failure".into());
        return Err(match reply.code.as_deref() {
            // A fresh document that has not run the init script yet.
            Some("not_installed") => IntrospectError::Transient(message),
            _ => IntrospectError::Agent {
                method: method.to_string(),
                message,
            },
        });
    }

    serde_json::from_value(reply.value).map_err(|e| IntrospectError::Protocol {
        method: method.to_string(),
        detail: e.to_string(),
    })
}

/// Call an agent method and decode its value.
pub async fn invoke<T: DeserializeOwned>(
    page: &dyn PageContext,
    method: &str,
    args: Value,
) -> Result<T, IntrospectError> {
    tracing::debug!(method, "calling page agent");
    let raw = page.evaluate(&call_expression(method, &args)).await?;
    decode_reply(method, raw)
}
