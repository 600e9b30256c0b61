//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use pagescope_browser::page::{binding_event, main_frame_navigated_event};
use pagescope_browser::{BrowserError, CdpEvent, PageContext};
use pagescope_engine::sourcemap::vlq;
use pagescope_types::PagescopeConfig;

pub const BINDING: &str = "__pagescopeEmit";

const CALL_PREFIX: &str = "(function(){var a=window.__pagescope__;";
const CALL_SUFFIX: &str = ");})()";

type Handler = Box<dyn Fn(&Value) -> Result<Value, BrowserError> + Send + Sync>;

/// A scripted page.
///
/// Agent calls are answered by per-method handlers registered with
/// [`FakePage::on`]; the handler's value is wrapped in the agent's
/// `{ok: true, value}` envelope. Evaluating the agent script itself reports
/// a fresh install the first time and an existing one afterwards.
pub struct FakePage {
    events: broadcast::Sender<CdpEvent>,
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
    bindings: Mutex<Vec<String>>,
    init_scripts: Mutex<Vec<String>>,
    agent_evaluations: AtomicUsize,
    binding_failure: Mutex<Option<String>>,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        init_tracing();
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            events,
            handlers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            bindings: Mutex::new(Vec::new()),
            init_scripts: Mutex::new(Vec::new()),
            agent_evaluations: AtomicUsize::new(0),
            binding_failure: Mutex::new(None),
        })
    }

    /// Answer `method` with `handler(args)`.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, BrowserError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .insert(method.to_string(), Box::new(handler));
    }

    /// Answer `method` with a fixed value.
    pub fn reply(&self, method: &str, value: Value) {
        self.on(method, move |_| Ok(value.clone()));
    }

    /// Deliver a binding payload as the agent would.
    pub fn emit(&self, payload: Value) {
        let _ = self.events.send(binding_event(BINDING, &payload.to_string()));
    }

    pub fn sender(&self) -> broadcast::Sender<CdpEvent> {
        self.events.clone()
    }

    pub fn navigate(&self, url: &str) {
        let _ = self.events.send(main_frame_navigated_event(url));
    }

    /// Fail binding registration with `message` until cleared with `None`.
    pub fn reject_bindings(&self, message: Option<&str>) {
        *self.binding_failure.lock() = message.map(str::to_string);
    }

    /// Agent methods called so far, with their arguments.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    pub fn bindings(&self) -> Vec<String> {
        self.bindings.lock().clone()
    }

    pub fn init_scripts(&self) -> usize {
        self.init_scripts.lock().len()
    }

    pub fn agent_evaluations(&self) -> usize {
        self.agent_evaluations.load(Ordering::SeqCst)
    }
}

/// Split `a.call("method",{...})` out of an agent call expression.
fn parse_call(expression: &str) -> Option<(String, Value)> {
    let start = expression.find("a.call(")? + "a.call(".len();
    let body = expression[start..].strip_suffix(CALL_SUFFIX)?;
    let parsed: Value = serde_json::from_str(&format!("[{body}]")).ok()?;
    let method = parsed.get(0)?.as_str()?.to_string();
    Some((method, parsed.get(1).cloned().unwrap_or(Value::Null)))
}

#[async_trait]
impl PageContext for FakePage {
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        if !expression.starts_with(CALL_PREFIX) {
            let previous = self.agent_evaluations.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({ "fresh": previous == 0, "version": 1 }));
        }

        let (method, args) = parse_call(expression).ok_or_else(|| BrowserError::Protocol {
            detail: format!("unrecognized expression: {expression}"),
        })?;
        self.calls.lock().push((method.clone(), args.clone()));

        let handlers = self.handlers.lock();
        match handlers.get(&method) {
            Some(handler) => Ok(json!({ "ok": true, "value": handler(&args)? })),
            None => Ok(json!({ "ok": false, "error": format!("no handler for {method}") })),
        }
    }

    async fn add_init_script(&self, source: &str) -> Result<String, BrowserError> {
        let mut scripts = self.init_scripts.lock();
        scripts.push(source.to_string());
        Ok(scripts.len().to_string())
    }

    async fn add_binding(&self, name: &str) -> Result<(), BrowserError> {
        if let Some(message) = self.binding_failure.lock().clone() {
            return Err(BrowserError::CdpError {
                code: -32000,
                message,
                data: None,
            });
        }
        self.bindings.lock().push(name.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

/// Route engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// The error CDP reports when the page navigated mid-command.
pub fn context_destroyed() -> BrowserError {
    BrowserError::CdpError {
        code: -32000,
        message: "Execution context was destroyed.".into(),
        data: None,
    }
}

pub fn config() -> PagescopeConfig {
    PagescopeConfig::default()
}

/// Let the event pump drain what has been emitted.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Probe reply for a page running React.
pub fn react_probe() -> Value {
    json!({
        "reactHook": true,
        "reactRenderers": 1,
        "reactRoots": 1,
        "reactFiberNodes": true,
        "vueHook": false,
        "vueApps": 0,
        "vueInstanceNodes": false,
        "angularProbe": false,
        "angularRoots": 0
    })
}

/// Probe reply for a page with no recognizable framework.
pub fn empty_probe() -> Value {
    json!({})
}

/// `App > (Header, List > Item)` as the agent's buildTree reports it.
pub fn app_tree() -> Value {
    json!({
        "found": true,
        "truncated": false,
        "records": [
            {"id": "d1:App", "name": "App", "parent": null, "depth": 0, "dom": 1},
            {"id": "d2:Header", "name": "Header", "parent": "d1:App", "depth": 1, "dom": 2},
            {"id": "d3:List", "name": "List", "parent": "d1:App", "depth": 1, "dom": 3},
            {"id": "d4:Item", "name": "Item", "parent": "d3:List", "depth": 2, "dom": 4}
        ]
    })
}

/// A one-segment source map placing bundle `1:gen_column` at
/// `source:line:column` (all 1-based).
pub fn single_mapping(source: &str, gen_column: u32, line: u32, column: u32) -> String {
    json!({
        "version": 3,
        "sources": [source],
        "names": [],
        "mappings": vlq::encode_segment(&[
            i64::from(gen_column - 1),
            0,
            i64::from(line - 1),
            i64::from(column - 1),
        ]),
    })
    .to_string()
}

/// A bundle whose source map is inlined as a base64 data URL.
pub fn bundle_with_inline_map(map: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(map);
    format!("render();\n//# sourceMappingURL=data:application/json;base64,{encoded}\n")
}

pub fn error_at(message: &str, stack: &str, timestamp: f64) -> pagescope_types::RuntimeError {
    pagescope_types::RuntimeError {
        message: message.into(),
        stack: stack.into(),
        timestamp,
        source: None,
    }
}
