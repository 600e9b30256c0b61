//! The query facade over one page.
//!
//! [`Introspector`] owns every piece of per-page state: the instrumentation
//! registry, source-map resolver, component tracker, network tracer, error
//! log, and the event pump that feeds them from the page's binding calls.
//! Instrumentation is installed lazily on the first query that needs it.
//!
//! Queries that race a navigation are retried once against the new
//! document; a second failure is reported in-band as
//! [`Lookup::Degraded`].

use std::collections::BTreeSet;
use std::future::Future;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use pagescope_browser::page::{binding_payload, is_main_frame_navigation};
use pagescope_browser::{CdpClient, CdpEvent, PageContext, PageDriver};
use pagescope_types::{
    ComponentId, ComponentInstance, ContentSlice, ContextValue, ErrorContext, Framework, HookInfo,
    Lookup, NetworkTrace, PagescopeConfig, RenderStats, ResolvedLocation, RootCauseReport,
    RuntimeError, SimilarErrors, StackTrace, TimingBreakdown,
};

use crate::agent::AgentOptions;
use crate::components::{ComponentTracker, ComponentTree};
use crate::correlate::{ComponentSource, ErrorCorrelator, ErrorLog};
use crate::error::IntrospectError;
use crate::injector::{InstallReport, InstrumentationRegistry};
use crate::manifest::{BuildManifest, ModuleInfo};
use crate::network::{Completion, NetworkTracer};
use crate::protocol::{parse_event, EventHub, PageEvent};
use crate::sourcemap::SourceLocationResolver;

/// Where the event pump delivers page events.
struct EventSinks {
    binding: String,
    network: Arc<NetworkTracer>,
    errors: Arc<ErrorLog>,
    hub: Arc<EventHub>,
}

impl EventSinks {
    fn route(&self, event: &CdpEvent) {
        if is_main_frame_navigation(event) {
            let url = event
                .params
                .get("frame")
                .and_then(|f| f.get("url"))
                .and_then(|u| u.as_str())
                .unwrap_or_default();
            tracing::info!(url, "main frame navigated");
            self.hub.advance_navigation();
            return;
        }

        let Some(payload) = binding_payload(event, &self.binding) else {
            return;
        };
        match parse_event(payload) {
            Ok(PageEvent::Dispatch(dispatch)) => {
                self.network.record_dispatch(dispatch);
            }
            Ok(PageEvent::Complete(complete)) => {
                self.network.record_completion(Completion::from(complete));
            }
            Ok(PageEvent::Failed(failed)) => {
                self.network.record_completion(Completion::from(failed));
            }
            Ok(PageEvent::Render(signal)) => self.hub.publish_render(signal),
            Ok(PageEvent::Error(error)) => {
                tracing::debug!(message = %error.message, "page error recorded");
                self.errors.record(error);
            }
            Err(e) => {
                tracing::warn!(error = %e, len = payload.len(), "dropping malformed page event");
            }
        }
    }
}

async fn pump(mut events: broadcast::Receiver<CdpEvent>, sinks: EventSinks) {
    loop {
        match events.recv().await {
            Ok(event) => sinks.route(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "page event pump lagged; events dropped");
            }
            Err(RecvError::Closed) => {
                tracing::debug!("page event stream closed");
                break;
            }
        }
    }
}

pub struct Introspector<P: PageContext> {
    page: Arc<P>,
    config: PagescopeConfig,
    registry: InstrumentationRegistry,
    resolver: Arc<SourceLocationResolver>,
    components: Arc<ComponentTracker>,
    network: Arc<NetworkTracer>,
    errors: Arc<ErrorLog>,
    hub: Arc<EventHub>,
    correlator: ErrorCorrelator,
    manifest: RwLock<Option<BuildManifest>>,
    pump: JoinHandle<()>,
}

impl Introspector<PageDriver> {
    /// Attach to a page target over its DevTools WebSocket URL.
    pub async fn connect(ws_url: &str, config: PagescopeConfig) -> Result<Self, IntrospectError> {
        let client = CdpClient::connect(ws_url)
            .await?
            .with_command_timeout(Duration::from_millis(config.session.command_timeout_ms));
        let driver = PageDriver::from_client(client).await?;
        Ok(Self::new(Arc::new(driver), config))
    }
}

impl<P: PageContext> Introspector<P> {
    /// Must be called inside a tokio runtime; the event pump is spawned
    /// immediately so no event after this call is missed.
    pub fn new(page: Arc<P>, config: PagescopeConfig) -> Self {
        let resolver = SourceLocationResolver::new(&config.resolver);
        Self::with_resolver(page, config, resolver)
    }

    pub fn with_resolver(
        page: Arc<P>,
        config: PagescopeConfig,
        resolver: SourceLocationResolver,
    ) -> Self {
        let dyn_page: Arc<dyn PageContext> = page.clone();
        let hub = Arc::new(EventHub::new());
        let network = Arc::new(NetworkTracer::new(config.network.max_traces));
        let errors = Arc::new(ErrorLog::new(config.correlation.max_error_history));
        let resolver = Arc::new(resolver);
        let components = Arc::new(ComponentTracker::new(
            Arc::clone(&dyn_page),
            config.components.clone(),
            Arc::clone(&hub),
        ));
        let registry = InstrumentationRegistry::new(
            dyn_page,
            AgentOptions {
                binding: config.session.binding_name.clone(),
                max_body_bytes: config.network.max_body_bytes,
            },
        );

        let sinks = EventSinks {
            binding: config.session.binding_name.clone(),
            network: Arc::clone(&network),
            errors: Arc::clone(&errors),
            hub: Arc::clone(&hub),
        };
        let pump = tokio::spawn(pump(page.subscribe(), sinks));

        let correlator = ErrorCorrelator::new(
            Arc::clone(&resolver),
            Arc::clone(&network),
            Arc::clone(&errors),
        );

        Self {
            page,
            config,
            registry,
            resolver,
            components,
            network,
            errors,
            hub,
            correlator,
            manifest: RwLock::new(None),
            pump,
        }
    }

    pub fn page(&self) -> &Arc<P> {
        &self.page
    }

    pub fn config(&self) -> &PagescopeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SourceLocationResolver {
        &self.resolver
    }

    pub fn navigation_epoch(&self) -> u64 {
        self.hub.navigation_epoch()
    }

    /// Install instrumentation now instead of on first use.
    pub async fn install(&self) -> Result<InstallReport, IntrospectError> {
        self.registry.install().await
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, query: F) -> Result<Lookup<T>, IntrospectError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Lookup<T>, IntrospectError>>,
    {
        self.registry.install().await?;
        let first = match query().await {
            Err(e) if e.is_transient() => e,
            other => return other,
        };

        tracing::info!(op, error = %first, "page changed during query; retrying");
        if let Err(e) = self.registry.install_current_document().await {
            tracing::warn!(op, error = %e, "could not reinstall agent after navigation");
            return Ok(Lookup::degraded(format!("{op}: page agent unavailable after navigation ({e})")));
        }
        match query().await {
            Err(e) if e.is_transient() => {
                tracing::warn!(op, error = %e, "query failed twice across navigations");
                Ok(Lookup::degraded(format!("{op}: page navigated during the query ({e})")))
            }
            other => other,
        }
    }

    // -- source locations -------------------------------------------------

    pub async fn resolve_location(&self, bundle: &str, line: u32, column: u32) -> ResolvedLocation {
        self.resolver.resolve(bundle, line, column).await
    }

    pub async fn resolve_location_with_override(
        &self,
        bundle: &str,
        line: u32,
        column: u32,
        map_path: &Path,
    ) -> ResolvedLocation {
        self.resolver
            .resolve_with_override(bundle, line, column, map_path)
            .await
    }

    pub async fn trace_stack(&self, stack: &str) -> StackTrace {
        self.resolver.trace_stack(stack).await
    }

    pub fn source_content(&self, file: &str, lines: RangeInclusive<u32>) -> ContentSlice {
        self.resolver.get_content(file, lines)
    }

    // -- components ---------------------------------------------------------

    pub async fn detect_frameworks(&self) -> Result<Lookup<BTreeSet<Framework>>, IntrospectError> {
        self.with_retry("detect_frameworks", || async {
            Ok::<_, IntrospectError>(Lookup::Found(self.components.detect().await?))
        })
        .await
    }

    pub async fn component_tree(
        &self,
        selector: Option<&str>,
    ) -> Result<Lookup<ComponentTree>, IntrospectError> {
        self.with_retry("component_tree", || self.components.build_tree(selector))
            .await
    }

    pub async fn component_detail(
        &self,
        id: &ComponentId,
    ) -> Result<Lookup<ComponentInstance>, IntrospectError> {
        self.with_retry("component_detail", || self.components.get_detail(id))
            .await
    }

    pub async fn component_props(&self, id: &ComponentId) -> Result<Lookup<serde_json::Value>, IntrospectError> {
        self.with_retry("component_props", || self.components.get_props(id))
            .await
    }

    pub async fn component_state(&self, id: &ComponentId) -> Result<Lookup<serde_json::Value>, IntrospectError> {
        self.with_retry("component_state", || self.components.get_state(id))
            .await
    }

    pub async fn component_hooks(&self, id: &ComponentId) -> Result<Lookup<Vec<HookInfo>>, IntrospectError> {
        self.with_retry("component_hooks", || self.components.get_hooks(id))
            .await
    }

    pub async fn component_context(
        &self,
        id: &ComponentId,
    ) -> Result<Lookup<Vec<ContextValue>>, IntrospectError> {
        self.with_retry("component_context", || self.components.get_context(id))
            .await
    }

    /// Not retried: a navigation ends the window and is reported as such.
    pub async fn track_renders(
        &self,
        id: &ComponentId,
        window: Duration,
        max_events: Option<usize>,
    ) -> Result<Lookup<RenderStats>, IntrospectError> {
        self.registry.install().await?;
        match self.components.track_renders(id, window, max_events).await {
            Err(e) if e.is_transient() => Ok(Lookup::degraded(format!(
                "track_renders: page navigated before the window opened ({e})"
            ))),
            other => other,
        }
    }

    // -- network ------------------------------------------------------------

    /// Traces whose URL matches `pattern` (glob syntax), oldest first.
    pub async fn network_traces(
        &self,
        pattern: Option<&str>,
    ) -> Result<Vec<NetworkTrace>, IntrospectError> {
        self.registry.install().await?;
        self.network
            .get_by_pattern(pattern)
            .map_err(|source| IntrospectError::InvalidPattern {
                pattern: pattern.unwrap_or_default().to_string(),
                source,
            })
    }

    pub fn network_trace(&self, id: &str) -> Lookup<NetworkTrace> {
        self.network.get(id)
    }

    pub fn timing(&self, id: &str) -> Lookup<TimingBreakdown> {
        self.network.get_timing(id)
    }

    // -- errors -------------------------------------------------------------

    fn window_or_default(&self, window_ms: Option<u64>) -> u64 {
        window_ms.unwrap_or(self.config.correlation.default_window_ms)
    }

    pub async fn correlate_error(
        &self,
        error: &RuntimeError,
        window_ms: Option<u64>,
        selector: Option<&str>,
    ) -> Result<ErrorContext, IntrospectError> {
        self.registry.install().await?;
        Ok(self
            .correlator
            .correlate(error, self.window_or_default(window_ms), selector, self)
            .await)
    }

    pub fn find_similar(&self, error: &RuntimeError) -> SimilarErrors {
        self.correlator.find_similar(error)
    }

    pub fn find_root_cause(&self, error: &RuntimeError, window_ms: Option<u64>) -> RootCauseReport {
        self.correlator
            .find_root_cause(error, self.window_or_default(window_ms))
    }

    /// Errors the page reported, most recent first.
    pub fn recent_errors(&self, limit: usize) -> Vec<RuntimeError> {
        self.errors.recent(limit)
    }

    // -- build manifest -------------------------------------------------------

    pub fn set_manifest(&self, manifest: BuildManifest) {
        *self.manifest.write() = Some(manifest);
    }

    pub fn module_info(&self, module: &str) -> Lookup<ModuleInfo> {
        match self.manifest.read().as_ref() {
            Some(manifest) => manifest.module_info(module),
            None => Lookup::not_found("no build manifest loaded"),
        }
    }
}

#[async_trait]
impl<P: PageContext> ComponentSource for Introspector<P> {
    async fn tree(&self, selector: Option<&str>) -> Result<Lookup<ComponentTree>, IntrospectError> {
        self.component_tree(selector).await
    }

    async fn detail(&self, id: &ComponentId) -> Result<Lookup<ComponentInstance>, IntrospectError> {
        self.component_detail(id).await
    }
}

impl<P: PageContext> Drop for Introspector<P> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
