//! Component state tracking.
//!
//! The tracker detects which UI frameworks the page runs, asks the page
//! agent to walk their live component trees, and assembles the flat records
//! it gets back into a [`ComponentTree`]. Component data (props, state,
//! hooks, context) is always a read-only snapshot taken page-side.
//!
//! Lookups of things that are not there (a selector matching nothing, an id
//! that no longer exists) are [`Lookup::NotFound`], never errors.

pub mod detect;
pub mod hooks;
pub mod renders;
pub mod tree;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use pagescope_browser::PageContext;
use pagescope_types::{
    ComponentId, ComponentInstance, ComponentNode, ComponentsConfig, ContextValue, DomRef,
    Framework, HookInfo, Lookup, RenderEnd, RenderStats,
};

use crate::agent;
use crate::error::IntrospectError;
use crate::protocol::EventHub;

pub use detect::{Capabilities, FrameworkDetector};
pub use renders::RenderSubscription;
pub use tree::{ComponentRecord, ComponentTree};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeReply {
    found: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    records: Vec<ComponentRecord>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeReply {
    id: ComponentId,
    name: String,
    #[serde(default)]
    parent: Option<ComponentId>,
    #[serde(default)]
    depth: u32,
    #[serde(default)]
    children: Vec<ComponentId>,
    #[serde(default)]
    dom: Option<DomRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectReply {
    found: bool,
    #[serde(default)]
    message: Option<String>,
    node: Option<NodeReply>,
    #[serde(default)]
    props: Value,
    #[serde(default)]
    state: Value,
    #[serde(default)]
    hooks: Vec<hooks::RawHook>,
    #[serde(default)]
    context: Vec<ContextValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeReply {
    found: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
}

pub struct ComponentTracker {
    page: Arc<dyn PageContext>,
    config: ComponentsConfig,
    detectors: Vec<Box<dyn FrameworkDetector>>,
    hub: Arc<EventHub>,
    /// Framework of every id seen in the current document, so detail
    /// queries go straight to the right adapter. Tagged with the navigation
    /// epoch it was filled in.
    known: Mutex<(u64, HashMap<ComponentId, Framework>)>,
}

impl ComponentTracker {
    pub fn new(page: Arc<dyn PageContext>, config: ComponentsConfig, hub: Arc<EventHub>) -> Self {
        Self {
            page,
            config,
            detectors: detect::default_detectors(),
            hub,
            known: Mutex::new((0, HashMap::new())),
        }
    }

    pub async fn capabilities(&self) -> Result<Capabilities, IntrospectError> {
        agent::invoke(self.page.as_ref(), "probe", json!({})).await
    }

    /// Detected frameworks; `{Unknown}` when none is recognized.
    pub async fn detect(&self) -> Result<BTreeSet<Framework>, IntrospectError> {
        let caps = self.capabilities().await?;
        let found = detect::detect_frameworks(&self.detectors, &caps);
        tracing::debug!(frameworks = ?found, "framework detection");
        Ok(found)
    }

    async fn supported_frameworks(&self) -> Result<Vec<Framework>, IntrospectError> {
        Ok(self
            .detect()
            .await?
            .into_iter()
            .filter(|f| *f != Framework::Unknown)
            .collect())
    }

    /// Walk the component tree of every detected framework, from its roots
    /// or from the component owning the element `selector` matches.
    pub async fn build_tree(
        &self,
        selector: Option<&str>,
    ) -> Result<Lookup<ComponentTree>, IntrospectError> {
        let frameworks = self.supported_frameworks().await?;
        if frameworks.is_empty() {
            return Ok(match selector {
                Some(selector) => Lookup::not_found(format!(
                    "no supported UI framework detected; nothing owns the element matching {selector:?}"
                )),
                None => Lookup::Found(ComponentTree::assemble(
                    vec![(Framework::Unknown, Vec::new())],
                    false,
                )),
            });
        }

        let mut batches = Vec::new();
        let mut truncated = false;
        let mut messages: Vec<String> = Vec::new();
        for framework in frameworks {
            let reply: TreeReply = agent::invoke(
                self.page.as_ref(),
                "buildTree",
                json!({
                    "framework": framework.as_str(),
                    "selector": selector,
                    "maxDepth": self.config.max_tree_depth,
                    "maxNodes": self.config.max_tree_nodes,
                }),
            )
            .await?;
            if reply.found {
                truncated |= reply.truncated;
                batches.push((framework, reply.records));
            } else if let Some(message) = reply.message {
                if !messages.contains(&message) {
                    messages.push(message);
                }
            }
        }

        if batches.is_empty() {
            let message = if messages.is_empty() {
                "no component tree found".to_string()
            } else {
                messages.join("; ")
            };
            return Ok(Lookup::not_found(message));
        }

        let tree = ComponentTree::assemble(batches, truncated);
        for node in tree.nodes() {
            self.remember(&node.id, node.framework);
        }
        if tree.is_truncated() {
            tracing::warn!(
                nodes = tree.len(),
                max_depth = self.config.max_tree_depth,
                max_nodes = self.config.max_tree_nodes,
                "component tree truncated"
            );
        }
        Ok(Lookup::Found(tree))
    }

    fn remember(&self, id: &ComponentId, framework: Framework) {
        let epoch = self.hub.navigation_epoch();
        let mut known = self.known.lock();
        if known.0 != epoch {
            *known = (epoch, HashMap::new());
        }
        known.1.insert(id.clone(), framework);
    }

    fn forget(&self, id: &ComponentId) {
        self.known.lock().1.remove(id);
    }

    fn known_framework(&self, id: &ComponentId) -> Option<Framework> {
        let known = self.known.lock();
        if known.0 != self.hub.navigation_epoch() {
            return None;
        }
        known.1.get(id).copied()
    }

    /// Frameworks to ask about `id`, most likely first.
    async fn frameworks_for(&self, id: &ComponentId) -> Result<Vec<Framework>, IntrospectError> {
        if let Some(framework) = self.known_framework(id) {
            return Ok(vec![framework]);
        }
        self.supported_frameworks().await
    }

    pub async fn get_detail(
        &self,
        id: &ComponentId,
    ) -> Result<Lookup<ComponentInstance>, IntrospectError> {
        let mut last_message = None;
        for framework in self.frameworks_for(id).await? {
            let reply: InspectReply = agent::invoke(
                self.page.as_ref(),
                "inspect",
                json!({
                    "framework": framework.as_str(),
                    "id": id,
                    "maxDepth": self.config.max_snapshot_depth,
                }),
            )
            .await?;
            if !reply.found {
                last_message = reply.message;
                continue;
            }
            let Some(node) = reply.node else {
                return Err(IntrospectError::Protocol {
                    method: "inspect".into(),
                    detail: "found component without a node".into(),
                });
            };
            self.remember(&node.id, framework);
            return Ok(Lookup::Found(ComponentInstance {
                node: ComponentNode {
                    id: node.id,
                    name: node.name,
                    framework,
                    depth: node.depth,
                    parent: node.parent,
                    children: node.children,
                    dom: node.dom,
                },
                props: reply.props,
                state: reply.state,
                hooks: hooks::classify_all(reply.hooks),
                context: reply.context,
            }));
        }
        // The id may belong to a component that has since unmounted.
        self.forget(id);
        Ok(Lookup::not_found(
            last_message.unwrap_or_else(|| format!("no component with id {id}")),
        ))
    }

    pub async fn get_props(&self, id: &ComponentId) -> Result<Lookup<Value>, IntrospectError> {
        Ok(self.get_detail(id).await?.map(|c| c.props))
    }

    pub async fn get_state(&self, id: &ComponentId) -> Result<Lookup<Value>, IntrospectError> {
        Ok(self.get_detail(id).await?.map(|c| c.state))
    }

    pub async fn get_hooks(&self, id: &ComponentId) -> Result<Lookup<Vec<HookInfo>>, IntrospectError> {
        Ok(self.get_detail(id).await?.map(|c| c.hooks))
    }

    /// Active context values. Empty for frameworks without a context
    /// primitive.
    pub async fn get_context(
        &self,
        id: &ComponentId,
    ) -> Result<Lookup<Vec<ContextValue>>, IntrospectError> {
        Ok(self.get_detail(id).await?.map(|c| c.context))
    }

    /// Count renders of `id` over `window`, stopping early after
    /// `max_events` (capped by configuration).
    pub async fn track_renders(
        &self,
        id: &ComponentId,
        window: Duration,
        max_events: Option<usize>,
    ) -> Result<Lookup<RenderStats>, IntrospectError> {
        let frameworks = self.frameworks_for(id).await?;
        let cap = max_events
            .unwrap_or(self.config.max_render_events)
            .clamp(1, self.config.max_render_events.max(1));

        let mut unsupported = None;
        let mut last_message = None;
        for framework in frameworks {
            let trackable = self
                .detectors
                .iter()
                .find(|d| d.framework() == framework)
                .map_or(false, |d| d.supports_render_tracking());
            if !trackable {
                unsupported = Some(format!("{framework} does not expose an update signal"));
                continue;
            }

            let renders = self.hub.subscribe_renders();
            let navigation = self.hub.watch_navigation();
            let reply: SubscribeReply = agent::invoke(
                self.page.as_ref(),
                "subscribeRenders",
                json!({ "framework": framework.as_str(), "id": id }),
            )
            .await?;
            let (true, Some(subscription_id)) = (reply.found, reply.subscription) else {
                last_message = reply.message;
                continue;
            };

            let subscription = RenderSubscription::new(Arc::clone(&self.page), subscription_id);
            tracing::debug!(component = %id, subscription = %subscription.id(), "render window open");
            let (events, ended_by) =
                renders::collect(&subscription, renders, navigation, window, cap).await;

            if ended_by == RenderEnd::Navigation {
                subscription.release_local();
            } else if let Err(e) = subscription.release().await {
                tracing::warn!(subscription = %subscription.id(), error = %e, "render release failed");
            }

            let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
            return Ok(Lookup::Found(RenderStats::from_events(
                id.clone(),
                window_ms,
                events,
                ended_by,
            )));
        }

        Ok(match (last_message, unsupported) {
            (Some(message), _) => Lookup::not_found(message),
            (None, Some(reason)) => Lookup::degraded(reason),
            (None, None) => Lookup::not_found(format!("no component with id {id}")),
        })
    }
}
