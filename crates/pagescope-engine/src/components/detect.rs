//! Framework detection from a page capability probe.

use std::collections::BTreeSet;

use serde::Deserialize;

use pagescope_types::Framework;

/// What the agent's `probe` found on the page. Gathered in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub react_hook: bool,
    pub react_renderers: u32,
    pub react_roots: u32,
    pub react_fiber_nodes: bool,
    pub vue_hook: bool,
    pub vue_apps: u32,
    pub vue_instance_nodes: bool,
    pub angular_probe: bool,
    pub angular_roots: u32,
}

/// Recognizes one framework from the probed capabilities.
pub trait FrameworkDetector: Send + Sync {
    fn framework(&self) -> Framework;

    fn detect(&self, caps: &Capabilities) -> bool;

    /// Whether the framework exposes a post-update signal.
    fn supports_render_tracking(&self) -> bool {
        true
    }
}

pub struct ReactDetector;

impl FrameworkDetector for ReactDetector {
    fn framework(&self) -> Framework {
        Framework::React
    }

    fn detect(&self, caps: &Capabilities) -> bool {
        // A bare devtools hook is installed by the agent itself, so it is
        // not evidence on its own.
        caps.react_renderers > 0 || caps.react_roots > 0 || caps.react_fiber_nodes
    }
}

pub struct VueDetector;

impl FrameworkDetector for VueDetector {
    fn framework(&self) -> Framework {
        Framework::Vue
    }

    fn detect(&self, caps: &Capabilities) -> bool {
        caps.vue_apps > 0 || caps.vue_instance_nodes
    }
}

pub struct AngularDetector;

impl FrameworkDetector for AngularDetector {
    fn framework(&self) -> Framework {
        Framework::Angular
    }

    fn detect(&self, caps: &Capabilities) -> bool {
        caps.angular_probe && caps.angular_roots > 0
    }

    fn supports_render_tracking(&self) -> bool {
        false
    }
}

/// Detectors in priority order.
pub fn default_detectors() -> Vec<Box<dyn FrameworkDetector>> {
    vec![
        Box::new(ReactDetector),
        Box::new(VueDetector),
        Box::new(AngularDetector),
    ]
}

/// Every framework any detector recognizes; `{Unknown}` when none does.
pub fn detect_frameworks(
    detectors: &[Box<dyn FrameworkDetector>],
    caps: &Capabilities,
) -> BTreeSet<Framework> {
    let mut found: BTreeSet<Framework> = detectors
        .iter()
        .filter(|d| d.detect(caps))
        .map(|d| d.framework())
        .collect();
    if found.is_empty() {
        found.insert(Framework::Unknown);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_reply_deserializes() {
        let caps: Capabilities = serde_json::from_value(serde_json::json!({
            "reactHook": true,
            "reactRenderers": 1,
            "reactRoots": 1,
            "reactFiberNodes": true,
            "vueHook": true,
            "vueApps": 0,
            "vueInstanceNodes": false,
            "angularProbe": false,
            "angularRoots": 0
        }))
        .unwrap();
        assert_eq!(caps.react_renderers, 1);
        assert!(!caps.vue_instance_nodes);
    }

    #[test]
    fn test_react_only() {
        let caps = Capabilities {
            react_hook: true,
            react_renderers: 1,
            vue_hook: true,
            ..Capabilities::default()
        };
        let found = detect_frameworks(&default_detectors(), &caps);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![Framework::React]);
    }

    #[test]
    fn test_several_frameworks_in_priority_order() {
        let caps = Capabilities {
            react_fiber_nodes: true,
            vue_apps: 1,
            angular_probe: true,
            angular_roots: 2,
            ..Capabilities::default()
        };
        let found: Vec<_> = detect_frameworks(&default_detectors(), &caps)
            .into_iter()
            .collect();
        assert_eq!(found, vec![Framework::React, Framework::Vue, Framework::Angular]);
    }

    #[test]
    fn test_hooks_without_runtime_are_unknown() {
        let caps = Capabilities {
            react_hook: true,
            vue_hook: true,
            angular_probe: true,
            ..Capabilities::default()
        };
        let found = detect_frameworks(&default_detectors(), &caps);
        assert!(found.contains(&Framework::Unknown));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_angular_has_no_render_signal() {
        assert!(!AngularDetector.supports_render_tracking());
        assert!(ReactDetector.supports_render_tracking());
    }
}
