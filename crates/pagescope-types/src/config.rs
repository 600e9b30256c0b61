//! Runtime configuration for an introspection session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the per-directory configuration file.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Top-level configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagescopeConfig {
    pub resolver: ResolverConfig,
    pub components: ComponentsConfig,
    pub network: NetworkConfig,
    pub correlation: CorrelationConfig,
    pub session: SessionConfig,
}

/// Source location resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of parsed source maps kept in memory.
    pub cache_capacity: usize,
    /// Timeout for fetching a bundle or map file.
    pub fetch_timeout_ms: u64,
    /// Directory searched for `<bundle file name>.map` overrides.
    pub override_dir: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 50,
            fetch_timeout_ms: 10_000,
            override_dir: None,
        }
    }
}

/// Component state tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsConfig {
    pub max_tree_depth: u32,
    pub max_tree_nodes: usize,
    /// Nesting depth of props/state snapshots before values are summarized.
    pub max_snapshot_depth: u32,
    /// Render events buffered per tracking window.
    pub max_render_events: usize,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 64,
            max_tree_nodes: 2_000,
            max_snapshot_depth: 4,
            max_render_events: 1_000,
        }
    }
}

/// Network activity tracer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Traces retained; the oldest are evicted first.
    pub max_traces: usize,
    /// Request/response bodies are truncated to this many bytes page-side.
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_traces: 500,
            max_body_bytes: 4_096,
        }
    }
}

/// Error correlator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub default_window_ms: u64,
    pub max_error_history: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_window_ms: 5_000,
            max_error_history: 200,
        }
    }
}

/// Page session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub command_timeout_ms: u64,
    /// Name of the CDP binding the page agent emits events through.
    pub binding_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            binding_name: "__pagescopeEmit".into(),
        }
    }
}

impl PagescopeConfig {
    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "resolver.cache_capacity must be at least 1".into(),
            ));
        }
        if self.components.max_tree_depth == 0 {
            return Err(ConfigError::Invalid(
                "components.max_tree_depth must be at least 1".into(),
            ));
        }
        if self.components.max_tree_nodes == 0 {
            return Err(ConfigError::Invalid(
                "components.max_tree_nodes must be at least 1".into(),
            ));
        }
        if self.network.max_traces == 0 {
            return Err(ConfigError::Invalid(
                "network.max_traces must be at least 1".into(),
            ));
        }
        let binding = &self.session.binding_name;
        if binding.is_empty()
            || !binding
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(ConfigError::Invalid(format!(
                "session.binding_name must be a JavaScript identifier, got {binding:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PagescopeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.resolver.cache_capacity, 50);
        assert_eq!(config.session.binding_name, "__pagescopeEmit");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PagescopeConfig = toml::from_str("[resolver]\ncache_capacity = 8\n").unwrap();
        assert_eq!(config.resolver.cache_capacity, 8);
        assert_eq!(config.resolver.fetch_timeout_ms, 10_000);
        assert_eq!(config.network.max_traces, 500);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = PagescopeConfig::default();
        config.resolver.cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_binding_name_must_be_identifier() {
        let mut config = PagescopeConfig::default();
        config.session.binding_name = "emit(); alert(1)".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("binding_name"));
    }
}
