//! Layered configuration loading.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`PagescopeConfig::default()`])
//! 2. User-level: `~/.pagescope/config.toml`
//! 3. Workspace-level: `./.pagescope/config.toml`
//! 4. `PAGESCOPE_*` environment variables
//!
//! Each overridden field in the final [`EffectiveConfig`] is annotated with
//! the [`ConfigSource`] that determined its value.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{PagescopeConfig, CONFIG_FILENAME};
use crate::error::ConfigError;

/// Config files larger than this are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    BuiltinDefault,
    UserFile(PathBuf),
    WorkspaceFile(PathBuf),
    EnvVar(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::BuiltinDefault => write!(f, "built-in default"),
            ConfigSource::UserFile(p) => write!(f, "user file: {}", p.display()),
            ConfigSource::WorkspaceFile(p) => write!(f, "workspace file: {}", p.display()),
            ConfigSource::EnvVar(name) => write!(f, "env var: {name}"),
        }
    }
}

/// The merged config plus provenance for each overridden field.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: PagescopeConfig,
    /// Dotted field path -> the source that determined its value.
    pub sources: HashMap<String, ConfigSource>,
    /// Config files that were found and loaded, in priority order.
    pub source_files: Vec<PathBuf>,
}

/// Loads and merges configuration from all layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    workspace_config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_config_path = Some(path);
        self
    }

    /// Load from files and the process environment.
    pub fn load(&self) -> Result<EffectiveConfig, ConfigError> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Load with a caller-supplied environment lookup.
    pub fn load_with_env<F>(&self, env: F) -> Result<EffectiveConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = HashMap::new();
        let mut source_files = Vec::new();

        let mut merged = toml::Value::try_from(PagescopeConfig::default()).map_err(|e| {
            ConfigError::Parse {
                origin: "defaults".into(),
                reason: e.to_string(),
            }
        })?;
        if let toml::Value::Table(ref table) = merged {
            for key in table.keys() {
                sources.insert(key.clone(), ConfigSource::BuiltinDefault);
            }
        }

        let user_path = self.user_config_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".pagescope").join(CONFIG_FILENAME)
        });
        if user_path.exists() {
            let layer = read_layer(&user_path)?;
            deep_merge(&mut merged, &layer);
            record_sources(&layer, "", &mut sources, &ConfigSource::UserFile(user_path.clone()));
            source_files.push(user_path);
        }

        let workspace_path = self
            .workspace_config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".pagescope").join(CONFIG_FILENAME));
        if workspace_path.exists() {
            let layer = read_layer(&workspace_path)?;
            deep_merge(&mut merged, &layer);
            record_sources(
                &layer,
                "",
                &mut sources,
                &ConfigSource::WorkspaceFile(workspace_path.clone()),
            );
            source_files.push(workspace_path);
        }

        apply_env_overrides(&mut merged, &mut sources, env)?;

        let config: PagescopeConfig = merged.try_into().map_err(|e: toml::de::Error| {
            ConfigError::Parse {
                origin: "merged config".into(),
                reason: e.to_string(),
            }
        })?;
        config.validate()?;

        tracing::debug!(files = source_files.len(), "configuration loaded");

        Ok(EffectiveConfig {
            config,
            sources,
            source_files,
        })
    }
}

fn read_layer(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = read_config_file(path)?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        origin: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Read a config file with a size limit and a NUL-byte check.
fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    let read_err = |e: std::io::Error| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let metadata = std::fs::metadata(path).map_err(read_err)?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Read {
            path: path.display().to_string(),
            reason: format!(
                "file exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes (actual: {})",
                metadata.len()
            ),
        });
    }
    let content = std::fs::read_to_string(path).map_err(read_err)?;
    if content.contains('\0') {
        return Err(ConfigError::Read {
            path: path.display().to_string(),
            reason: "file contains null bytes".into(),
        });
    }
    Ok(content)
}

/// Recursively merge `overlay` into `base`. Tables merge; everything else replaces.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn record_sources(
    layer: &toml::Value,
    prefix: &str,
    sources: &mut HashMap<String, ConfigSource>,
    source: &ConfigSource,
) {
    if let toml::Value::Table(table) = layer {
        for (key, value) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if value.is_table() {
                record_sources(value, &path, sources, source);
            } else {
                sources.insert(path, source.clone());
            }
        }
    }
}

struct EnvMapping {
    env_var: &'static str,
    toml_path: &'static [&'static str],
    kind: EnvKind,
}

#[derive(Clone, Copy)]
enum EnvKind {
    Integer,
    Text,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "PAGESCOPE_RESOLVER__CACHE_CAPACITY",
        toml_path: &["resolver", "cache_capacity"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_RESOLVER__FETCH_TIMEOUT_MS",
        toml_path: &["resolver", "fetch_timeout_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_RESOLVER__OVERRIDE_DIR",
        toml_path: &["resolver", "override_dir"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "PAGESCOPE_COMPONENTS__MAX_TREE_DEPTH",
        toml_path: &["components", "max_tree_depth"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_COMPONENTS__MAX_TREE_NODES",
        toml_path: &["components", "max_tree_nodes"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_COMPONENTS__MAX_SNAPSHOT_DEPTH",
        toml_path: &["components", "max_snapshot_depth"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_COMPONENTS__MAX_RENDER_EVENTS",
        toml_path: &["components", "max_render_events"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_NETWORK__MAX_TRACES",
        toml_path: &["network", "max_traces"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_NETWORK__MAX_BODY_BYTES",
        toml_path: &["network", "max_body_bytes"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_CORRELATION__DEFAULT_WINDOW_MS",
        toml_path: &["correlation", "default_window_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_CORRELATION__MAX_ERROR_HISTORY",
        toml_path: &["correlation", "max_error_history"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_SESSION__COMMAND_TIMEOUT_MS",
        toml_path: &["session", "command_timeout_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "PAGESCOPE_SESSION__BINDING_NAME",
        toml_path: &["session", "binding_name"],
        kind: EnvKind::Text,
    },
];

fn apply_env_overrides<F>(
    merged: &mut toml::Value,
    sources: &mut HashMap<String, ConfigSource>,
    env: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env(mapping.env_var) else {
            continue;
        };
        if raw.chars().any(|c| c.is_control()) {
            return Err(ConfigError::Env {
                var: mapping.env_var.into(),
                reason: "contains control characters".into(),
            });
        }
        let value = match mapping.kind {
            EnvKind::Integer => {
                let n: i64 = raw.trim().parse().map_err(|_| ConfigError::Env {
                    var: mapping.env_var.into(),
                    reason: format!("expected an integer, got {raw:?}"),
                })?;
                toml::Value::Integer(n)
            }
            EnvKind::Text => toml::Value::String(raw),
        };
        set_nested_value(merged, mapping.toml_path, value);
        sources.insert(
            mapping.toml_path.join("."),
            ConfigSource::EnvVar(mapping.env_var.to_string()),
        );
    }
    Ok(())
}

fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for segment in parents {
        let toml::Value::Table(table) = cursor else {
            return;
        };
        cursor = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let toml::Value::Table(table) = cursor {
        table.insert(last.to_string(), value);
    }
}
