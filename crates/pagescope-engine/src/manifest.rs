//! Size and dependency queries over a bundler's build manifest.
//!
//! Accepts an already-parsed webpack stats object (`modules` with
//! `reasons`, `chunks` with `files`) or a Vite manifest (source path keys
//! mapping to `{file, imports, dynamicImports}`).

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use pagescope_types::Lookup;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub name: String,
    /// Bytes, when the manifest records it.
    pub size: Option<u64>,
    pub chunks: Vec<String>,
    /// Modules this one imports.
    pub dependencies: Vec<String>,
    /// Modules that import this one.
    pub dependents: Vec<String>,
    pub output_file: Option<String>,
}

/// A read-only build manifest.
#[derive(Debug, Clone)]
pub struct BuildManifest(Value);

impl BuildManifest {
    pub fn new(manifest: Value) -> Self {
        Self(manifest)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn module_info(&self, name: &str) -> Lookup<ModuleInfo> {
        let found = match self.0.get("modules").and_then(Value::as_array) {
            Some(modules) => self.webpack_module(modules, name),
            None => self.0.as_object().and_then(|entries| vite_module(entries, name)),
        };
        match found {
            Some(info) => Lookup::Found(info),
            None => Lookup::not_found(format!("no module named {name:?} in the build manifest")),
        }
    }

    fn webpack_module(&self, modules: &[Value], name: &str) -> Option<ModuleInfo> {
        let module = modules
            .iter()
            .find(|m| module_name(m).is_some_and(|n| same_module(n, name)))?;
        let full_name = module_name(module)?.to_string();

        let chunks: Vec<String> = module
            .get("chunks")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().map(id_string).collect())
            .unwrap_or_default();

        let dependents: BTreeSet<String> = module
            .get("reasons")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|r| r.get("moduleName").and_then(Value::as_str))
            .filter(|n| *n != full_name)
            .map(str::to_string)
            .collect();

        let dependencies: BTreeSet<String> = modules
            .iter()
            .filter(|m| {
                m.get("reasons")
                    .and_then(Value::as_array)
                    .is_some_and(|reasons| {
                        reasons.iter().any(|r| {
                            r.get("moduleName").and_then(Value::as_str) == Some(full_name.as_str())
                        })
                    })
            })
            .filter_map(module_name)
            .filter(|n| *n != full_name)
            .map(str::to_string)
            .collect();

        let output_file = chunks.first().and_then(|chunk| self.chunk_file(chunk));

        Some(ModuleInfo {
            name: full_name,
            size: module.get("size").and_then(Value::as_u64),
            chunks,
            dependencies: dependencies.into_iter().collect(),
            dependents: dependents.into_iter().collect(),
            output_file,
        })
    }

    fn chunk_file(&self, chunk: &str) -> Option<String> {
        self.0
            .get("chunks")?
            .as_array()?
            .iter()
            .find(|c| c.get("id").map(id_string).as_deref() == Some(chunk))?
            .get("files")?
            .as_array()?
            .first()?
            .as_str()
            .map(str::to_string)
    }
}

fn vite_module(entries: &Map<String, Value>, name: &str) -> Option<ModuleInfo> {
    let (key, entry) = entries
        .iter()
        .find(|(key, entry)| entry.get("file").is_some() && same_module(key, name))?;

    let imports = |entry: &Value| -> Vec<String> {
        ["imports", "dynamicImports"]
            .iter()
            .filter_map(|field| entry.get(*field).and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    };

    let dependents: Vec<String> = entries
        .iter()
        .filter(|(other, e)| *other != key && imports(e).iter().any(|i| i == key))
        .map(|(other, _)| other.clone())
        .collect();

    let output_file = entry.get("file").and_then(Value::as_str).map(str::to_string);
    Some(ModuleInfo {
        name: key.clone(),
        size: None,
        chunks: output_file.iter().cloned().collect(),
        dependencies: imports(entry),
        dependents,
        output_file,
    })
}

fn module_name(module: &Value) -> Option<&str> {
    module
        .get("name")
        .or_else(|| module.get("identifier"))
        .and_then(Value::as_str)
}

/// `./src/App.tsx`, `src/App.tsx` and `App.tsx` name the same module when
/// one is a path suffix of the other.
fn same_module(candidate: &str, query: &str) -> bool {
    let candidate = candidate.trim_start_matches("./");
    let query = query.trim_start_matches("./");
    candidate == query
        || candidate.ends_with(&format!("/{query}"))
        || query.ends_with(&format!("/{candidate}"))
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
