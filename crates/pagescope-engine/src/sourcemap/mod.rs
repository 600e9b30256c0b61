//! Source location resolution.
//!
//! [`SourceLocationResolver::resolve`] maps a minified bundle position to
//! its original source position. It never fails: when no map can be found
//! the result is the input position flagged `resolved: false` with a note.
//!
//! Maps are acquired in order from an inline `data:` URL in the bundle, a
//! same-origin sibling file named by the bundle's `sourceMappingURL`
//! directive, then a local override file.

pub mod cache;
pub mod fetch;
pub mod parse;
pub mod stack;
pub mod vlq;

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;
use url::Url;

use pagescope_types::{ContentSlice, ResolvedLocation, ResolverConfig, StackTrace, TracedFrame};

pub use cache::{MapLease, SourceMapCache, SourceMapEntry};
pub use fetch::{FetchError, HttpFetcher, SourceFetcher};
pub use parse::{OriginalPosition, SourceMap, SourceMapError};

pub struct SourceLocationResolver {
    cache: SourceMapCache,
    fetcher: Arc<dyn SourceFetcher>,
    override_dir: Option<PathBuf>,
    overrides: RwLock<HashMap<String, PathBuf>>,
}

impl SourceLocationResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        let fetcher = HttpFetcher::new(Duration::from_millis(config.fetch_timeout_ms));
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_fetcher(config: &ResolverConfig, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            cache: SourceMapCache::new(config.cache_capacity),
            fetcher,
            override_dir: config.override_dir.clone(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &SourceMapCache {
        &self.cache
    }

    /// Use `path` as the last-resort map for `bundle`.
    pub fn register_override(&self, bundle: &str, path: impl Into<PathBuf>) {
        self.overrides.write().insert(bundle.to_string(), path.into());
    }

    /// Resolve a 1-based bundle position.
    pub async fn resolve(&self, bundle: &str, line: u32, column: u32) -> ResolvedLocation {
        self.resolve_inner(bundle, line, column, None).await
    }

    /// Resolve with an explicit override map path for this call.
    pub async fn resolve_with_override(
        &self,
        bundle: &str,
        line: u32,
        column: u32,
        override_path: &Path,
    ) -> ResolvedLocation {
        self.resolve_inner(bundle, line, column, Some(override_path))
            .await
    }

    async fn resolve_inner(
        &self,
        bundle: &str,
        line: u32,
        column: u32,
        override_path: Option<&Path>,
    ) -> ResolvedLocation {
        let mut attempts = Vec::new();
        let Some(map) = self.lookup(bundle, override_path, &mut attempts).await else {
            let note = if attempts.is_empty() {
                format!("no source map found for {bundle}")
            } else {
                attempts.join("; ")
            };
            return ResolvedLocation::degraded(bundle, line, column, note);
        };

        match map.original_position(line, column) {
            Some(pos) => ResolvedLocation {
                file: pos.source.to_string(),
                line: pos.line,
                column: pos.column,
                name: pos.name.map(str::to_string),
                source_line: map.source_line(pos.source_index, pos.line).map(str::to_string),
                resolved: true,
                note: None,
            },
            None => ResolvedLocation::degraded(
                bundle,
                line,
                column,
                format!("source map has no mapping for {line}:{column}"),
            ),
        }
    }

    /// Reverse lookup from an original position to the bundle position.
    pub async fn generated_position(
        &self,
        bundle: &str,
        source: &str,
        line: u32,
        column: u32,
    ) -> Option<(u32, u32)> {
        let mut attempts = Vec::new();
        let map = self.lookup(bundle, None, &mut attempts).await?;
        map.generated_position(source, line, column)
    }

    /// Embedded source lines `range` (1-based, inclusive) of an original
    /// file, searched across the loaded maps.
    pub fn get_content(&self, file: &str, range: RangeInclusive<u32>) -> ContentSlice {
        let unavailable = |reason: String| ContentSlice::Unavailable {
            file: file.to_string(),
            reason,
        };

        let mut known = false;
        for entry in self.cache.entries().iter().rev() {
            let Some(index) = entry.map.find_source(file) else {
                continue;
            };
            known = true;
            let Some(content) = entry.map.source_content(index) else {
                continue;
            };
            let all: Vec<&str> = content.lines().collect();
            let start = (*range.start()).max(1);
            let end = (*range.end()).min(all.len() as u32);
            if start > end {
                return unavailable(format!(
                    "lines {}-{} are outside {file} ({} lines)",
                    range.start(),
                    range.end(),
                    all.len()
                ));
            }
            return ContentSlice::Available {
                file: file.to_string(),
                start_line: start,
                lines: all[(start - 1) as usize..end as usize]
                    .iter()
                    .map(|l| l.to_string())
                    .collect(),
            };
        }

        if known {
            unavailable("source map has no embedded content for this file".into())
        } else {
            unavailable("no loaded source map references this file".into())
        }
    }

    /// Parse stack text and resolve every frame concurrently.
    pub async fn trace_stack(&self, text: &str) -> StackTrace {
        let lines = stack::split_frames(text);
        let frames = join_all(lines.into_iter().map(|(raw, frame)| async move {
            let location = match &frame {
                Some(f) => Some(self.resolve(&f.url, f.line, f.column).await),
                None => None,
            };
            TracedFrame {
                raw,
                frame,
                location,
            }
        }))
        .await;
        StackTrace::from_frames(frames)
    }

    async fn lookup(
        &self,
        bundle: &str,
        override_path: Option<&Path>,
        attempts: &mut Vec<String>,
    ) -> Option<MapLease<'_>> {
        let override_path = override_path
            .map(Path::to_path_buf)
            .or_else(|| self.overrides.read().get(bundle).cloned())
            .or_else(|| self.default_override(bundle));
        self.cache
            .get_or_load(bundle, move || async move {
                self.load_map(bundle, override_path.as_deref(), attempts).await
            })
            .await
    }

    async fn load_map(
        &self,
        bundle: &str,
        override_path: Option<&Path>,
        attempts: &mut Vec<String>,
    ) -> Option<SourceMap> {
        match Url::parse(bundle) {
            Ok(url) => match self.load_from_bundle(&url).await {
                Ok(map) => return Some(map),
                Err(reason) => attempts.push(reason),
            },
            Err(e) => attempts.push(format!("bundle identifier is not a URL: {e}")),
        }

        let Some(path) = override_path else {
            attempts.push("no override map configured".into());
            return None;
        };
        let parsed = match self.fetcher.read_file(path).await {
            Ok(bytes) => SourceMap::from_slice(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(map) => {
                tracing::debug!(bundle, path = %path.display(), "loaded override source map");
                Some(map)
            }
            Err(reason) => {
                attempts.push(format!("override {}: {reason}", path.display()));
                None
            }
        }
    }

    /// Inline map first, then the sibling map file.
    async fn load_from_bundle(&self, bundle: &Url) -> Result<SourceMap, String> {
        let bytes = self
            .fetcher
            .fetch(bundle)
            .await
            .map_err(|e| format!("bundle unavailable: {e}"))?;
        let script = String::from_utf8_lossy(&bytes);
        let reference = fetch::source_mapping_url(&script)
            .ok_or_else(|| "bundle has no sourceMappingURL directive".to_string())?;

        if reference.starts_with("data:") {
            let payload = fetch::decode_data_url(reference)
                .ok_or_else(|| "inline source map is not base64".to_string())?;
            tracing::debug!(%bundle, "using inline source map");
            return SourceMap::from_slice(&payload).map_err(|e| format!("inline source map: {e}"));
        }

        let map_url = fetch::sibling_map_url(bundle, reference)
            .ok_or_else(|| format!("source map {reference} is not on the bundle's origin"))?;
        let payload = self
            .fetcher
            .fetch(&map_url)
            .await
            .map_err(|e| format!("source map unavailable: {e}"))?;
        tracing::debug!(%bundle, %map_url, "using sibling source map");
        SourceMap::from_slice(&payload).map_err(|e| format!("{map_url}: {e}"))
    }

    fn default_override(&self, bundle: &str) -> Option<PathBuf> {
        let dir = self.override_dir.as_ref()?;
        let name = match Url::parse(bundle) {
            Ok(url) => url.path_segments()?.next_back()?.to_string(),
            Err(_) => Path::new(bundle).file_name()?.to_str()?.to_string(),
        };
        (!name.is_empty()).then(|| dir.join(format!("{name}.map")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed bundle bodies and counts fetches.
    struct StaticFetcher {
        files: HashMap<String, Vec<u8>>,
        fetches: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(files: &[(&str, String)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone().into_bytes()))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
        }

        async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
            tokio::fs::read(path).await.map_err(|source| FetchError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Generated 1:11 maps to src/App.tsx 3:5 ("load").
    fn map_json() -> String {
        serde_json::json!({
            "version": 3,
            "sources": ["src/App.tsx"],
            "sourcesContent": ["import x;\n\nfunction load() {}\n"],
            "names": ["load"],
            "mappings": vlq::encode_segment(&[10, 0, 2, 4, 0]),
        })
        .to_string()
    }

    fn inline_bundle() -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(map_json());
        format!("load();\n//# sourceMappingURL=data:application/json;base64,{encoded}\n")
    }

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    #[tokio::test]
    async fn test_resolves_inline_map() {
        let fetcher = Arc::new(StaticFetcher::new(&[("https://a.test/app.js", inline_bundle())]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher);
        let loc = resolver.resolve("https://a.test/app.js", 1, 11).await;
        assert!(loc.resolved);
        assert_eq!(loc.file, "src/App.tsx");
        assert_eq!((loc.line, loc.column), (3, 5));
        assert_eq!(loc.name.as_deref(), Some("load"));
        assert_eq!(loc.source_line.as_deref(), Some("function load() {}"));
    }

    #[tokio::test]
    async fn test_resolves_sibling_map_once() {
        let fetcher = Arc::new(StaticFetcher::new(&[
            ("https://a.test/js/app.js", "load();\n//# sourceMappingURL=app.js.map".into()),
            ("https://a.test/js/app.js.map", map_json()),
        ]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher.clone());
        let first = resolver.resolve("https://a.test/js/app.js", 1, 11).await;
        let second = resolver.resolve("https://a.test/js/app.js", 1, 12).await;
        assert!(first.resolved && second.resolved);
        // Bundle and map fetched once; the second lookup is a cache hit.
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_map_degrades_with_original_coordinates() {
        let fetcher = Arc::new(StaticFetcher::new(&[("https://a.test/app.js", "load();".into())]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher);
        let loc = resolver.resolve("https://a.test/app.js", 1, 5021).await;
        assert!(!loc.resolved);
        assert_eq!(loc.file, "https://a.test/app.js");
        assert_eq!((loc.line, loc.column), (1, 5021));
        let note = loc.note.unwrap();
        assert!(note.contains("sourceMappingURL"), "{note}");
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_override_path_used_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.js.map");
        std::fs::write(&path, map_json()).unwrap();

        let fetcher = Arc::new(StaticFetcher::new(&[]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher);
        let loc = resolver
            .resolve_with_override("https://a.test/app.js", 1, 11, &path)
            .await;
        assert!(loc.resolved);
        assert_eq!(loc.file, "src/App.tsx");
    }

    #[tokio::test]
    async fn test_override_dir_matches_bundle_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.min.js.map"), map_json()).unwrap();
        let config = ResolverConfig {
            override_dir: Some(dir.path().to_path_buf()),
            ..ResolverConfig::default()
        };
        let resolver =
            SourceLocationResolver::with_fetcher(&config, Arc::new(StaticFetcher::new(&[])));
        let loc = resolver.resolve("https://a.test/static/main.min.js", 1, 11).await;
        assert!(loc.resolved);
    }

    #[tokio::test]
    async fn test_get_content_slices_embedded_source() {
        let fetcher = Arc::new(StaticFetcher::new(&[("https://a.test/app.js", inline_bundle())]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher);
        assert!(!resolver.get_content("src/App.tsx", 1..=2).is_available());

        resolver.resolve("https://a.test/app.js", 1, 11).await;
        match resolver.get_content("src/App.tsx", 2..=3) {
            ContentSlice::Available {
                start_line, lines, ..
            } => {
                assert_eq!(start_line, 2);
                assert_eq!(lines, vec!["".to_string(), "function load() {}".to_string()]);
            }
            other => panic!("expected content, got {other:?}"),
        }
        assert!(!resolver.get_content("src/App.tsx", 10..=12).is_available());
    }

    #[tokio::test]
    async fn test_trace_stack_counts() {
        let fetcher = Arc::new(StaticFetcher::new(&[("https://a.test/app.js", inline_bundle())]));
        let resolver = SourceLocationResolver::with_fetcher(&config(), fetcher);
        let text = "Error: boom\n\
                    at load (https://a.test/app.js:1:11)\n\
                    at https://cdn.test/vendor.js:1:99\n\
                    at <anonymous>";
        let trace = resolver.trace_stack(text).await;
        assert_eq!(trace.frames.len(), 3);
        assert_eq!(trace.resolved_count, 1);
        assert_eq!(trace.unresolved_count, 2);
        assert_eq!(trace.frames[0].location.as_ref().unwrap().file, "src/App.tsx");
        assert!(trace.frames[2].frame.is_none());
    }
}
