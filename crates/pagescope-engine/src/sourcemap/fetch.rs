//! Fetching bundles and map files.
//!
//! Resolution never writes anywhere; it only reads bundles and maps over
//! http(s) and reads local override files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported URL scheme in {0}")]
    UnsupportedScheme(String),
}

/// Read access to bundles and source maps.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch a bundle or map by URL.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;

    /// Read a local override file.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FetchError>;
}

/// Default fetcher: `reqwest` for http(s), `tokio::fs` for `file:` URLs and
/// override paths.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        match url.scheme() {
            "http" | "https" => {}
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedScheme(url.to_string()))?;
                return self.read_file(&path).await;
            }
            _ => return Err(FetchError::UnsupportedScheme(url.to_string())),
        }

        tracing::debug!(%url, "fetching");
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(request_error)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await.map_err(request_error)?;
        Ok(body.to_vec())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        tokio::fs::read(path).await.map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The value of the last `sourceMappingURL` directive in a script.
///
/// Accepts `//# `, the legacy `//@ ` prefix, and `/*# ... */`.
pub fn source_mapping_url(script: &str) -> Option<&str> {
    for line in script.lines().rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        for prefix in ["//# sourceMappingURL=", "//@ sourceMappingURL=", "/*# sourceMappingURL="] {
            if let Some(rest) = trimmed.strip_prefix(prefix) {
                let value = rest.trim_end_matches("*/").trim();
                return (!value.is_empty()).then_some(value);
            }
        }
        // Directives must be trailing; code after them cancels the search.
        if !trimmed.starts_with("//") && !trimmed.starts_with("/*") {
            return None;
        }
    }
    None
}

/// Decode a `data:application/json;base64,...` URL. Returns `None` for
/// anything that is not a base64 data URL.
pub fn decode_data_url(reference: &str) -> Option<Vec<u8>> {
    let rest = reference.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.split(';').any(|part| part == "base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

/// Resolve a map reference against its bundle URL, allowing only maps on
/// the bundle's own origin.
pub fn sibling_map_url(bundle: &Url, reference: &str) -> Option<Url> {
    let map = bundle.join(reference).ok()?;
    let same_origin = if bundle.scheme() == "file" {
        map.scheme() == "file"
    } else {
        map.origin() == bundle.origin()
    };
    if same_origin {
        Some(map)
    } else {
        tracing::warn!(%bundle, %map, "ignoring cross-origin source map");
        None
    }
}
