//! Schema loading and reference traversal.
//!
//! Handles `"<documentId>#<path>"` references, JSON-pointer-style navigation
//! inside a schema document, and fetching documents from memory, a directory
//! or HTTP.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{LoadError, PointerError, ResolveError};
use crate::types::json_type_name;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Split a reference into document id and path.
///
/// `"page#/definitions/Hero"` gives `("page", "/definitions/Hero")`; a
/// reference without `#` is a whole document.
pub fn split_ref(reference: &str) -> (&str, &str) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], &reference[idx + 1..]),
        None => (reference, ""),
    }
}

/// Unescape one pointer segment (`~1` = `/`, `~0` = `~`).
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Escape a key for use as a pointer segment.
pub fn escape_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Follow `path` through `doc`, one segment at a time.
///
/// Arrays take numeric, in-range segments; objects need the key to exist.
pub fn resolve_pointer<'a>(doc: &'a Value, path: &str) -> Result<&'a Value, PointerError> {
    let path = path.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(doc);
    }

    let mut current = doc;
    for part in path.split('/') {
        let key = unescape_segment(part);
        current = match current {
            Value::Array(items) => {
                let index: usize = key
                    .parse()
                    .map_err(|_| PointerError::InvalidIndex { segment: key.clone() })?;
                items.get(index).ok_or(PointerError::IndexOutOfRange {
                    index,
                    len: items.len(),
                })?
            }
            Value::Object(map) => map.get(&key).ok_or(PointerError::MissingKey { segment: key })?,
            other => {
                return Err(PointerError::NotTraversable {
                    segment: key,
                    actual: json_type_name(other).to_string(),
                })
            }
        };
    }
    Ok(current)
}

/// Navigate a fragment (e.g. `#/$defs/foo`) and return an owned copy.
pub fn navigate_fragment(schema: &Value, fragment: &str) -> Result<Value, ResolveError> {
    resolve_pointer(schema, fragment)
        .cloned()
        .map_err(|source| ResolveError::Pointer {
            reference: fragment.to_string(),
            source,
        })
}

/// Load a schema from a file path.
///
/// # Errors
///
/// Returns `ResolveError::FileNotFound` if the file doesn't exist,
/// or `ResolveError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, ResolveError> {
    if !path.exists() {
        return Err(ResolveError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ResolveError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_schema_str(&content)
}

/// Load a schema from a JSON string.
///
/// # Errors
///
/// Returns `ResolveError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, ResolveError> {
    serde_json::from_str(content).map_err(|source| ResolveError::InvalidJson { source })
}

/// Source of schema documents by id.
///
/// `Ok(None)` means the document does not exist; `Err` is a failed fetch.
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<Value>, LoadError>;
}

/// Documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapFetcher {
    documents: HashMap<String, Value>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, id: impl Into<String>, schema: Value) -> Self {
        self.documents.insert(id.into(), schema);
        self
    }
}

#[async_trait]
impl SchemaFetcher for MapFetcher {
    async fn fetch(&self, id: &str) -> Result<Option<Value>, LoadError> {
        Ok(self.documents.get(id).cloned())
    }
}

/// Documents stored as `<dir>/<id>.json` (or `<dir>/<id>` when the id
/// already carries an extension).
#[derive(Debug, Clone)]
pub struct DirFetcher {
    dir: PathBuf,
}

impl DirFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        if Path::new(id).extension().is_some() {
            self.dir.join(id)
        } else {
            self.dir.join(format!("{}.json", id))
        }
    }
}

#[async_trait]
impl SchemaFetcher for DirFetcher {
    async fn fetch(&self, id: &str) -> Result<Option<Value>, LoadError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LoadError::new(format!("cannot read {}: {}", path.display(), err))),
        };
        debug!(id, path = %path.display(), "read schema document");
        load_schema_str(&content)
            .map(Some)
            .map_err(|err| LoadError::new(format!("{}: {}", path.display(), err)))
    }
}

/// Documents served over HTTP at `<base_url>/<id>`.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ResolveError> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| ResolveError::NetworkError {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self { base_url, client })
    }

    /// Ids that are already absolute URLs are used as is.
    fn url_for(&self, id: &str) -> String {
        if id.starts_with("http://") || id.starts_with("https://") {
            id.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), id.trim_start_matches('/'))
        }
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl SchemaFetcher for HttpFetcher {
    async fn fetch(&self, id: &str) -> Result<Option<Value>, LoadError> {
        let url = self.url_for(id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| LoadError::new(format!("failed to fetch {}: {}", url, err)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        // Check for HTTP errors before parsing
        let response = response
            .error_for_status()
            .map_err(|err| LoadError::new(format!("failed to fetch {}: {}", url, err)))?;

        debug!(id, url = %url, "fetched schema document");
        response
            .json()
            .await
            .map(Some)
            .map_err(|err| LoadError::new(format!("invalid JSON from {}: {}", url, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn split_ref_forms() {
        assert_eq!(split_ref("#/definitions/Foo"), ("", "/definitions/Foo"));
        assert_eq!(split_ref("page#/a"), ("page", "/a"));
        assert_eq!(split_ref("page"), ("page", ""));
        assert_eq!(split_ref("page#"), ("page", ""));
    }

    #[test]
    fn resolve_pointer_objects_and_arrays() {
        let doc = json!({"definitions": {"a/b": {"oneOf": [{"type": "string"}, {"type": "number"}]}}});
        let found = resolve_pointer(&doc, "/definitions/a~1b/oneOf/1").unwrap();
        assert_eq!(found, &json!({"type": "number"}));
        assert_eq!(resolve_pointer(&doc, "").unwrap(), &doc);
        assert_eq!(resolve_pointer(&doc, "#/definitions").unwrap(), &doc["definitions"]);
    }

    #[test]
    fn resolve_pointer_failures() {
        let doc = json!({"list": [1, 2], "n": 5});
        assert_eq!(
            resolve_pointer(&doc, "/list/x"),
            Err(PointerError::InvalidIndex { segment: "x".into() })
        );
        assert_eq!(
            resolve_pointer(&doc, "/list/2"),
            Err(PointerError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            resolve_pointer(&doc, "/missing"),
            Err(PointerError::MissingKey {
                segment: "missing".into()
            })
        );
        assert!(matches!(
            resolve_pointer(&doc, "/n/deeper"),
            Err(PointerError::NotTraversable { .. })
        ));
    }

    #[test]
    fn tilde_escapes_round_trip() {
        assert_eq!(escape_segment("a/b~c"), "a~1b~0c");
        assert_eq!(unescape_segment("a~1b~0c"), "a/b~c");
    }

    #[test]
    fn navigate_fragment_wraps_pointer_error() {
        let schema = json!({"$defs": {}});
        let result = navigate_fragment(&schema, "#/$defs/foo");
        assert!(matches!(result, Err(ResolveError::Pointer { .. })));
    }

    #[test]
    fn load_schema_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let schema = load_schema(file.path()).unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn load_schema_file_not_found() {
        let result = load_schema(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(ResolveError::FileNotFound { .. })));
    }

    #[test]
    fn load_schema_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_schema(file.path());
        assert!(matches!(result, Err(ResolveError::InvalidJson { .. })));
    }

    #[tokio::test]
    async fn map_fetcher() {
        let fetcher = MapFetcher::new().with_document("a", json!({"type": "string"}));
        assert_eq!(fetcher.fetch("a").await.unwrap(), Some(json!({"type": "string"})));
        assert_eq!(fetcher.fetch("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn dir_fetcher_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hero.json"), r#"{"type": "object"}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let fetcher = DirFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("hero").await.unwrap(), Some(json!({"type": "object"})));
        assert_eq!(fetcher.fetch("hero.json").await.unwrap(), Some(json!({"type": "object"})));
        assert_eq!(fetcher.fetch("missing").await.unwrap(), None);
        assert!(fetcher.fetch("broken").await.is_err());
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[tokio::test]
        async fn http_fetcher_fetches_document() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("GET", "/schemas/hero")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"type": "object"}"#)
                .create_async()
                .await;

            let fetcher = HttpFetcher::new(format!("{}/schemas/", server.url())).unwrap();
            let schema = fetcher.fetch("hero").await.unwrap();
            assert_eq!(schema, Some(json!({"type": "object"})));
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn absolute_ids_skip_the_base_url() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("GET", "/shared/link.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"type": "string"}"#)
                .create_async()
                .await;

            let fetcher = HttpFetcher::new("http://unused.invalid/schemas").unwrap();
            let id = format!("{}/shared/link.json", server.url());
            assert_eq!(fetcher.fetch(&id).await.unwrap(), Some(json!({"type": "string"})));
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn http_fetcher_404_is_missing() {
            let mut server = mockito::Server::new_async().await;
            server.mock("GET", "/gone").with_status(404).create_async().await;

            let fetcher = HttpFetcher::new(server.url()).unwrap();
            assert_eq!(fetcher.fetch("gone").await.unwrap(), None);
        }

        #[tokio::test]
        async fn http_fetcher_server_error_fails() {
            let mut server = mockito::Server::new_async().await;
            server.mock("GET", "/boom").with_status(500).create_async().await;

            let fetcher = HttpFetcher::new(server.url()).unwrap();
            let err = fetcher.fetch("boom").await.unwrap_err();
            assert!(err.message.contains("failed to fetch"));
        }
    }
}
