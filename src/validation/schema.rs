//! Resource schema resolution.
//!
//! Maps a document's `apiVersion`/`kind` to a JSON schema for the target
//! Kubernetes version, fetching it from the configured locations and caching
//! the compiled result per key.
//!
//! # Lookup order
//!
//! 1. Custom schema locations, in the order given
//! 2. The canonical schema repository
//! 3. The on-disk schema cache, only when a remote location was unreachable
//!
//! A schema served from step 3, or no schema at all after an unreachable
//! remote, is a *degraded* resolution: the document is still accepted and the
//! caller reports a warning. A schema that is simply not found anywhere is
//! [`SchemaResolution::Missing`].
//!
//! # Concurrency
//!
//! The cache is a [`DashMap`] of per-key [`OnceCell`]s. Lookups only touch the
//! shard holding the key, and the first requester of a key runs the fetch
//! while later requesters await the same cell, so each key is fetched once.

use async_trait::async_trait;
use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Canonical location of standalone strict Kubernetes schemas.
pub const CANONICAL_SCHEMA_LOCATION: &str = "https://raw.githubusercontent.com/yannh/kubernetes-json-schema/master/v{k8s_version}-standalone-strict/{kind}{kind_suffix}.json";

/// Default Kubernetes version used when none is configured.
pub const DEFAULT_K8S_VERSION: &str = "1.28.0";

/// Schema identifier derived from a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub k8s_version: String,
    /// Lowercase kind, e.g. `deployment`
    pub kind: String,
    /// First segment of the API group, empty for the core group
    pub group: String,
    pub version: String,
}

impl SchemaKey {
    /// Derive the key from a document's `apiVersion` and `kind`.
    pub fn from_document(document: &Value, k8s_version: &str) -> Result<Self, SchemaError> {
        let api_version = document
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::MalformedIdentifier {
                identifier: describe_field(document.get("apiVersion")),
                reason: "apiVersion must be a non-empty string".to_string(),
            })?;
        let kind = document
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::MalformedIdentifier {
                identifier: describe_field(document.get("kind")),
                reason: "kind must be a non-empty string".to_string(),
            })?;

        Self::parse(api_version, kind, k8s_version)
    }

    /// Build a key from raw identifier strings.
    pub fn parse(api_version: &str, kind: &str, k8s_version: &str) -> Result<Self, SchemaError> {
        let malformed = |reason: &str| SchemaError::MalformedIdentifier {
            identifier: format!("{}/{}", api_version, kind),
            reason: reason.to_string(),
        };

        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("kind must be alphanumeric"));
        }

        let (group, version) = match api_version.split('/').collect::<Vec<_>>().as_slice() {
            [version] => ("", *version),
            [group, version] => (*group, *version),
            _ => return Err(malformed("apiVersion must be <group>/<version> or <version>")),
        };

        let valid_segment =
            |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !valid_segment(version) || (!group.is_empty() && !valid_segment(group)) {
            return Err(malformed("apiVersion contains invalid characters"));
        }

        Ok(SchemaKey {
            k8s_version: k8s_version.to_string(),
            kind: kind.to_lowercase(),
            group: group.split('.').next().unwrap_or_default().to_lowercase(),
            version: version.to_lowercase(),
        })
    }

    /// File name used by the canonical repository and the disk cache.
    pub fn file_name(&self) -> String {
        format!("{}{}.json", self.kind, self.kind_suffix())
    }

    fn kind_suffix(&self) -> String {
        if self.group.is_empty() {
            format!("-{}", self.version)
        } else {
            format!("-{}-{}", self.group, self.version)
        }
    }

    /// Render a location template for this key.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{k8s_version}", &self.k8s_version)
            .replace("{kind_suffix}", &self.kind_suffix())
            .replace("{kind}", &self.kind)
            .replace("{group}", &self.group)
            .replace("{version}", &self.version)
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (k8s {})", self.file_name(), self.k8s_version)
    }
}

fn describe_field(value: Option<&Value>) -> String {
    match value {
        None => "<missing>".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Schema resolution errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("malformed schema identifier {identifier}: {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    #[error("schema at {location} could not be compiled: {message}")]
    Compile { location: String, message: String },
}

/// Outcome of fetching one schema location.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("schema not found")]
    NotFound,

    #[error("schema source unreachable: {0}")]
    Unreachable(String),

    #[error("schema source returned an invalid document: {0}")]
    Invalid(String),
}

/// Where schema documents come from.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Fetch the schema document at `location` (URL or file path).
    async fn fetch(&self, location: &str) -> Result<Value, FetchError>;
}

/// Fetches `http(s)://` locations over the network and everything else from disk.
pub struct DefaultSchemaSource {
    http: reqwest::Client,
}

impl DefaultSchemaSource {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        DefaultSchemaSource { http }
    }

    async fn fetch_http(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !response.status().is_success() {
            return Err(FetchError::Unreachable(format!("HTTP {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Invalid(e.to_string()))
    }

    async fn fetch_file(&self, path: &str) -> Result<Value, FetchError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FetchError::NotFound),
            Err(e) => return Err(FetchError::Invalid(e.to_string())),
        };
        serde_json::from_str(&content).map_err(|e| FetchError::Invalid(e.to_string()))
    }
}

impl Default for DefaultSchemaSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl SchemaSource for DefaultSchemaSource {
    async fn fetch(&self, location: &str) -> Result<Value, FetchError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.fetch_http(location).await
        } else {
            self.fetch_file(location).await
        }
    }
}

/// Where a resolved schema came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOrigin {
    /// The canonical repository or a custom location
    Remote { location: String },
    /// The on-disk cache, used because a remote location was unreachable
    Cached { path: String, reason: String },
}

/// Result of resolving one schema key.
pub enum SchemaResolution {
    Resolved {
        schema: JSONSchema,
        origin: SchemaOrigin,
    },
    /// Remote unreachable and no cached copy: validation is skipped.
    Unavailable { reason: String },
    /// Not found at any location.
    Missing,
    /// The schema document exists but is unusable.
    Broken(SchemaError),
}

impl SchemaResolution {
    /// True when the remote source could not be used.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            SchemaResolution::Resolved {
                origin: SchemaOrigin::Cached { .. },
                ..
            } | SchemaResolution::Unavailable { .. }
        )
    }
}

/// Settings applied by `init_client`.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSettings {
    pub k8s_version: String,
    pub ignore_missing_schemas: bool,
    /// Extra location templates, tried before the canonical location
    pub schema_locations: Vec<String>,
    /// Directory for the on-disk schema cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        SchemaSettings {
            k8s_version: DEFAULT_K8S_VERSION.to_string(),
            ignore_missing_schemas: false,
            schema_locations: Vec::new(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// `$XDG_CACHE_HOME/kubegate/schemas` or the platform equivalent.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("kubegate").join("schemas"))
}

/// Shared, read-mostly schema cache with single-flight population.
pub struct SchemaResolver {
    settings: SchemaSettings,
    source: Arc<dyn SchemaSource>,
    cache: DashMap<SchemaKey, Arc<OnceCell<Arc<SchemaResolution>>>>,
}

impl SchemaResolver {
    pub fn new(settings: SchemaSettings, source: Arc<dyn SchemaSource>) -> Self {
        SchemaResolver {
            settings,
            source,
            cache: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &SchemaSettings {
        &self.settings
    }

    /// Resolve `key`, fetching it at most once per resolver.
    pub async fn resolve(&self, key: &SchemaKey) -> Arc<SchemaResolution> {
        // Clone the cell out so the shard lock is released before awaiting.
        let cell = self.cache.entry(key.clone()).or_default().clone();
        cell.get_or_init(|| async { Arc::new(self.populate(key).await) })
            .await
            .clone()
    }

    fn locations(&self, key: &SchemaKey) -> Vec<String> {
        self.settings
            .schema_locations
            .iter()
            .map(|template| {
                if template.contains('{') {
                    key.render(template)
                } else {
                    // Plain directories hold `<kind>-<group>-<version>.json` files
                    PathBuf::from(template)
                        .join(key.file_name())
                        .to_string_lossy()
                        .to_string()
                }
            })
            .chain(std::iter::once(key.render(CANONICAL_SCHEMA_LOCATION)))
            .collect()
    }

    async fn populate(&self, key: &SchemaKey) -> SchemaResolution {
        let mut unreachable: Option<String> = None;

        for location in self.locations(key) {
            match self.source.fetch(&location).await {
                Ok(document) => {
                    debug!(schema = %key, location = %location, "schema fetched");
                    return match compile(&document, &location) {
                        Ok(schema) => {
                            self.store_in_cache(key, &document).await;
                            SchemaResolution::Resolved {
                                schema,
                                origin: SchemaOrigin::Remote { location },
                            }
                        }
                        Err(e) => SchemaResolution::Broken(e),
                    };
                }
                Err(FetchError::NotFound) => continue,
                Err(FetchError::Unreachable(reason)) => {
                    warn!(schema = %key, location = %location, %reason, "schema location unreachable");
                    unreachable.get_or_insert(reason);
                }
                Err(FetchError::Invalid(message)) => {
                    return SchemaResolution::Broken(SchemaError::Compile { location, message });
                }
            }
        }

        match unreachable {
            Some(reason) => self.load_from_cache(key, reason).await,
            None => SchemaResolution::Missing,
        }
    }

    async fn load_from_cache(&self, key: &SchemaKey, reason: String) -> SchemaResolution {
        let Some(path) = self.cache_path(key) else {
            return SchemaResolution::Unavailable { reason };
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return SchemaResolution::Unavailable { reason },
        };

        let path = path.to_string_lossy().to_string();
        let compiled = serde_json::from_str::<Value>(&content)
            .map_err(|e| e.to_string())
            .and_then(|document| compile(&document, &path).map_err(|e| e.to_string()));

        match compiled {
            Ok(schema) => SchemaResolution::Resolved {
                schema,
                origin: SchemaOrigin::Cached { path, reason },
            },
            Err(message) => {
                debug!(schema = %key, %message, "ignoring unusable cached schema");
                SchemaResolution::Unavailable { reason }
            }
        }
    }

    fn cache_path(&self, key: &SchemaKey) -> Option<PathBuf> {
        self.settings.cache_dir.as_ref().map(|dir| {
            dir.join(format!("v{}", key.k8s_version))
                .join(key.file_name())
        })
    }

    async fn store_in_cache(&self, key: &SchemaKey, document: &Value) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, document.to_string()).await
        };
        if let Err(e) = write.await {
            debug!(path = %path.display(), error = %e, "could not write schema cache");
        }
    }
}

fn compile(document: &Value, location: &str) -> Result<JSONSchema, SchemaError> {
    JSONSchema::compile(document).map_err(|e| SchemaError::Compile {
        location: location.to_string(),
        message: e.to_string(),
    })
}
