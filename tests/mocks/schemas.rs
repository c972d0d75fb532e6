//! In-memory schema sources.

use async_trait::async_trait;
use dashmap::DashMap;
use kubegate::validation::schema::{FetchError, SchemaSource};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How a [`StaticSchemaSource`] answers every fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceMode {
    Serving,
    Unreachable,
}

/// Serves schemas by file name (`deployment-apps-v1.json`) and counts
/// fetches and in-flight requests.
pub struct StaticSchemaSource {
    schemas: HashMap<String, Value>,
    mode: SourceMode,
    delay: Duration,
    fetches: DashMap<String, usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticSchemaSource {
    pub fn new(schemas: HashMap<String, Value>) -> Self {
        StaticSchemaSource {
            schemas,
            mode: SourceMode::Serving,
            delay: Duration::ZERO,
            fetches: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Schemas for the kinds used across the tests.
    pub fn standard() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            "deployment-apps-v1.json".to_string(),
            json!({
                "type": "object",
                "required": ["apiVersion", "kind", "metadata", "spec"],
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": { "replicas": { "type": "integer" } }
                    }
                }
            }),
        );
        schemas.insert(
            "configmap-v1.json".to_string(),
            json!({
                "type": "object",
                "required": ["metadata"],
                "properties": { "data": { "type": "object" } }
            }),
        );
        schemas.insert(
            "service-v1.json".to_string(),
            json!({ "type": "object", "required": ["spec"] }),
        );
        Self::new(schemas)
    }

    /// Accepts any document of `count` distinct kinds `kind0`..`kindN`.
    pub fn with_kinds(count: usize) -> Self {
        let schemas = (0..count)
            .map(|i| (format!("kind{}-v1.json", i), json!({ "type": "object" })))
            .collect();
        Self::new(schemas)
    }

    pub fn unreachable() -> Self {
        StaticSchemaSource {
            mode: SourceMode::Unreachable,
            ..Self::new(HashMap::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetches per schema file name.
    pub fn fetch_count(&self, file_name: &str) -> usize {
        self.fetches.get(file_name).map_or(0, |count| *count)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|entry| *entry.value()).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, location: &str) -> Result<Value, FetchError> {
        let file_name = location.rsplit('/').next().unwrap_or(location).to_string();
        *self.fetches.entry(file_name.clone()).or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.mode {
            SourceMode::Unreachable => Err(FetchError::Unreachable("connection refused".to_string())),
            SourceMode::Serving => self
                .schemas
                .get(&file_name)
                .cloned()
                .ok_or(FetchError::NotFound),
        }
    }
}
