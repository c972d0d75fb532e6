//! Schema validation pool tests.

use crate::mocks::*;
use kubegate::extractor::FileConfigurations;
use kubegate::validation::schema::SchemaSettings;
use kubegate::validation::{K8sValidator, ResourceValidator, ValidationStreams};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn settings() -> SchemaSettings {
    SchemaSettings {
        cache_dir: None,
        ..SchemaSettings::default()
    }
}

fn feed(files: Vec<FileConfigurations>) -> mpsc::Receiver<FileConfigurations> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        for file in files {
            if tx.send(file).await.is_err() {
                break;
            }
        }
    });
    rx
}

async fn collect<T>(mut rx: mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

struct Collected {
    valid: Vec<FileConfigurations>,
    invalid: Vec<kubegate::extractor::InvalidFile>,
    warnings: Vec<kubegate::validation::FileWithWarning>,
    errors: Vec<kubegate::validation::ValidationStageError>,
}

async fn collect_all(streams: ValidationStreams) -> Collected {
    let (valid, invalid, warnings, errors) = tokio::join!(
        collect(streams.valid),
        collect(streams.invalid),
        collect(streams.warnings),
        collect(streams.errors)
    );
    Collected {
        valid,
        invalid,
        warnings,
        errors,
    }
}

fn deployment_file(i: usize) -> FileConfigurations {
    FileConfigurations::new(
        format!("deploy-{}.yaml", i),
        vec![json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": format!("d{}", i) },
            "spec": { "replicas": 2 }
        })],
    )
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let source = Arc::new(StaticSchemaSource::with_kinds(24).with_delay(Duration::from_millis(20)));
    let validator = K8sValidator::with_source(source.clone());
    validator.init_client(settings());

    let files = (0..24)
        .map(|i| {
            FileConfigurations::new(
                format!("kind-{}.yaml", i),
                vec![json!({ "apiVersion": "v1", "kind": format!("Kind{}", i) })],
            )
        })
        .collect();
    let collected = collect_all(validator.validate_resources(feed(files), 4)).await;

    assert_eq!(collected.valid.len(), 24);
    assert!(collected.invalid.is_empty());
    assert_eq!(source.total_fetches(), 24);
    assert!(source.max_in_flight() >= 1);
    assert!(source.max_in_flight() <= 4, "max in flight {}", source.max_in_flight());
}

#[tokio::test]
async fn test_schema_is_fetched_once_per_key() {
    let source = Arc::new(StaticSchemaSource::standard().with_delay(Duration::from_millis(20)));
    let validator = K8sValidator::with_source(source.clone());
    validator.init_client(settings());

    let files = (0..30).map(deployment_file).collect();
    let collected = collect_all(validator.validate_resources(feed(files), 10)).await;

    assert_eq!(collected.valid.len(), 30);
    assert_eq!(source.fetch_count("deployment-apps-v1.json"), 1);
}

#[tokio::test]
async fn test_streams_close_after_every_file() {
    let validator = K8sValidator::with_source(Arc::new(StaticSchemaSource::standard()));
    validator.init_client(settings());

    let mut files: Vec<FileConfigurations> = (0..5).map(deployment_file).collect();
    files.push(FileConfigurations::new(
        "broken-kind.yaml",
        vec![json!({ "apiVersion": "v1", "kind": "Config Map" })],
    ));
    files.push(FileConfigurations::new(
        "schema-violation.yaml",
        vec![json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {} })],
    ));
    let collected = collect_all(validator.validate_resources(feed(files), 2)).await;

    assert_eq!(collected.valid.len(), 5);
    let mut invalid: Vec<String> = collected.invalid.iter().map(|f| f.path.clone()).collect();
    invalid.sort();
    assert_eq!(invalid, vec!["broken-kind.yaml", "schema-violation.yaml"]);
    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].path, "broken-kind.yaml");
    assert!(collected.warnings.is_empty());
}

#[tokio::test]
async fn test_unreachable_source_uses_disk_cache() {
    let cache = tempfile::TempDir::new().unwrap();
    let cached = SchemaSettings {
        cache_dir: Some(cache.path().to_path_buf()),
        ..SchemaSettings::default()
    };

    // A successful run populates the cache.
    let online = K8sValidator::with_source(Arc::new(StaticSchemaSource::standard()));
    online.init_client(cached.clone());
    let collected = collect_all(online.validate_resources(feed(vec![deployment_file(0)]), 1)).await;
    assert_eq!(collected.valid.len(), 1);

    let offline = K8sValidator::with_source(Arc::new(StaticSchemaSource::unreachable()));
    offline.init_client(cached);
    let bad = FileConfigurations::new(
        "bad.yaml",
        vec![json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {} })],
    );
    let collected =
        collect_all(offline.validate_resources(feed(vec![deployment_file(1), bad]), 2)).await;

    assert_eq!(collected.valid.len(), 1);
    assert_eq!(collected.invalid.len(), 1);
    assert_eq!(collected.invalid[0].path, "bad.yaml");
    assert_eq!(collected.warnings.len(), 1);
    assert!(collected.warnings[0].warning.contains("cached schema"));
}

#[tokio::test]
async fn test_get_k8s_files_partitions_every_file() {
    let validator = K8sValidator::with_source(Arc::new(StaticSchemaSource::standard()));
    let files = vec![
        deployment_file(0),
        FileConfigurations::new("values.yaml", vec![json!({ "replicaCount": 2 })]),
        FileConfigurations::new("empty.yaml", vec![]),
        deployment_file(1),
    ];

    let streams = validator.get_k8s_files(feed(files), 3);
    let (k8s, other) = tokio::join!(collect(streams.k8s), collect(streams.other));

    let mut k8s: Vec<String> = k8s.into_iter().map(|f| f.file_name).collect();
    k8s.sort();
    let mut other: Vec<String> = other.into_iter().map(|f| f.file_name).collect();
    other.sort();
    assert_eq!(k8s, vec!["deploy-0.yaml", "deploy-1.yaml"]);
    assert_eq!(other, vec!["empty.yaml", "values.yaml"]);
}
