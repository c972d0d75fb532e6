//! Kubernetes schema validation stage.
//!
//! Validates extracted files against versioned resource schemas over a
//! bounded pool of tokio tasks and fans the results out to four streams.
//!
//! # Stream contract
//!
//! - `valid`: every document conforms (or validation was skipped offline)
//! - `invalid`: at least one document violates its schema
//! - `warnings`: one entry per valid file whose schema resolution degraded
//! - `errors`: malformed schema identifiers and unusable schemas
//!
//! All four streams close together, once the input is exhausted and every
//! task has finished. Completion order across files is arbitrary.

pub mod schema;

use crate::extractor::{FileConfigurations, FileError, InvalidFile};
use parking_lot::RwLock;
use schema::{
    DefaultSchemaSource, SchemaKey, SchemaResolution, SchemaResolver, SchemaSettings, SchemaSource,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default width of the validation pool.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// A valid file whose schema came from a degraded source.
#[derive(Debug, Clone, PartialEq)]
pub struct FileWithWarning {
    pub path: String,
    pub warning: String,
}

/// Stage-level problem reported on the error stream.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct ValidationStageError {
    pub path: String,
    pub message: String,
}

/// Output of [`ResourceValidator::validate_resources`].
pub struct ValidationStreams {
    pub valid: mpsc::UnboundedReceiver<FileConfigurations>,
    pub invalid: mpsc::UnboundedReceiver<InvalidFile>,
    pub warnings: mpsc::UnboundedReceiver<FileWithWarning>,
    pub errors: mpsc::UnboundedReceiver<ValidationStageError>,
}

/// Output of [`ResourceValidator::get_k8s_files`].
pub struct K8sFileStreams {
    pub k8s: mpsc::UnboundedReceiver<FileConfigurations>,
    pub other: mpsc::UnboundedReceiver<FileConfigurations>,
}

/// Schema validation capability used by the orchestrator.
///
/// Both stage operations spawn onto the current tokio runtime and return
/// immediately; results arrive on the returned streams.
pub trait ResourceValidator: Send + Sync {
    /// Configure target version, missing-schema handling and extra locations.
    fn init_client(&self, settings: SchemaSettings);

    /// Validate every file from `input` with at most `concurrency` tasks.
    fn validate_resources(
        &self,
        input: mpsc::Receiver<FileConfigurations>,
        concurrency: usize,
    ) -> ValidationStreams;

    /// Split `input` into Kubernetes-shaped files and everything else.
    fn get_k8s_files(
        &self,
        input: mpsc::Receiver<FileConfigurations>,
        concurrency: usize,
    ) -> K8sFileStreams;
}

/// True when every document carries string `apiVersion` and `kind` fields.
pub fn is_k8s_file(file: &FileConfigurations) -> bool {
    !file.configurations.is_empty()
        && file.configurations.iter().all(|document| {
            ["apiVersion", "kind"].iter().all(|field| {
                document
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty())
            })
        })
}

/// Per-file validation verdict, routed to one stream by the pool.
enum FileVerdict {
    Valid {
        file: FileConfigurations,
        warning: Option<String>,
    },
    Invalid {
        file: InvalidFile,
        stage_errors: Vec<String>,
    },
}

/// Production validator backed by a [`SchemaResolver`].
pub struct K8sValidator {
    source: Arc<dyn SchemaSource>,
    resolver: RwLock<Arc<SchemaResolver>>,
}

impl K8sValidator {
    pub fn new() -> Self {
        Self::with_source(Arc::new(DefaultSchemaSource::default()))
    }

    /// Use a custom schema source (tests, air-gapped mirrors).
    pub fn with_source(source: Arc<dyn SchemaSource>) -> Self {
        let resolver = Arc::new(SchemaResolver::new(
            SchemaSettings::default(),
            source.clone(),
        ));
        K8sValidator {
            source,
            resolver: RwLock::new(resolver),
        }
    }

    fn current_resolver(&self) -> Arc<SchemaResolver> {
        self.resolver.read().clone()
    }
}

impl Default for K8sValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceValidator for K8sValidator {
    fn init_client(&self, settings: SchemaSettings) {
        info!(
            k8s_version = %settings.k8s_version,
            ignore_missing_schemas = settings.ignore_missing_schemas,
            locations = settings.schema_locations.len(),
            "initializing schema client"
        );
        *self.resolver.write() = Arc::new(SchemaResolver::new(settings, self.source.clone()));
    }

    fn validate_resources(
        &self,
        mut input: mpsc::Receiver<FileConfigurations>,
        concurrency: usize,
    ) -> ValidationStreams {
        let (valid_tx, valid) = mpsc::unbounded_channel();
        let (invalid_tx, invalid) = mpsc::unbounded_channel();
        let (warnings_tx, warnings) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();

        let resolver = self.current_resolver();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            while let Some(file) = input.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let resolver = resolver.clone();
                let valid_tx = valid_tx.clone();
                let invalid_tx = invalid_tx.clone();
                let warnings_tx = warnings_tx.clone();
                let errors_tx = errors_tx.clone();

                tasks.spawn(async move {
                    let path = file.file_name.clone();
                    match validate_file(&resolver, file).await {
                        FileVerdict::Valid { file, warning } => {
                            if let Some(warning) = warning {
                                let _ = warnings_tx.send(FileWithWarning {
                                    path: path.clone(),
                                    warning,
                                });
                            }
                            let _ = valid_tx.send(file);
                        }
                        FileVerdict::Invalid { file, stage_errors } => {
                            for message in stage_errors {
                                let _ = errors_tx.send(ValidationStageError {
                                    path: path.clone(),
                                    message,
                                });
                            }
                            let _ = invalid_tx.send(file);
                        }
                    }
                    drop(permit);
                });
            }

            // Completion barrier: senders drop only after every task is done.
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "validation task aborted");
                    let _ = errors_tx.send(ValidationStageError {
                        path: "<unknown>".to_string(),
                        message: format!("validation task aborted: {}", e),
                    });
                }
            }
            debug!("schema validation finished");
        });

        ValidationStreams {
            valid,
            invalid,
            warnings,
            errors,
        }
    }

    fn get_k8s_files(
        &self,
        mut input: mpsc::Receiver<FileConfigurations>,
        concurrency: usize,
    ) -> K8sFileStreams {
        let (k8s_tx, k8s) = mpsc::unbounded_channel();
        let (other_tx, other) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            while let Some(file) = input.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let k8s_tx = k8s_tx.clone();
                let other_tx = other_tx.clone();

                tasks.spawn(async move {
                    if is_k8s_file(&file) {
                        let _ = k8s_tx.send(file);
                    } else {
                        debug!(file = %file.file_name, "ignoring non-kubernetes file");
                        let _ = other_tx.send(file);
                    }
                    drop(permit);
                });
            }

            while tasks.join_next().await.is_some() {}
        });

        K8sFileStreams { k8s, other }
    }
}

fn degradation_notice(resolution: &SchemaResolution, key: &SchemaKey) -> String {
    match resolution {
        SchemaResolution::Resolved {
            origin: schema::SchemaOrigin::Cached { reason, .. },
            ..
        } => format!(
            "Schema source unreachable ({}); validated against cached schema for {}",
            reason, key
        ),
        SchemaResolution::Unavailable { reason } => format!(
            "Schema source unreachable ({}); skipped schema validation for {}",
            reason, key
        ),
        _ => format!("Schema for {} came from a degraded source", key),
    }
}

async fn validate_file(resolver: &SchemaResolver, file: FileConfigurations) -> FileVerdict {
    let settings = resolver.settings();
    let mut errors = Vec::new();
    let mut stage_errors = Vec::new();
    let mut degraded: Option<String> = None;

    for (document_index, document) in file.configurations.iter().enumerate() {
        let key = match SchemaKey::from_document(document, &settings.k8s_version) {
            Ok(key) => key,
            Err(e) => {
                stage_errors.push(e.to_string());
                errors.push(FileError::Validation {
                    document_index,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let resolution = resolver.resolve(&key).await;
        if resolution.is_degraded() {
            degraded.get_or_insert_with(|| degradation_notice(&resolution, &key));
        }
        match &*resolution {
            SchemaResolution::Resolved { schema, .. } => {
                if let Err(violations) = schema.validate(document) {
                    for violation in violations {
                        let location = violation.instance_path.to_string();
                        let message = if location.is_empty() {
                            violation.to_string()
                        } else {
                            format!("{}: {}", location, violation)
                        };
                        errors.push(FileError::Validation {
                            document_index,
                            message,
                        });
                    }
                }
            }
            SchemaResolution::Unavailable { .. } => {
                debug!(file = %file.file_name, schema = %key, "schema validation skipped");
            }
            SchemaResolution::Missing => {
                if settings.ignore_missing_schemas {
                    debug!(file = %file.file_name, schema = %key, "missing schema ignored");
                } else {
                    errors.push(FileError::Validation {
                        document_index,
                        message: format!("could not find schema for {}", key),
                    });
                }
            }
            SchemaResolution::Broken(e) => {
                stage_errors.push(e.to_string());
                errors.push(FileError::Validation {
                    document_index,
                    message: e.to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        if let Some(warning) = &degraded {
            warn!(file = %file.file_name, %warning, "schema validation degraded");
        }
        FileVerdict::Valid {
            file,
            warning: degraded,
        }
    } else {
        debug!(file = %file.file_name, errors = errors.len(), "file failed schema validation");
        FileVerdict::Invalid {
            file: InvalidFile::new(file.file_name, errors),
            stage_errors,
        }
    }
}
