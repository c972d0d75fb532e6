//! Policy evaluation.
//!
//! Runs every rule of a [`Policy`] over every schema-valid file and builds a
//! deterministic result set. Also carries the remote half of a run: fetching
//! prerun data and submitting results.
//!
//! # Outcome rules
//!
//! A rule applies to a document when its `kinds` list is empty or contains
//! the document kind. For each (file, rule) pair:
//! - no applicable document: no outcome is recorded
//! - any applicable document violates the rule schema: failed
//! - otherwise: passed

pub mod results;

use crate::client::{CliClient, PrerunResponse, RemoteError, SendEvaluationResultsResponse};
use crate::extractor::FileConfigurations;
use crate::policy::Policy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use results::{FailureOccurrence, PolicyCheckResultData, RawResult, ResultAggregator, Summary};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use results::EvaluationResults;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("rule \"{identifier}\" could not be compiled: {message}")]
    InvalidRule { identifier: String, message: String },

    #[error("evaluation task failed: {0}")]
    Aborted(String),
}

/// Input of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyCheckData {
    pub files_configurations: Vec<FileConfigurations>,
    pub is_interactive_mode: bool,
    pub policy_name: String,
    pub policy: Policy,
}

/// Payload submitted to the policy service after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequestData {
    pub token: String,
    pub cli_version: String,
    pub k8s_version: String,
    pub policy_name: String,
    pub started_at: DateTime<Utc>,
    pub files_count: usize,
    pub failed_yaml_files: Vec<String>,
    pub failed_k8s_files: Vec<String>,
    pub summary: Summary,
    pub results: EvaluationResults,
}

/// Evaluation capability used by the orchestrator.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn request_evaluation_prerun_data(
        &self,
        token: &str,
    ) -> Result<PrerunResponse, RemoteError>;

    async fn evaluate(
        &self,
        data: PolicyCheckData,
    ) -> Result<PolicyCheckResultData, EvaluationError>;

    async fn send_evaluation_result(
        &self,
        request: EvaluationRequestData,
    ) -> Result<SendEvaluationResultsResponse, RemoteError>;
}

/// Production evaluator: local evaluation plus the policy service client.
pub struct PolicyEvaluator {
    client: Arc<CliClient>,
    cli_version: String,
}

impl PolicyEvaluator {
    pub fn new(client: Arc<CliClient>) -> Self {
        PolicyEvaluator {
            client,
            cli_version: crate::version::cli_version().to_string(),
        }
    }
}

#[async_trait]
impl Evaluator for PolicyEvaluator {
    async fn request_evaluation_prerun_data(
        &self,
        token: &str,
    ) -> Result<PrerunResponse, RemoteError> {
        self.client
            .request_evaluation_prerun_data(token, &self.cli_version)
            .await
    }

    async fn evaluate(
        &self,
        data: PolicyCheckData,
    ) -> Result<PolicyCheckResultData, EvaluationError> {
        // Schema evaluation is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || evaluate_policy(&data))
            .await
            .map_err(|e| EvaluationError::Aborted(e.to_string()))?
    }

    async fn send_evaluation_result(
        &self,
        request: EvaluationRequestData,
    ) -> Result<SendEvaluationResultsResponse, RemoteError> {
        self.client.send_evaluation_result(&request).await
    }
}

fn document_field(document: &Value, pointer: &str) -> String {
    document
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Evaluate `data.policy` over `data.files_configurations`.
///
/// Files are visited in input order and rules in policy order, so the result
/// depends only on the input.
pub fn evaluate_policy(data: &PolicyCheckData) -> Result<PolicyCheckResultData, EvaluationError> {
    let rules = data.policy.rules();
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        let schema = rule.compile().map_err(|e| EvaluationError::InvalidRule {
            identifier: rule.identifier.clone(),
            message: e.to_string(),
        })?;
        compiled.push((rule, schema));
    }

    let mut aggregator = ResultAggregator::new();
    for rule in rules {
        aggregator.add_rule(rule);
    }

    for file in &data.files_configurations {
        aggregator.add_file(&file.file_name, file.configurations.len());

        for (rule, schema) in &compiled {
            let mut applicable = false;
            let mut occurrences = Vec::new();

            for (document_index, document) in file.configurations.iter().enumerate() {
                if !rule.applies_to(document) {
                    continue;
                }
                applicable = true;

                let errors: Vec<String> = match schema.validate(document) {
                    Ok(()) => Vec::new(),
                    Err(violations) => violations
                        .map(|v| {
                            let location = v.instance_path.to_string();
                            if location.is_empty() {
                                v.to_string()
                            } else {
                                format!("{}: {}", location, v)
                            }
                        })
                        .collect(),
                };

                aggregator.add_raw_result(RawResult {
                    file_name: file.file_name.clone(),
                    document_index,
                    rule_identifier: rule.identifier.clone(),
                    passed: errors.is_empty(),
                    errors: errors.clone(),
                });

                if !errors.is_empty() {
                    occurrences.push(FailureOccurrence {
                        document_index,
                        kind: document_field(document, "/kind"),
                        name: document_field(document, "/metadata/name"),
                        message: rule.failure_message(document),
                        details: errors,
                    });
                }
            }

            if applicable {
                debug!(
                    file = %file.file_name,
                    rule = %rule.identifier,
                    passed = occurrences.is_empty(),
                    "rule evaluated"
                );
                aggregator.add_rule_result(&file.file_name, rule, occurrences);
            }
        }
    }

    let result = aggregator.finish(rules.len());
    let summary = result.summary();
    info!(
        policy = %data.policy.name(),
        files = summary.files_count,
        failed = summary.total_failed_rules,
        passed = summary.total_passed_count,
        "policy evaluation finished"
    );
    Ok(result)
}
