//! Run report and outcome.
//!
//! Collects everything one run produced (classification of every input
//! file, evaluation results, degradation notices) and derives the exit code.

use crate::evaluation::results::{PolicyCheckResultData, Summary};
use crate::evaluation::EvaluationResults;
use crate::extractor::InvalidFile;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Exit code for a run that could not complete.
pub const ERROR_EXIT_CODE: u8 = 2;

/// Terminal state of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    PolicyFailure,
}

impl RunOutcome {
    pub fn from_summary(summary: &Summary) -> Self {
        if summary.total_failed_rules == 0 {
            RunOutcome::Success
        } else {
            RunOutcome::PolicyFailure
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::PolicyFailure => 1,
        }
    }
}

/// Which stage rejected a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedStage {
    Yaml,
    Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidFileReport {
    pub path: String,
    pub stage: FailedStage,
    pub errors: Vec<String>,
}

impl From<&InvalidFile> for InvalidFileReport {
    fn from(file: &InvalidFile) -> Self {
        InvalidFileReport {
            path: file.path.clone(),
            stage: if file.is_parse_failure() {
                FailedStage::Yaml
            } else {
                FailedStage::Schema
            },
            errors: file.errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Per-stage file counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub files_count: usize,
    pub configs_count: usize,
    pub passed_yaml_validation_count: usize,
    pub passed_k8s_validation_count: usize,
    /// None when the policy check did not run
    pub passed_policy_check_count: Option<usize>,
}

/// Rule-level totals shown after an interactive run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTable {
    pub enabled_rules_count: usize,
    pub configs_count: usize,
    pub rules_evaluated: usize,
    pub rules_skipped: usize,
    pub rules_failed: usize,
    pub rules_passed: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub policy_name: String,
    pub k8s_version: String,
    pub started_at: DateTime<Utc>,
    pub evaluation_summary: EvaluationSummary,
    pub invalid_files: Vec<InvalidFileReport>,
    /// Degradation notices keyed by path, in input order
    pub warnings: IndexMap<String, String>,
    pub ignored_files: Vec<String>,
    pub stage_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_check: Option<PolicyCheckResultData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<u64>,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        self.policy_check
            .as_ref()
            .map(PolicyCheckResultData::summary)
            .unwrap_or_default()
    }

    pub fn results(&self) -> Option<&EvaluationResults> {
        self.policy_check
            .as_ref()
            .map(|check| &check.formatted_results.evaluation_results)
    }

    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_summary(&self.summary())
    }

    pub fn summary_table(&self) -> SummaryTable {
        let summary = self.summary();
        let enabled_rules_count = self.policy_check.as_ref().map_or(0, |c| c.rules_count);
        let evaluated = summary.total_failed_rules + summary.total_passed_count;
        SummaryTable {
            enabled_rules_count,
            configs_count: self.evaluation_summary.configs_count,
            rules_evaluated: evaluated,
            rules_skipped: (enabled_rules_count * summary.files_count).saturating_sub(evaluated),
            rules_failed: summary.total_failed_rules,
            rules_passed: summary.total_passed_count,
        }
    }
}
