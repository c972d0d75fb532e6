//! Evaluation result model and aggregation.
//!
//! Results are keyed file -> rule identifier in insertion order, so two runs
//! over the same input serialize identically.

use crate::policy::{Rule, Severity};
use indexmap::IndexMap;
use serde::Serialize;

/// Run-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_failed_rules: usize,
    pub files_count: usize,
    pub total_passed_count: usize,
}

/// One failing document for a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureOccurrence {
    pub document_index: usize,
    pub kind: String,
    pub name: String,
    pub message: String,
    pub details: Vec<String>,
}

/// Outcome of one rule over one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub identifier: String,
    pub name: String,
    pub severity: Severity,
    pub documentation_url: Option<String>,
    pub passed: bool,
    pub occurrences: Vec<FailureOccurrence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResults {
    pub file_name_rule_mapper: IndexMap<String, IndexMap<String, RuleResult>>,
    pub summary: Summary,
}

impl EvaluationResults {
    /// Failed (file, rule) pairs in mapper order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RuleResult)> {
        self.file_name_rule_mapper.iter().flat_map(|(file, rules)| {
            rules
                .values()
                .filter(|r| !r.passed)
                .map(move |r| (file.as_str(), r))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedResults {
    pub evaluation_results: EvaluationResults,
}

/// Per-rule totals across all files.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesData {
    pub identifier: String,
    pub name: String,
    pub severity: Severity,
    pub failed_files: usize,
    pub passed_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesData {
    pub file_name: String,
    pub configurations_count: usize,
}

/// Per-document outcome of an applicable rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    pub file_name: String,
    pub document_index: usize,
    pub rule_identifier: String,
    pub passed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheckResultData {
    pub formatted_results: FormattedResults,
    pub rules_data: Vec<RulesData>,
    pub files_data: Vec<FilesData>,
    pub raw_results: Vec<RawResult>,
    pub rules_count: usize,
}

impl PolicyCheckResultData {
    pub fn summary(&self) -> Summary {
        self.formatted_results.evaluation_results.summary
    }
}

/// Incremental builder for [`PolicyCheckResultData`].
///
/// Files and rules must be added in their final order; nothing is sorted
/// afterwards.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    mapper: IndexMap<String, IndexMap<String, RuleResult>>,
    rules_data: IndexMap<String, RulesData>,
    files_data: Vec<FilesData>,
    raw_results: Vec<RawResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule so that it appears in the rule totals even if it
    /// never applied.
    pub fn add_rule(&mut self, rule: &Rule) {
        self.rules_data
            .entry(rule.identifier.clone())
            .or_insert_with(|| RulesData {
                identifier: rule.identifier.clone(),
                name: rule.name.clone(),
                severity: rule.severity,
                failed_files: 0,
                passed_files: 0,
            });
    }

    /// Register a schema-valid file. Every registered file becomes a mapper key.
    pub fn add_file(&mut self, file_name: &str, configurations_count: usize) {
        self.mapper.entry(file_name.to_string()).or_default();
        self.files_data.push(FilesData {
            file_name: file_name.to_string(),
            configurations_count,
        });
    }

    pub fn add_raw_result(&mut self, raw: RawResult) {
        self.raw_results.push(raw);
    }

    /// Record the outcome of `rule` over `file_name`. An empty
    /// `occurrences` list means the rule passed.
    pub fn add_rule_result(
        &mut self,
        file_name: &str,
        rule: &Rule,
        occurrences: Vec<FailureOccurrence>,
    ) {
        let passed = occurrences.is_empty();
        self.add_rule(rule);
        if let Some(totals) = self.rules_data.get_mut(&rule.identifier) {
            if passed {
                totals.passed_files += 1;
            } else {
                totals.failed_files += 1;
            }
        }

        self.mapper.entry(file_name.to_string()).or_default().insert(
            rule.identifier.clone(),
            RuleResult {
                identifier: rule.identifier.clone(),
                name: rule.name.clone(),
                severity: rule.severity,
                documentation_url: rule.documentation_url.clone(),
                passed,
                occurrences,
            },
        );
    }

    pub fn get_summary(&self) -> Summary {
        let mut summary = Summary {
            files_count: self.mapper.len(),
            ..Summary::default()
        };
        for result in self.mapper.values().flat_map(|rules| rules.values()) {
            if result.passed {
                summary.total_passed_count += 1;
            } else {
                summary.total_failed_rules += 1;
            }
        }
        summary
    }

    /// Finalize into the immutable result set.
    pub fn finish(self, rules_count: usize) -> PolicyCheckResultData {
        let summary = self.get_summary();
        PolicyCheckResultData {
            formatted_results: FormattedResults {
                evaluation_results: EvaluationResults {
                    file_name_rule_mapper: self.mapper,
                    summary,
                },
            },
            rules_data: self.rules_data.into_values().collect(),
            files_data: self.files_data,
            raw_results: self.raw_results,
            rules_count,
        }
    }
}
