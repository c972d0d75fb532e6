//! Policy construction.
//!
//! A policy is a named, ordered list of rules. Rule definitions come from the
//! prerun payload of the policy service, or from the bundled defaults when
//! the service cannot be reached. Each rule is an opaque JSON schema applied
//! to every document whose kind the rule targets.

use jsonschema::JSONSchema;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

const BUNDLED_DEFINITIONS: &str = include_str!("../../defaults/default_policy.json");

lazy_static! {
    static ref TEMPLATE_PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*(kind|name|namespace|apiVersion)\s*\}\}").expect("valid placeholder regex");
}

/// Policy construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("policy \"{name}\" not found; available policies: {available}")]
    PolicyNotFound { name: String, available: String },

    #[error("policy \"{policy}\" references unknown rule \"{identifier}\"")]
    RuleNotFound { policy: String, identifier: String },

    #[error("rule \"{identifier}\" has an invalid schema: {message}")]
    InvalidRuleSchema { identifier: String, message: String },

    #[error("failed to parse policy definitions: {0}")]
    Parse(String),
}

/// How serious a rule violation is. Display only; every failure counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    /// Any level this version does not know about
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
            Severity::Unknown => write!(f, "unknown"),
        }
    }
}

/// Raw policy definitions as delivered in prerun data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinitions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub policies: Vec<PolicyDefinition>,
    #[serde(default)]
    pub custom_rules: Vec<RuleDefinition>,
    #[serde(default)]
    pub default_rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub rules: Vec<PolicyRuleReference>,
}

/// A rule enabled by a policy, optionally overriding its failure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRuleReference {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_on_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    pub message_on_failure: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    /// Kinds the rule applies to; empty means every kind
    #[serde(default)]
    pub kinds: Vec<String>,
    pub schema: Value,
}

/// A rule of a built policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub identifier: String,
    pub name: String,
    pub severity: Severity,
    pub message_on_failure: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    pub kinds: Vec<String>,
    pub schema: Value,
}

impl Rule {
    /// Whether this rule targets `document`.
    pub fn applies_to(&self, document: &Value) -> bool {
        if self.kinds.is_empty() {
            return true;
        }
        document
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| self.kinds.iter().any(|k| k == kind))
    }

    /// Compile the rule schema.
    pub fn compile(&self) -> Result<JSONSchema, PolicyError> {
        JSONSchema::compile(&self.schema).map_err(|e| PolicyError::InvalidRuleSchema {
            identifier: self.identifier.clone(),
            message: e.to_string(),
        })
    }

    /// Render the failure message for a violating document.
    pub fn failure_message(&self, document: &Value) -> String {
        TEMPLATE_PLACEHOLDER
            .replace_all(&self.message_on_failure, |caps: &regex::Captures| {
                let value = match &caps[1] {
                    "kind" => document.get("kind"),
                    "apiVersion" => document.get("apiVersion"),
                    "name" => document.pointer("/metadata/name"),
                    _ => document.pointer("/metadata/namespace"),
                };
                value
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| "<unknown>".to_string())
            })
            .into_owned()
    }
}

/// An immutable, named, ordered set of rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    name: String,
    rules: Vec<Rule>,
}

impl Policy {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Policy {
            name: name.into(),
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl PolicyDefinitions {
    /// Parse definitions from a raw JSON payload.
    pub fn from_value(raw: Value) -> Result<Self, PolicyError> {
        serde_json::from_value(raw).map_err(|e| PolicyError::Parse(e.to_string()))
    }

    fn find_rule(&self, identifier: &str) -> Option<&RuleDefinition> {
        self.custom_rules
            .iter()
            .chain(self.default_rules.iter())
            .find(|r| r.identifier == identifier)
    }
}

/// Definitions shipped with the binary, used for offline runs.
pub fn bundled_definitions() -> Result<PolicyDefinitions, PolicyError> {
    serde_json::from_str(BUNDLED_DEFINITIONS).map_err(|e| PolicyError::Parse(e.to_string()))
}

/// Build the policy named `requested_name` (empty selects the default).
pub fn create_policy(
    definitions: &PolicyDefinitions,
    requested_name: &str,
) -> Result<Policy, PolicyError> {
    let selected = if requested_name.is_empty() {
        definitions
            .policies
            .iter()
            .find(|p| p.is_default)
            .or_else(|| definitions.policies.first())
    } else {
        definitions.policies.iter().find(|p| p.name == requested_name)
    };

    let Some(definition) = selected else {
        let available = definitions
            .policies
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(PolicyError::PolicyNotFound {
            name: if requested_name.is_empty() {
                "<default>".to_string()
            } else {
                requested_name.to_string()
            },
            available,
        });
    };

    let mut rules = Vec::with_capacity(definition.rules.len());
    for reference in &definition.rules {
        let rule_definition =
            definitions
                .find_rule(&reference.identifier)
                .ok_or_else(|| PolicyError::RuleNotFound {
                    policy: definition.name.clone(),
                    identifier: reference.identifier.clone(),
                })?;

        let rule = Rule {
            identifier: rule_definition.identifier.clone(),
            name: rule_definition.name.clone(),
            severity: rule_definition.severity,
            message_on_failure: reference
                .message_on_failure
                .clone()
                .unwrap_or_else(|| rule_definition.message_on_failure.clone()),
            documentation_url: rule_definition.documentation_url.clone(),
            kinds: rule_definition.kinds.clone(),
            schema: rule_definition.schema.clone(),
        };
        rule.compile()?;
        rules.push(rule);
    }

    debug!(policy = %definition.name, rules = rules.len(), "policy built");
    Ok(Policy::new(definition.name.clone(), rules))
}
