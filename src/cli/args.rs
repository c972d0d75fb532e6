//! Command line arguments for kubegate.
//!
//! Parsing is done by clap; the two value rules that need exact error texts
//! (`--output` and `--schema-version`) are checked by
//! [`TestCommandFlags::validate`] before any pipeline stage runs.

use clap::{ArgAction, Args, Parser, Subcommand};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

lazy_static! {
    static ref SCHEMA_VERSION: Regex =
        Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+$").expect("valid schema version regex");
}

/// Kubernetes manifest schema validation and policy checks
#[derive(Debug, Parser)]
#[command(name = "kubegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate manifests against schemas and run the policy check
    Test(TestCommandFlags),
    /// Print version information
    Version,
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Simple,
    Json,
    Yaml,
    /// JUnit XML for CI/CD integration
    Xml,
}

impl OutputFormat {
    /// Parse a flag value. Matching is case-sensitive and empty means simple.
    pub fn from_flag(value: &str) -> Option<Self> {
        match value {
            "" | "simple" => Some(OutputFormat::Simple),
            "json" => Some(OutputFormat::Json),
            "yaml" => Some(OutputFormat::Yaml),
            "xml" => Some(OutputFormat::Xml),
            _ => None,
        }
    }

    /// Interactive runs print warnings, summaries and prompts; the others
    /// print a single machine-readable document.
    pub fn is_interactive(&self) -> bool {
        matches!(self, OutputFormat::Simple)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Simple => write!(f, "simple"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
            OutputFormat::Xml => write!(f, "xml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlagValidationError {
    #[error("Invalid --output option - \"{0}\"\nValid output values are - simple, yaml, json, xml\n")]
    InvalidOutput(String),

    #[error("The specified schema-version \"{0}\" is not in the correct format.\nMake sure you are following the semantic versioning format <MAJOR>.<MINOR>.<PATCH>\nRead more about kubernetes versioning: https://kubernetes.io/releases/version-skew-policy/#supported-versions")]
    InvalidSchemaVersion(String),
}

/// Flags of the `test` command.
#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct TestCommandFlags {
    /// Manifest files, directories or glob patterns
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Output format: simple, json, yaml or xml
    #[arg(short, long, default_value = "", env = "KUBEGATE_OUTPUT")]
    pub output: String,

    /// Kubernetes version to validate against (<MAJOR>.<MINOR>.<PATCH>)
    #[arg(short = 's', long = "schema-version", default_value = "", env = "KUBEGATE_SCHEMA_VERSION")]
    pub schema_version: String,

    /// Policy to evaluate (defaults to the account default policy)
    #[arg(short, long, default_value = "", env = "KUBEGATE_POLICY")]
    pub policy: String,

    /// Accept resources whose schema cannot be found
    #[arg(long)]
    pub ignore_missing_schemas: bool,

    /// Skip files that are not Kubernetes manifests instead of failing them
    #[arg(long)]
    pub only_k8s_files: bool,

    /// Extra schema location (directory or URL template), repeatable
    #[arg(long = "schema-location")]
    pub schema_locations: Vec<String>,

    /// Do not submit results to the policy service
    #[arg(long)]
    pub no_record: bool,

    /// Use the bundled policy and never contact the policy service
    #[arg(long)]
    pub offline: bool,
}

impl TestCommandFlags {
    /// Check `--output` then `--schema-version`.
    pub fn validate(&self) -> Result<(), FlagValidationError> {
        if OutputFormat::from_flag(&self.output).is_none() {
            return Err(FlagValidationError::InvalidOutput(self.output.clone()));
        }
        if !self.schema_version.is_empty() && !SCHEMA_VERSION.is_match(&self.schema_version) {
            return Err(FlagValidationError::InvalidSchemaVersion(
                self.schema_version.clone(),
            ));
        }
        Ok(())
    }

    /// The validated output format.
    pub fn output_format(&self) -> Result<OutputFormat, FlagValidationError> {
        OutputFormat::from_flag(&self.output)
            .ok_or_else(|| FlagValidationError::InvalidOutput(self.output.clone()))
    }
}
