//! kubegate library
//!
//! Validates Kubernetes manifests against versioned resource schemas and a
//! configurable policy, producing a pass/fail report for CI gating.
//!
//! The pipeline runs in stages:
//! - extraction of YAML documents from every input file
//! - bounded-concurrency schema validation with offline degradation
//! - policy evaluation with deterministic aggregation
//! - reporting (terminal, json, yaml or JUnit xml)
//!
//! # Example
//!
//! ```no_run
//! use kubegate::engine::orchestrator::{run_test_command, TestCommandContext};
//! use kubegate::cli::args::TestCommandFlags;
//!
//! # async fn run() -> Result<(), kubegate::KubegateError> {
//! let ctx = TestCommandContext::production()?;
//! let flags = TestCommandFlags {
//!     paths: vec!["manifests/".to_string()],
//!     ..Default::default()
//! };
//! let outcome = run_test_command(&ctx, &flags).await?;
//! println!("exit code: {}", outcome.exit_code());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod extractor;
pub mod files;
pub mod messager;
pub mod policy;
pub mod validation;
pub mod version;

use thiserror::Error;

pub use engine::orchestrator::{run_test_command, test, TestCommandContext, TestCommandData};
pub use engine::result::{RunOutcome, RunReport};

/// Error types for kubegate operations.
///
/// Per-file problems (parse and schema errors) never surface here; they are
/// part of the report. These errors end the run.
#[derive(Debug, Error)]
pub enum KubegateError {
    #[error(transparent)]
    Flags(#[from] cli::args::FlagValidationError),

    #[error(transparent)]
    Files(#[from] files::FileResolveError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Policy(#[from] policy::PolicyError),

    #[error(transparent)]
    Evaluation(#[from] evaluation::EvaluationError),

    #[error(transparent)]
    Remote(#[from] client::RemoteError),

    #[error(transparent)]
    Report(#[from] cli::output::ReportError),

    #[error("pipeline task failed: {0}")]
    Pipeline(String),
}

impl KubegateError {
    /// Errors caused by invalid user input rather than the environment.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, KubegateError::Flags(_) | KubegateError::Files(_))
    }
}
