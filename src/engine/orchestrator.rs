//! Test command orchestration.
//!
//! Wires the pipeline stages together:
//!
//! ```text
//! resolve paths -> extract -> validate -> (filter-only) -> evaluate -> submit -> report
//! ```
//!
//! Each arrow is a collection barrier: a stage starts consuming results only
//! once the previous one has closed all of its streams.
//!
//! # Graceful Degradation
//!
//! - Policy service unreachable: the bundled policy is used and results are
//!   not submitted
//! - Schema source unreachable: files stay valid with a warning
//! - Result submission failure: reported as a warning, outcome unchanged
//! - Unknown policy name: fatal, no summary is printed

use crate::cli::args::{OutputFormat, TestCommandFlags};
use crate::cli::output::{get_formatter, warnings_from_report, Color, ConsolePrinter, Printer};
use crate::client::{CliClient, ClientSettings};
use crate::config::{FileConfigStore, LocalConfigStore};
use crate::engine::result::{EvaluationSummary, InvalidFileReport, RunOutcome, RunReport};
use crate::evaluation::{EvaluationRequestData, Evaluator, PolicyCheckData, PolicyEvaluator};
use crate::extractor::{stream_file_configurations, FileConfigurations, InvalidFile};
use crate::files::{FileResolver, GlobFileResolver};
use crate::messager::{Messager, VersionMessenger};
use crate::policy::{bundled_definitions, create_policy, Policy};
use crate::validation::schema::{default_cache_dir, SchemaSettings, DEFAULT_K8S_VERSION};
use crate::validation::{K8sFileStreams, K8sValidator, ResourceValidator, ValidationStreams, DEFAULT_CONCURRENCY};
use crate::version::cli_version;
use crate::KubegateError;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Collaborators of the test command.
pub struct TestCommandContext {
    pub k8s_validator: Arc<dyn ResourceValidator>,
    pub evaluator: Arc<dyn Evaluator>,
    pub local_config: Arc<dyn LocalConfigStore>,
    pub messager: Arc<dyn Messager>,
    pub printer: Arc<dyn Printer>,
    pub reader: Arc<dyn FileResolver>,
}

impl TestCommandContext {
    /// Context backed by the network, the filesystem and the terminal.
    pub fn production() -> Result<Self, KubegateError> {
        let client = Arc::new(CliClient::new(ClientSettings::from_env())?);
        debug!(backend = %client.base_url(), "policy service client ready");
        Ok(TestCommandContext {
            k8s_validator: Arc::new(K8sValidator::new()),
            evaluator: Arc::new(PolicyEvaluator::new(client.clone())),
            local_config: Arc::new(FileConfigStore::default_location()),
            messager: Arc::new(VersionMessenger::new(client)),
            printer: Arc::new(ConsolePrinter::default()),
            reader: Arc::new(GlobFileResolver::new()),
        })
    }
}

/// Resolved settings of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCommandData {
    /// Empty means the default version
    pub k8s_version: String,
    pub output: OutputFormat,
    /// Built from the bundled definitions when absent
    pub policy: Option<Policy>,
    pub policy_name: String,
    pub token: String,
    pub only_k8s_files: bool,
    pub ignore_missing_schemas: bool,
    pub schema_locations: Vec<String>,
    /// On-disk schema cache; `None` disables it
    pub schema_cache_dir: Option<PathBuf>,
    pub offline: bool,
    pub no_record: bool,
    pub concurrency: usize,
    pub prompt_message: Option<String>,
}

impl Default for TestCommandData {
    fn default() -> Self {
        TestCommandData {
            k8s_version: String::new(),
            output: OutputFormat::Simple,
            policy: None,
            policy_name: String::new(),
            token: String::new(),
            only_k8s_files: false,
            ignore_missing_schemas: false,
            schema_locations: Vec::new(),
            schema_cache_dir: default_cache_dir(),
            offline: false,
            no_record: false,
            concurrency: DEFAULT_CONCURRENCY,
            prompt_message: None,
        }
    }
}

impl TestCommandData {
    fn should_submit(&self) -> bool {
        !self.offline && !self.no_record
    }
}

/// Policy selected for a run and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPolicy {
    pub policy: Policy,
    /// True when the bundled definitions were used
    pub offline: bool,
    pub default_k8s_version: Option<String>,
    pub prompt_message: Option<String>,
}

/// Fetch prerun data and build the requested policy.
///
/// A network failure falls back to the bundled definitions. Any other remote
/// error and an unknown policy name are fatal.
pub async fn prepare_policy(
    ctx: &TestCommandContext,
    token: &str,
    policy_name: &str,
    offline: bool,
) -> Result<PreparedPolicy, KubegateError> {
    if offline {
        let policy = create_policy(&bundled_definitions()?, policy_name)?;
        return Ok(PreparedPolicy {
            policy,
            offline: true,
            default_k8s_version: None,
            prompt_message: None,
        });
    }

    match ctx.evaluator.request_evaluation_prerun_data(token).await {
        Ok(response) => {
            debug!(status = response.status, "prerun data received");
            let policy = create_policy(&response.data.policies_json, policy_name)?;
            Ok(PreparedPolicy {
                policy,
                offline: false,
                default_k8s_version: response.data.default_k8s_version,
                prompt_message: response.data.prompt_message,
            })
        }
        Err(e) if e.is_network_failure() => {
            warn!(error = %e, "policy service unreachable, using bundled policy");
            let policy = create_policy(&bundled_definitions()?, policy_name)?;
            Ok(PreparedPolicy {
                policy,
                offline: true,
                default_k8s_version: None,
                prompt_message: None,
            })
        }
        Err(e) => Err(e.into()),
    }
}

async fn drain<T>(mut rx: mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

/// Run the pipeline over `paths` and report the results.
pub async fn test(
    ctx: &TestCommandContext,
    paths: &[String],
    data: &TestCommandData,
) -> Result<RunReport, KubegateError> {
    let started_at = Utc::now();
    let k8s_version = if data.k8s_version.is_empty() {
        DEFAULT_K8S_VERSION.to_string()
    } else {
        data.k8s_version.clone()
    };
    let interactive = data.output.is_interactive();

    let files = ctx.reader.filter_files(paths)?;
    info!(files = files.len(), k8s_version = %k8s_version, "starting test run");

    let version_messages =
        (interactive && !data.offline).then(|| ctx.messager.load_version_messages(cli_version()));

    ctx.k8s_validator.init_client(SchemaSettings {
        k8s_version: k8s_version.clone(),
        ignore_missing_schemas: data.ignore_missing_schemas,
        schema_locations: data.schema_locations.clone(),
        cache_dir: data.schema_cache_dir.clone(),
    });

    let concurrency = data.concurrency.max(1);
    let (input_tx, input_rx) = mpsc::channel(concurrency);
    let extraction = tokio::spawn(stream_file_configurations(files.clone(), input_tx));

    let (streams, other, forward) = if data.only_k8s_files {
        let K8sFileStreams { mut k8s, other } = ctx.k8s_validator.get_k8s_files(input_rx, concurrency);
        let (k8s_tx, k8s_rx) = mpsc::channel(concurrency);
        let forward = tokio::spawn(async move {
            while let Some(file) = k8s.recv().await {
                if k8s_tx.send(file).await.is_err() {
                    break;
                }
            }
        });
        let streams = ctx.k8s_validator.validate_resources(k8s_rx, concurrency);
        (streams, other, Some(forward))
    } else {
        let (_, other) = mpsc::unbounded_channel::<FileConfigurations>();
        let streams = ctx.k8s_validator.validate_resources(input_rx, concurrency);
        (streams, other, None)
    };

    let ValidationStreams {
        valid,
        invalid,
        warnings,
        errors,
    } = streams;
    let (mut valid, schema_invalid, mut warnings, stage_errors, mut ignored) = tokio::join!(
        drain(valid),
        drain(invalid),
        drain(warnings),
        drain(errors),
        drain(other)
    );

    let parse_failures = extraction
        .await
        .map_err(|e| KubegateError::Pipeline(e.to_string()))?;
    if let Some(forward) = forward {
        forward
            .await
            .map_err(|e| KubegateError::Pipeline(e.to_string()))?;
    }

    // Completion order is arbitrary; restore input order.
    let position: HashMap<&str, usize> = files
        .iter()
        .enumerate()
        .map(|(index, file)| (file.as_str(), index))
        .collect();
    let rank = |path: &str| position.get(path).copied().unwrap_or(usize::MAX);

    valid.sort_by_key(|file| rank(&file.file_name));
    warnings.sort_by_key(|warning| rank(&warning.path));
    ignored.sort_by_key(|file| rank(&file.file_name));
    let mut invalid_files: Vec<InvalidFile> =
        parse_failures.into_iter().chain(schema_invalid).collect();
    invalid_files.sort_by_key(|file| rank(&file.path));

    for error in &stage_errors {
        warn!(file = %error.path, message = %error.message, "validation stage error");
    }

    let warnings: IndexMap<String, String> = warnings
        .into_iter()
        .map(|warning| (warning.path, warning.warning))
        .collect();

    let mut evaluation_summary = EvaluationSummary {
        files_count: files.len(),
        configs_count: valid.iter().map(|f| f.configurations.len()).sum(),
        passed_yaml_validation_count: files
            .len()
            .saturating_sub(invalid_files.iter().filter(|f| f.is_parse_failure()).count()),
        passed_k8s_validation_count: valid.len(),
        passed_policy_check_count: None,
    };

    let mut report = RunReport {
        policy_name: String::new(),
        k8s_version: k8s_version.clone(),
        started_at,
        evaluation_summary: EvaluationSummary::default(),
        invalid_files: invalid_files.iter().map(InvalidFileReport::from).collect(),
        warnings,
        ignored_files: ignored.into_iter().map(|f| f.file_name).collect(),
        stage_errors: stage_errors.iter().map(|e| e.to_string()).collect(),
        policy_check: None,
        evaluation_id: None,
    };
    let mut prompt_message = data.prompt_message.clone();

    if data.only_k8s_files {
        info!(
            valid = valid.len(),
            ignored = report.ignored_files.len(),
            "filter-only run, skipping policy evaluation"
        );
    } else {
        let policy = match &data.policy {
            Some(policy) => policy.clone(),
            None => create_policy(&bundled_definitions()?, &data.policy_name)?,
        };
        report.policy_name = policy.name().to_string();

        let check_data = PolicyCheckData {
            files_configurations: valid,
            is_interactive_mode: interactive,
            policy_name: policy.name().to_string(),
            policy,
        };
        let result = ctx.evaluator.evaluate(check_data).await?;

        evaluation_summary.passed_policy_check_count = Some(
            result
                .formatted_results
                .evaluation_results
                .file_name_rule_mapper
                .values()
                .filter(|rules| rules.values().all(|r| r.passed))
                .count(),
        );

        if data.should_submit() {
            let request = EvaluationRequestData {
                token: data.token.clone(),
                cli_version: cli_version().to_string(),
                k8s_version: k8s_version.clone(),
                policy_name: report.policy_name.clone(),
                started_at,
                files_count: files.len(),
                failed_yaml_files: invalid_files
                    .iter()
                    .filter(|f| f.is_parse_failure())
                    .map(|f| f.path.clone())
                    .collect(),
                failed_k8s_files: invalid_files
                    .iter()
                    .filter(|f| !f.is_parse_failure())
                    .map(|f| f.path.clone())
                    .collect(),
                summary: result.summary(),
                results: result.formatted_results.evaluation_results.clone(),
            };

            match ctx.evaluator.send_evaluation_result(request).await {
                Ok(response) => {
                    debug!(evaluation_id = response.evaluation_id, "evaluation submitted");
                    report.evaluation_id = Some(response.evaluation_id);
                    if response.prompt_message.is_some() {
                        prompt_message = response.prompt_message;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to submit evaluation results");
                    if interactive {
                        ctx.printer.print_message(
                            &format!("Failed to send evaluation results: {}", e),
                            Color::Yellow,
                        );
                    }
                }
            }
        }

        report.policy_check = Some(result);
    }
    report.evaluation_summary = evaluation_summary;

    report_results(ctx.printer.as_ref(), &report, data.output)?;

    if interactive {
        if let Some(prompt) = prompt_message.filter(|p| !p.is_empty()) {
            ctx.printer.print_prompt_message(&prompt);
        }
    }
    if let Some(messages) = version_messages {
        if let Some(message) = ctx.messager.handle_version_message(messages).await {
            let color = Color::from_name(message.message_color.as_deref().unwrap_or_default());
            ctx.printer.print_message(&message.message_text, color);
        }
    }

    let summary = report.summary();
    info!(
        failed = summary.total_failed_rules,
        passed = summary.total_passed_count,
        invalid = report.invalid_files.len(),
        "test run finished"
    );
    Ok(report)
}

fn report_results(
    printer: &dyn Printer,
    report: &RunReport,
    format: OutputFormat,
) -> Result<(), KubegateError> {
    match get_formatter(format) {
        Some(formatter) => printer.print_message(&formatter.format(report)?, Color::Plain),
        None => {
            printer.print_warnings(&warnings_from_report(report));
            printer.print_evaluation_summary(&report.evaluation_summary, &report.k8s_version);
            if report.policy_check.is_some() {
                printer.print_summary_table(&report.summary_table());
            }
        }
    }
    Ok(())
}

/// Entry point of the `test` command: validate flags, prepare the policy,
/// run the pipeline.
pub async fn run_test_command(
    ctx: &TestCommandContext,
    flags: &TestCommandFlags,
) -> Result<RunOutcome, KubegateError> {
    flags.validate()?;
    let output = flags.output_format()?;

    let local = ctx.local_config.get_local_configuration()?;
    let mut offline = flags.offline || local.offline;

    let mut policy = None;
    let mut default_k8s_version = None;
    let mut prompt_message = None;
    if !flags.only_k8s_files {
        let prepared = prepare_policy(ctx, &local.token, &flags.policy, offline).await?;
        offline = prepared.offline;
        default_k8s_version = prepared.default_k8s_version;
        prompt_message = prepared.prompt_message;
        policy = Some(prepared.policy);
    }

    let k8s_version = [
        Some(flags.schema_version.clone()),
        local.schema_version.clone(),
        default_k8s_version,
    ]
    .into_iter()
    .flatten()
    .find(|version| !version.is_empty())
    .unwrap_or_default();

    let data = TestCommandData {
        k8s_version,
        output,
        policy_name: policy
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| flags.policy.clone()),
        policy,
        token: local.token,
        only_k8s_files: flags.only_k8s_files,
        ignore_missing_schemas: flags.ignore_missing_schemas,
        schema_locations: flags.schema_locations.clone(),
        schema_cache_dir: default_cache_dir(),
        offline,
        no_record: flags.no_record,
        concurrency: DEFAULT_CONCURRENCY,
        prompt_message,
    };

    let report = test(ctx, &flags.paths, &data).await?;
    Ok(report.outcome())
}
