//! Output for kubegate.
//!
//! Interactive (`simple`) runs go through a [`Printer`], which renders
//! per-file warnings, the stage summary and the rule table. The other output
//! formats serialize the whole [`RunReport`] into one document.
//!
//! # Graceful Degradation
//!
//! - Non-TTY output: color disabled via NO_COLOR or --no-color
//! - Empty reports: every formatter produces a valid document
//! - Filter-only runs: the policy sections are omitted

use crate::cli::args::OutputFormat;
use crate::engine::result::{EvaluationSummary, FailedStage, RunReport, SummaryTable};
use crate::policy::Severity;
use parking_lot::Mutex;
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("failed to serialize report as {format}: {message}")]
    Serialize { format: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Yellow,
    Red,
    Cyan,
    Gray,
    Plain,
}

impl Color {
    fn code(&self) -> Option<&'static str> {
        match self {
            Color::Green => Some("32"),
            Color::Yellow => Some("33"),
            Color::Red => Some("31"),
            Color::Cyan => Some("36"),
            Color::Gray => Some("90"),
            Color::Plain => None,
        }
    }

    /// Parse a color name sent by the policy service.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "green" => Color::Green,
            "yellow" => Color::Yellow,
            "red" => Color::Red,
            "cyan" | "blue" => Color::Cyan,
            "gray" | "grey" => Color::Gray,
            _ => Color::Plain,
        }
    }
}

/// Colors used for each kind of line.
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub enabled: bool,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub highlight: Color,
    pub muted: Color,
}

impl Theme {
    pub fn colored() -> Self {
        Theme {
            enabled: true,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            highlight: Color::Cyan,
            muted: Color::Gray,
        }
    }

    pub fn monochrome() -> Self {
        Theme {
            enabled: false,
            ..Self::colored()
        }
    }

    pub fn paint(&self, text: &str, color: Color) -> String {
        match color.code() {
            Some(code) if self.enabled => format!("\x1b[{}m{}\x1b[0m", code, text),
            _ => text.to_string(),
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::colored()
    }
}

/// A rule that failed for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRule {
    pub name: String,
    pub severity: Severity,
    pub documentation_url: Option<String>,
    pub messages: Vec<String>,
}

/// Everything worth telling the user about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub title: String,
    pub failed_stage: Option<FailedStage>,
    pub invalid_errors: Vec<String>,
    pub validation_warning: Option<String>,
    pub failed_rules: Vec<FailedRule>,
}

/// Build the per-file warnings of a report: rejected files first, then
/// evaluated files with a degradation notice or a failed rule.
pub fn warnings_from_report(report: &RunReport) -> Vec<Warning> {
    let mut warnings: Vec<Warning> = report
        .invalid_files
        .iter()
        .map(|file| Warning {
            title: file.path.clone(),
            failed_stage: Some(file.stage),
            invalid_errors: file.errors.clone(),
            validation_warning: None,
            failed_rules: Vec::new(),
        })
        .collect();

    let mut valid_files: Vec<&str> = report.warnings.keys().map(String::as_str).collect();
    if let Some(results) = report.results() {
        valid_files = results
            .file_name_rule_mapper
            .keys()
            .map(String::as_str)
            .collect();
    }

    for file in valid_files {
        let failed_rules: Vec<FailedRule> = report
            .results()
            .and_then(|results| results.file_name_rule_mapper.get(file))
            .map(|rules| {
                rules
                    .values()
                    .filter(|r| !r.passed)
                    .map(|r| FailedRule {
                        name: r.name.clone(),
                        severity: r.severity,
                        documentation_url: r.documentation_url.clone(),
                        messages: r.occurrences.iter().map(|o| o.message.clone()).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let validation_warning = report.warnings.get(file).cloned();

        if failed_rules.is_empty() && validation_warning.is_none() {
            continue;
        }
        warnings.push(Warning {
            title: file.to_string(),
            failed_stage: None,
            invalid_errors: Vec::new(),
            validation_warning,
            failed_rules,
        });
    }

    warnings
}

/// Presentation surface used by the orchestrator.
pub trait Printer: Send + Sync {
    fn print_warnings(&self, warnings: &[Warning]);
    fn print_summary_table(&self, table: &SummaryTable);
    fn print_evaluation_summary(&self, summary: &EvaluationSummary, k8s_version: &str);
    fn print_message(&self, text: &str, color: Color);
    fn print_prompt_message(&self, text: &str);
    fn set_theme(&self, theme: Theme);
}

/// Printer writing to the terminal. Prompts go to stderr so that stdout
/// holds only the report.
pub struct ConsolePrinter {
    theme: Mutex<Theme>,
}

impl ConsolePrinter {
    pub fn new(theme: Theme) -> Self {
        ConsolePrinter {
            theme: Mutex::new(theme),
        }
    }

    fn theme(&self) -> Theme {
        self.theme.lock().clone()
    }
}

impl Default for ConsolePrinter {
    fn default() -> Self {
        Self::new(Theme::default())
    }
}

impl Printer for ConsolePrinter {
    fn print_warnings(&self, warnings: &[Warning]) {
        print!("{}", render_warnings(warnings, &self.theme()));
    }

    fn print_summary_table(&self, table: &SummaryTable) {
        print!("{}", render_summary_table(table, &self.theme()));
    }

    fn print_evaluation_summary(&self, summary: &EvaluationSummary, k8s_version: &str) {
        print!(
            "{}",
            render_evaluation_summary(summary, k8s_version, &self.theme())
        );
    }

    fn print_message(&self, text: &str, color: Color) {
        println!("{}", self.theme().paint(text, color));
    }

    fn print_prompt_message(&self, text: &str) {
        let theme = self.theme();
        eprintln!("\n{}", theme.paint(text, theme.highlight));
    }

    fn set_theme(&self, theme: Theme) {
        *self.theme.lock() = theme;
    }
}

const RULE: &str =
    "--------------------------------------------------------------------------------";

pub fn render_warnings(warnings: &[Warning], theme: &Theme) -> String {
    let mut output = String::new();

    for warning in warnings {
        let _ = writeln!(output, ">>  File: {}\n", warning.title);

        match warning.failed_stage {
            Some(FailedStage::Yaml) => {
                let _ = writeln!(output, "  {} YAML validation", theme.paint("[FAIL]", theme.error));
            }
            Some(FailedStage::Schema) => {
                let _ = writeln!(output, "  {} YAML validation", theme.paint("[PASS]", theme.success));
                let _ = writeln!(
                    output,
                    "  {} Kubernetes schema validation",
                    theme.paint("[FAIL]", theme.error)
                );
            }
            None => {
                let _ = writeln!(output, "  {} YAML validation", theme.paint("[PASS]", theme.success));
                let _ = writeln!(
                    output,
                    "  {} Kubernetes schema validation",
                    theme.paint("[PASS]", theme.success)
                );
            }
        }

        for error in &warning.invalid_errors {
            let _ = writeln!(output, "      {}", theme.paint(error, theme.error));
        }

        if let Some(notice) = &warning.validation_warning {
            let _ = writeln!(output, "  {} {}", theme.paint("[WARN]", theme.warning), notice);
        }

        if !warning.failed_rules.is_empty() {
            let _ = writeln!(output, "\n  {} Policy check\n", theme.paint("[FAIL]", theme.error));
            for rule in &warning.failed_rules {
                let plural = if rule.messages.len() == 1 { "" } else { "s" };
                let _ = writeln!(
                    output,
                    "    {}  [{} occurrence{}] ({})",
                    theme.paint(&rule.name, theme.error),
                    rule.messages.len(),
                    plural,
                    rule.severity
                );
                for message in &rule.messages {
                    let _ = writeln!(output, "      - {}", message);
                }
                if let Some(url) = &rule.documentation_url {
                    let _ = writeln!(output, "      {}", theme.paint(url, theme.muted));
                }
            }
        }
        output.push('\n');
    }

    output
}

pub fn render_evaluation_summary(
    summary: &EvaluationSummary,
    k8s_version: &str,
    theme: &Theme,
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{}", RULE);
    let _ = writeln!(output, "(Summary)\n");

    let line = |passed: usize, label: &str| {
        let color = if passed == summary.files_count {
            theme.success
        } else {
            theme.error
        };
        format!(
            "- {} {}\n",
            theme.paint(&format!("Passing {}:", label), color),
            format!("{}/{}", passed, summary.files_count)
        )
    };

    output.push_str(&line(summary.passed_yaml_validation_count, "YAML validation"));
    output.push_str(&line(
        summary.passed_k8s_validation_count,
        &format!("Kubernetes ({}) schema validation", k8s_version),
    ));
    match summary.passed_policy_check_count {
        Some(passed) => output.push_str(&line(passed, "policy check")),
        None => {
            let _ = writeln!(output, "- Policy check: {}", theme.paint("skipped", theme.muted));
        }
    }
    output.push('\n');
    output
}

pub fn render_summary_table(table: &SummaryTable, theme: &Theme) -> String {
    let rows = [
        ("Enabled rules in policy", table.enabled_rules_count, theme.highlight),
        ("Configs tested against policy", table.configs_count, theme.highlight),
        ("Total rules evaluated", table.rules_evaluated, theme.highlight),
        ("Total rules skipped", table.rules_skipped, theme.muted),
        (
            "Total rules failed",
            table.rules_failed,
            if table.rules_failed > 0 { theme.error } else { theme.success },
        ),
        ("Total rules passed", table.rules_passed, theme.success),
    ];

    let mut output = String::new();
    let _ = writeln!(output, "{}", RULE);
    for (label, value, color) in rows {
        let _ = writeln!(output, "| {:<40} | {} ", label, theme.paint(&value.to_string(), color));
    }
    let _ = writeln!(output, "{}", RULE);
    output
}

/// Formatter for the non-interactive output formats.
pub trait OutputFormatter {
    fn format(&self, report: &RunReport) -> Result<String, ReportError>;
}

pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        JsonFormatter { pretty }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &RunReport) -> Result<String, ReportError> {
        let result = if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        };
        result.map_err(|e| ReportError::Serialize {
            format: "json".to_string(),
            message: e.to_string(),
        })
    }
}

pub struct YamlFormatter;

impl OutputFormatter for YamlFormatter {
    fn format(&self, report: &RunReport) -> Result<String, ReportError> {
        serde_yaml::to_string(report).map_err(|e| ReportError::Serialize {
            format: "yaml".to_string(),
            message: e.to_string(),
        })
    }
}

/// JUnit XML formatter: one test suite per evaluated file, one test case
/// per recorded rule outcome, plus a suite for rejected files.
pub struct XmlFormatter;

impl XmlFormatter {
    fn escape_xml(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => result.push_str("&amp;"),
                '<' => result.push_str("&lt;"),
                '>' => result.push_str("&gt;"),
                '"' => result.push_str("&quot;"),
                '\'' => result.push_str("&apos;"),
                c => result.push(c),
            }
        }
        result
    }
}

impl OutputFormatter for XmlFormatter {
    fn format(&self, report: &RunReport) -> Result<String, ReportError> {
        let summary = report.summary();
        let mut output = String::new();
        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(
            output,
            "<testsuites name=\"kubegate\" tests=\"{}\" failures=\"{}\" errors=\"{}\">",
            summary.total_failed_rules + summary.total_passed_count + report.invalid_files.len(),
            summary.total_failed_rules,
            report.invalid_files.len()
        );

        if let Some(results) = report.results() {
            for (file, rules) in &results.file_name_rule_mapper {
                let failures = rules.values().filter(|r| !r.passed).count();
                let _ = writeln!(
                    output,
                    "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\">",
                    Self::escape_xml(file),
                    rules.len(),
                    failures
                );
                if let Some(notice) = report.warnings.get(file) {
                    let _ = writeln!(
                        output,
                        "    <system-out>WARNING: {}</system-out>",
                        Self::escape_xml(notice)
                    );
                }
                for rule in rules.values() {
                    let _ = write!(
                        output,
                        "    <testcase name=\"{}\" classname=\"kubegate.{}\"",
                        Self::escape_xml(&rule.identifier),
                        Self::escape_xml(&report.policy_name)
                    );
                    if rule.passed {
                        output.push_str(" />\n");
                        continue;
                    }
                    output.push_str(">\n");
                    let details: Vec<String> =
                        rule.occurrences.iter().map(|o| o.message.clone()).collect();
                    let _ = writeln!(
                        output,
                        "      <failure message=\"{}\" type=\"{}\">{}</failure>",
                        Self::escape_xml(&rule.name),
                        rule.severity,
                        Self::escape_xml(&details.join("\n"))
                    );
                    output.push_str("    </testcase>\n");
                }
                output.push_str("  </testsuite>\n");
            }
        }

        if !report.invalid_files.is_empty() {
            let _ = writeln!(
                output,
                "  <testsuite name=\"validation\" tests=\"{}\" failures=\"0\" errors=\"{}\">",
                report.invalid_files.len(),
                report.invalid_files.len()
            );
            for file in &report.invalid_files {
                let stage = match file.stage {
                    FailedStage::Yaml => "yaml",
                    FailedStage::Schema => "schema",
                };
                let _ = writeln!(
                    output,
                    "    <testcase name=\"{}\" classname=\"kubegate.validation\">",
                    Self::escape_xml(&file.path)
                );
                let _ = writeln!(
                    output,
                    "      <error message=\"{} validation failed\">{}</error>",
                    stage,
                    Self::escape_xml(&file.errors.join("\n"))
                );
                output.push_str("    </testcase>\n");
            }
            output.push_str("  </testsuite>\n");
        }

        output.push_str("</testsuites>");
        Ok(output)
    }
}

/// Formatter for a non-interactive format; `None` for `simple`.
pub fn get_formatter(format: OutputFormat) -> Option<Box<dyn OutputFormatter>> {
    match format {
        OutputFormat::Simple => None,
        OutputFormat::Json => Some(Box::new(JsonFormatter::new(true))),
        OutputFormat::Yaml => Some(Box::new(YamlFormatter)),
        OutputFormat::Xml => Some(Box::new(XmlFormatter)),
    }
}
