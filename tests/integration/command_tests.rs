//! Test command wiring tests.
//!
//! Drive `run_test_command` with recording collaborators and assert which
//! stages ran, with what arguments, and what reached the printer.

use crate::mocks::*;
use kubegate::cli::args::TestCommandFlags;
use kubegate::cli::output::Color;
use kubegate::client::{RemoteError, VersionMessage};
use kubegate::evaluation::PolicyCheckData;
use kubegate::policy::{bundled_definitions, create_policy};
use kubegate::validation::DEFAULT_CONCURRENCY;
use kubegate::{run_test_command, KubegateError, RunOutcome};
use std::sync::Arc;

fn flags(configure: impl FnOnce(&mut TestCommandFlags)) -> TestCommandFlags {
    let mut flags = TestCommandFlags {
        paths: vec!["8/*".to_string()],
        ..Default::default()
    };
    configure(&mut flags);
    flags
}

fn validate_calls(mocks: &MockSet) -> Vec<ValidatorCall> {
    mocks
        .validator
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, ValidatorCall::InitClient(_)))
        .collect()
}

#[tokio::test]
async fn test_invalid_output_flag_is_rejected() {
    let mocks = MockSet::default();
    let err = run_test_command(&mocks.context(), &flags(|f| f.output = "Simple".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, KubegateError::Flags(_)));
    assert!(err.is_usage_error());
    assert_eq!(
        err.to_string(),
        "Invalid --output option - \"Simple\"\nValid output values are - simple, yaml, json, xml\n"
    );
    assert!(mocks.validator.calls().is_empty());
    assert!(mocks.evaluator.prerun_calls().is_empty());
    assert!(mocks.reader.requests().is_empty());
}

#[tokio::test]
async fn test_invalid_schema_version_flag_is_rejected() {
    let mocks = MockSet::default();
    let err = run_test_command(&mocks.context(), &flags(|f| f.schema_version = "1.12".to_string()))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "The specified schema-version \"1.12\" is not in the correct format.\nMake sure you are following the semantic versioning format <MAJOR>.<MINOR>.<PATCH>\nRead more about kubernetes versioning: https://kubernetes.io/releases/version-skew-policy/#supported-versions"
    );
    assert!(mocks.validator.calls().is_empty());
}

#[tokio::test]
async fn test_no_flags_runs_interactive_pipeline() {
    let mocks = MockSet::default();
    let outcome = run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    assert_eq!(mocks.evaluator.prerun_calls(), vec![MOCK_TOKEN.to_string()]);
    assert_eq!(mocks.reader.requests(), vec![vec!["8/*".to_string()]]);
    assert_eq!(
        validate_calls(&mocks),
        vec![ValidatorCall::ValidateResources {
            concurrency: DEFAULT_CONCURRENCY
        }]
    );

    let expected = PolicyCheckData {
        files_configurations: vec![mock_valid_file()],
        is_interactive_mode: true,
        policy_name: "Default".to_string(),
        policy: create_policy(&mock_policy_definitions(), "").unwrap(),
    };
    assert_eq!(mocks.evaluator.evaluate_calls(), vec![expected]);
    assert_eq!(mocks.evaluator.send_calls().len(), 1);
    assert_eq!(mocks.messager.loads().len(), 1);
    assert!(mocks.printer.printed_summary());
}

#[tokio::test]
async fn test_structured_output_is_not_interactive() {
    for output in ["json", "yaml", "xml"] {
        let mocks = MockSet::default();
        run_test_command(&mocks.context(), &flags(|f| f.output = output.to_string()))
            .await
            .unwrap();

        let calls = mocks.evaluator.evaluate_calls();
        assert_eq!(calls.len(), 1, "output {}", output);
        assert!(!calls[0].is_interactive_mode, "output {}", output);
        assert!(mocks.messager.loads().is_empty(), "output {}", output);
        assert!(!mocks.printer.printed_summary(), "output {}", output);

        let messages = mocks.printer.messages();
        assert_eq!(messages.len(), 1, "output {}", output);
        assert_eq!(messages[0].1, Color::Plain);
    }
}

#[tokio::test]
async fn test_json_output_is_a_parseable_report() {
    let mocks = MockSet::default();
    run_test_command(&mocks.context(), &flags(|f| f.output = "json".to_string()))
        .await
        .unwrap();

    let (text, _) = mocks.printer.messages().remove(0);
    let report: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(report["policyName"], "Default");
    assert_eq!(report["k8sVersion"], "1.27.0");
    assert_eq!(report["evaluationId"], 42);
    let mapper = &report["policyCheck"]["formattedResults"]["evaluationResults"]["fileNameRuleMapper"];
    assert_eq!(mapper["valid/path"]["DEPLOYMENT_INCORRECT_REPLICAS"]["passed"], true);
}

#[tokio::test]
async fn test_only_k8s_files_filters_before_validation() {
    let mocks = MockSet::default();
    let outcome = run_test_command(&mocks.context(), &flags(|f| f.only_k8s_files = true))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(
        validate_calls(&mocks),
        vec![
            ValidatorCall::GetK8sFiles {
                concurrency: DEFAULT_CONCURRENCY
            },
            ValidatorCall::ValidateResources {
                concurrency: DEFAULT_CONCURRENCY
            },
        ]
    );
    assert!(mocks.evaluator.prerun_calls().is_empty());
    assert!(mocks.evaluator.evaluate_calls().is_empty());
    assert!(mocks.evaluator.send_calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_service_falls_back_to_bundled_policy() {
    let mocks = MockSet {
        evaluator: Arc::new(MockEvaluator::offline()),
        ..Default::default()
    };
    let outcome = run_test_command(&mocks.context(), &flags(|_| {})).await;
    assert!(outcome.is_ok());

    let calls = mocks.evaluator.evaluate_calls();
    assert_eq!(calls.len(), 1);
    let bundled = create_policy(&bundled_definitions().unwrap(), "").unwrap();
    assert_eq!(calls[0].policy, bundled);
    assert_eq!(calls[0].policy_name, bundled.name());

    // Offline runs neither submit nor ask for version messages.
    assert!(mocks.evaluator.send_calls().is_empty());
    assert!(mocks.messager.loads().is_empty());
}

#[tokio::test]
async fn test_validation_warnings_reach_the_printer() {
    let validator = MockValidator {
        warnings: vec![kubegate::validation::FileWithWarning {
            path: "valid/path".to_string(),
            warning: "Schema source unreachable (timeout); skipped schema validation".to_string(),
        }],
        ..MockValidator::with_valid_file()
    };
    let mocks = MockSet {
        validator: Arc::new(validator),
        evaluator: Arc::new(MockEvaluator::offline()),
        ..Default::default()
    };
    run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();

    let warning = mocks
        .printer
        .warnings()
        .into_iter()
        .find(|w| w.title == "valid/path")
        .expect("warning for valid/path");
    assert_eq!(
        warning.validation_warning.as_deref(),
        Some("Schema source unreachable (timeout); skipped schema validation")
    );
    assert_eq!(mocks.evaluator.evaluate_calls().len(), 1);
}

#[tokio::test]
async fn test_non_network_prerun_failure_is_fatal() {
    let evaluator = MockEvaluator {
        prerun: Err(RemoteError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        }),
        ..Default::default()
    };
    let mocks = MockSet {
        evaluator: Arc::new(evaluator),
        ..Default::default()
    };
    let err = run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap_err();

    assert!(matches!(err, KubegateError::Remote(RemoteError::Status { status: 401, .. })));
    assert!(mocks.validator.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_policy_is_fatal_without_summary() {
    let mocks = MockSet::default();
    let err = run_test_command(&mocks.context(), &flags(|f| f.policy = "Nope".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KubegateError::Policy(kubegate::policy::PolicyError::PolicyNotFound { .. })
    ));
    assert!(err.to_string().contains("Nope"));
    assert!(mocks.evaluator.evaluate_calls().is_empty());
    assert!(!mocks.printer.printed_summary());
}

#[tokio::test]
async fn test_send_failure_does_not_change_outcome() {
    let evaluator = MockEvaluator {
        send: Err(RemoteError::Status {
            status: 500,
            body: "boom".to_string(),
        }),
        ..Default::default()
    };
    let mocks = MockSet {
        evaluator: Arc::new(evaluator),
        ..Default::default()
    };
    let outcome = run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();

    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(mocks.evaluator.send_calls().len(), 1);
    assert!(mocks
        .printer
        .messages()
        .iter()
        .any(|(text, color)| *color == Color::Yellow
            && text.starts_with("Failed to send evaluation results")));
    assert!(mocks.printer.printed_summary());
}

#[tokio::test]
async fn test_no_record_and_offline_skip_submission() {
    let mocks = MockSet::default();
    run_test_command(&mocks.context(), &flags(|f| f.no_record = true))
        .await
        .unwrap();
    assert_eq!(mocks.evaluator.prerun_calls().len(), 1);
    assert!(mocks.evaluator.send_calls().is_empty());

    let mocks = MockSet::default();
    run_test_command(&mocks.context(), &flags(|f| f.offline = true))
        .await
        .unwrap();
    assert!(mocks.evaluator.prerun_calls().is_empty());
    assert!(mocks.evaluator.send_calls().is_empty());
    assert_eq!(mocks.evaluator.evaluate_calls().len(), 1);
}

#[tokio::test]
async fn test_submission_carries_token_and_results() {
    let mocks = MockSet::default();
    run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();

    let sent = mocks.evaluator.send_calls();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, MOCK_TOKEN);
    assert_eq!(sent[0].policy_name, "Default");
    assert_eq!(sent[0].k8s_version, "1.27.0");
    assert_eq!(sent[0].summary.total_passed_count, 1);
    assert!(sent[0]
        .results
        .file_name_rule_mapper
        .contains_key("valid/path"));
}

#[tokio::test]
async fn test_schema_version_precedence() {
    let k8s_version = |mocks: &MockSet| {
        mocks
            .validator
            .calls()
            .into_iter()
            .find_map(|call| match call {
                ValidatorCall::InitClient(settings) => Some(settings.k8s_version),
                _ => None,
            })
            .unwrap()
    };

    // Prerun default when nothing else is set
    let mocks = MockSet::default();
    run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();
    assert_eq!(k8s_version(&mocks), "1.27.0");

    // Local configuration beats the prerun default
    let mut config = MockConfigStore::default();
    config.config.schema_version = Some("1.26.4".to_string());
    let mocks = MockSet {
        config: Arc::new(config),
        ..Default::default()
    };
    run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();
    assert_eq!(k8s_version(&mocks), "1.26.4");

    // The flag beats both
    let mut config = MockConfigStore::default();
    config.config.schema_version = Some("1.26.4".to_string());
    let mocks = MockSet {
        config: Arc::new(config),
        ..Default::default()
    };
    run_test_command(&mocks.context(), &flags(|f| f.schema_version = "1.29.1".to_string()))
        .await
        .unwrap();
    assert_eq!(k8s_version(&mocks), "1.29.1");
}

#[tokio::test]
async fn test_version_message_is_printed_last() {
    let mocks = MockSet {
        messager: Arc::new(MockMessager {
            message: Some(VersionMessage {
                cli_version: "0.1.0".to_string(),
                message_text: "A new version is available".to_string(),
                message_color: Some("red".to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();

    match mocks.printer.calls().last() {
        Some(PrinterCall::Message(text, color)) => {
            assert_eq!(text, "A new version is available");
            assert_eq!(*color, Color::Red);
        }
        other => panic!("expected version message last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_policy_failure_outcome() {
    let validator = MockValidator {
        valid: vec![kubegate::extractor::FileConfigurations::new(
            "single/replica.yaml",
            vec![serde_json::json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": "web" },
                "spec": { "replicas": 1 }
            })],
        )],
        ..Default::default()
    };
    let mocks = MockSet {
        validator: Arc::new(validator),
        ..Default::default()
    };
    let outcome = run_test_command(&mocks.context(), &flags(|_| {})).await.unwrap();

    assert_eq!(outcome, RunOutcome::PolicyFailure);
    assert_eq!(outcome.exit_code(), 1);
    let warning = mocks
        .printer
        .warnings()
        .into_iter()
        .find(|w| w.title == "single/replica.yaml")
        .unwrap();
    assert_eq!(warning.failed_rules.len(), 1);
}
