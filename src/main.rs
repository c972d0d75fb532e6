//! kubegate CLI entry point
//!
//! Kubernetes manifest schema validation and policy checks for CI gating.

use clap::Parser;
use kubegate::cli::args::{Cli, Command};
use kubegate::cli::output::Theme;
use kubegate::engine::result::ERROR_EXIT_CODE;
use kubegate::version::get_build_info;
use kubegate::{run_test_command, TestCommandContext};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so json/yaml/xml output on stdout stays parseable
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Version => {
            println!("{}", get_build_info());
            ExitCode::SUCCESS
        }
        Command::Test(flags) => {
            let ctx = match TestCommandContext::production() {
                Ok(ctx) => ctx,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::from(ERROR_EXIT_CODE);
                }
            };
            ctx.printer.set_theme(if cli.no_color {
                Theme::monochrome()
            } else {
                Theme::colored()
            });

            match run_test_command(&ctx, &flags).await {
                Ok(outcome) => ExitCode::from(outcome.exit_code()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if e.is_usage_error() {
                        eprintln!("Run 'kubegate test --help' for usage information.");
                    }
                    ExitCode::from(ERROR_EXIT_CODE)
                }
            }
        }
    }
}
