//! CLI command handling
//!
//! Wires command-line options, the settings file and the environment into
//! a pipeline run, or classifies saved output.

use std::path::Path;

use colored::Colorize;
use tokio::io::AsyncReadExt;

use crate::commands::{Commands, RunArgs};
use crate::common::config::{RunConfiguration, Settings};
use crate::common::{Error, Result};
use crate::mail::{StdoutTransport, Transport};
use crate::pipeline;
use crate::report::{ClassifiedReport, Verdict};
use crate::runner::ProcessInvoker;
use crate::smtp::SmtpTransport;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Classify { file, suite_name } => classify(file.as_deref(), suite_name).await,
    }
}

/// Load settings, honoring an explicit `--config` path
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(interpreter) = args.interpreter {
        settings.runner.interpreter = interpreter;
    }

    let invoker = ProcessInvoker::from_settings(&settings);
    let dry_run = args.dry_run;

    let verdict = pipeline::run(
        |name| std::env::var(name).ok(),
        &settings,
        &invoker,
        |config: &RunConfiguration| -> Box<dyn Transport> {
            if dry_run {
                Box::new(StdoutTransport)
            } else {
                Box::new(SmtpTransport::from_config(config, &settings))
            }
        },
    )
    .await?;

    tracing::info!("Run complete: {}", verdict);
    Ok(())
}

async fn classify(file: Option<&Path>, suite_name: Option<String>) -> Result<()> {
    // Saved output may hold invalid UTF-8; decode it like the runner does
    let bytes = match file {
        Some(path) => tokio::fs::read(path).await.map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?,
        None => {
            let mut bytes = Vec::new();
            tokio::io::stdin().read_to_end(&mut bytes).await?;
            bytes
        }
    };
    let text = String::from_utf8_lossy(&bytes);

    let suite_name = match suite_name {
        Some(name) => name,
        None => Settings::load()?.mail.suite_name,
    };
    let report = ClassifiedReport::from_stderr(&suite_name, &text);

    let verdict = match report.verdict {
        Verdict::Passed => report.verdict.to_string().green().bold(),
        Verdict::Problem => report.verdict.to_string().red().bold(),
    };
    println!("{} {}", "Verdict:".blue().bold(), verdict);
    println!("{} {}", "Subject:".blue().bold(), report.subject);

    Ok(())
}
