//! One run: load configuration, invoke the suite, classify, notify
//!
//! Each step starts only after the previous one succeeded, so a missing
//! variable means no child process and no email.

use crate::common::config::{RunConfiguration, Settings};
use crate::common::Result;
use crate::mail::{EmailMessage, Transport};
use crate::report::{ClassifiedReport, Verdict};
use crate::runner::Invoker;

/// Perform a single run
///
/// `transport_for` is called only once configuration has loaded and the
/// suite has been classified. The returned verdict is informational; a
/// PROBLEM verdict is still a successful run once the email is out.
pub async fn run<F, T>(
    lookup: F,
    settings: &Settings,
    invoker: &dyn Invoker,
    transport_for: T,
) -> Result<Verdict>
where
    F: Fn(&str) -> Option<String>,
    T: FnOnce(&RunConfiguration) -> Box<dyn Transport>,
{
    let config = RunConfiguration::load(lookup)?;
    tracing::debug!(?config, "Loaded run configuration");

    let execution = invoker.invoke(&config.test_entrypoint_path).await?;
    if let Some(code) = execution.exit_status.filter(|c| *c != 0) {
        tracing::debug!("Test command exited with {}; verdict comes from stderr", code);
    }

    let report = ClassifiedReport::from_stderr(&settings.mail.suite_name, &execution.stderr);
    tracing::info!(verdict = %report.verdict, "Classified test output");

    let message = EmailMessage::new(&report, &config);
    let transport = transport_for(&config);
    transport.send(&message).await?;

    tracing::info!("Notification sent to {}", message.to_header());
    Ok(report.verdict)
}
