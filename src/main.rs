//! Test notifier - runs a test suite from a post-merge hook and emails
//! the result.

use clap::Parser;
use notifier::common::logging;
use notifier::{cli, commands};
use commands::{Commands, RunArgs};

#[derive(Parser)]
#[command(name = "test-notifier", about = "Re-run a test suite and email the verdict")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_guard = logging::init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));

    if let Err(e) = cli::dispatch(command).await {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        if e.is_send_failure() {
            eprintln!("No notification was delivered; check the mail relay");
        }
        // exit() skips destructors; flush the file log first
        drop(log_guard);
        std::process::exit(1);
    }
}
