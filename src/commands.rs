//! CLI command definitions
//!
//! Defines the clap commands for the test notifier.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the test suite and email the result (default)
    Run(RunArgs),

    /// Classify captured test output without running or mailing anything
    Classify {
        /// File holding the test runner's error stream (default: stdin)
        file: Option<PathBuf>,

        /// Subject prefix to report with
        #[arg(long)]
        suite_name: Option<String>,
    },
}

#[derive(Args, Default)]
pub struct RunArgs {
    /// Print the email to stdout instead of handing it to the relay
    #[arg(long)]
    pub dry_run: bool,

    /// Interpreter used to launch the test entry point (default: python)
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,
}
