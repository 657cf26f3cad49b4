//! Test notifier - re-runs a test suite after a repository update and
//! emails the verdict
//!
//! A run loads its configuration from the environment, launches the suite
//! once, decides pass/fail from the runner's error stream and hands a
//! single plain-text email to the local mail relay.

pub mod cli;
pub mod commands;
pub mod common;
pub mod mail;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod smtp;

// Re-export commonly used types for tests
pub use common::config::RunConfiguration;
pub use common::{Error, Result};
pub use report::{classify, Verdict};
