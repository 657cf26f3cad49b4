//! Configuration handling
//!
//! Two layers:
//! 1. [`RunConfiguration`], read from the process environment. Every value is
//!    required and nothing is defaulted, so a hook never runs against the
//!    wrong target.
//! 2. [`Settings`], an optional TOML file with tuning knobs (interpreter,
//!    relay host, timeouts). A missing file means defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Path to the test-suite entry point
pub const ENV_TESTS_PATH: &str = "OCRA_TESTS__ALL_TESTS_PATH";
/// JSON array of recipient addresses
pub const ENV_MAIL_TO: &str = "OCRA_TESTS__MAIL_TO";
/// Sender address
pub const ENV_MAIL_FROM: &str = "OCRA_TESTS__MAIL_FROM";
/// JSON object like `{"smtp_port": 1025}` or `{"smtp_port": null}`
pub const ENV_SMTP_PORT: &str = "OCRA_TESTS__SMTP_PORT_RAW";

/// All required variables, in the order they are read
pub const REQUIRED_VARS: [&str; 4] = [ENV_TESTS_PATH, ENV_MAIL_TO, ENV_MAIL_FROM, ENV_SMTP_PORT];

/// Port used when the relay port is null, absent or 0
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Stage names used in timeout errors
pub const TEST_RUN_STAGE: &str = "Test run";
pub const RELAY_STAGE: &str = "Mail relay exchange";

/// Everything a single run needs, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    /// Test-suite entry point handed to the interpreter
    pub test_entrypoint_path: PathBuf,
    /// Recipient addresses, in the order given
    pub recipients: Vec<String>,
    /// Sender address
    pub sender: String,
    /// Relay port; `None` means the relay default
    pub relay_port: Option<u16>,
}

#[derive(Deserialize)]
struct SmtpPortSetting {
    #[serde(default)]
    smtp_port: Option<u16>,
}

impl RunConfiguration {
    /// Build the configuration from a variable lookup
    ///
    /// All four variables are checked for presence before any of them is
    /// parsed, so a missing variable is always reported as missing.
    pub fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let [tests_path, mail_to, mail_from, smtp_port] = REQUIRED_VARS.map(&lookup);

        let tests_path = tests_path.ok_or_else(|| missing(ENV_TESTS_PATH))?;
        let mail_to = mail_to.ok_or_else(|| missing(ENV_MAIL_TO))?;
        let mail_from = mail_from.ok_or_else(|| missing(ENV_MAIL_FROM))?;
        let smtp_port = smtp_port.ok_or_else(|| missing(ENV_SMTP_PORT))?;

        let recipients: Vec<String> = serde_json::from_str(&mail_to)
            .map_err(|e| Error::invalid_config(ENV_MAIL_TO, e))?;
        if recipients.is_empty() {
            return Err(Error::invalid_config(ENV_MAIL_TO, "recipient list is empty"));
        }
        for address in &recipients {
            check_address(ENV_MAIL_TO, address)?;
        }
        check_address(ENV_MAIL_FROM, &mail_from)?;

        let port: SmtpPortSetting = serde_json::from_str(&smtp_port)
            .map_err(|e| Error::invalid_config(ENV_SMTP_PORT, e))?;

        Ok(Self {
            test_entrypoint_path: PathBuf::from(tests_path),
            recipients,
            sender: mail_from,
            relay_port: port.smtp_port,
        })
    }

    /// Port to dial on the relay host; null, absent and 0 all mean 25
    pub fn port(&self) -> u16 {
        match self.relay_port {
            Some(0) | None => DEFAULT_SMTP_PORT,
            Some(port) => port,
        }
    }
}

/// Addresses end up in SMTP command lines and mail headers
fn check_address(name: &str, address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(Error::invalid_config(name, "empty address"));
    }
    if let Some(c) = address.chars().find(|c| c.is_control()) {
        return Err(Error::invalid_config(
            name,
            format!("control character {:?} in address {:?}", c, address),
        ));
    }
    Ok(())
}

fn missing(name: &str) -> Error {
    Error::MissingConfiguration(name.to_string())
}

/// Optional settings file
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Settings {
    /// Test runner settings
    #[serde(default)]
    pub runner: RunnerSettings,

    /// Mail settings
    #[serde(default)]
    pub mail: MailSettings,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// How the test entry point is launched
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerSettings {
    /// Interpreter the entry point is passed to
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
        }
    }
}

fn default_interpreter() -> String {
    "python".to_string()
}

/// Mail relay and subject settings
#[derive(Debug, Deserialize, Clone)]
pub struct MailSettings {
    /// Host running the mail relay
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    /// Name announced in EHLO/HELO
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Prefix of the subject line
    #[serde(default = "default_suite_name")]
    pub suite_name: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            helo_name: default_helo_name(),
            suite_name: default_suite_name(),
        }
    }
}

fn default_relay_host() -> String {
    "localhost".to_string()
}
fn default_helo_name() -> String {
    "localhost".to_string()
}
fn default_suite_name() -> String {
    "ocra interface-tests".to_string()
}

/// Opt-in timeouts in seconds; unset means wait indefinitely
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Timeouts {
    /// Limit on the child test process
    #[serde(default)]
    pub test_run_secs: Option<u64>,

    /// Limit on the whole relay exchange
    #[serde(default)]
    pub relay_secs: Option<u64>,
}

impl Settings {
    /// Load settings from the default settings file
    ///
    /// Returns default settings if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load settings from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse settings from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}
