//! Notification email
//!
//! Builds the single plain-text message a run sends and renders it as a
//! MIME payload. Delivery goes through the [`Transport`] trait so the run
//! can target the SMTP relay or just print the message.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::AsyncWriteExt;

use crate::common::config::RunConfiguration;
use crate::common::Result;
use crate::report::ClassifiedReport;

/// Base64 line width required by RFC 2045
const BASE64_LINE_WIDTH: usize = 76;

/// One outbound email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn new(report: &ClassifiedReport, config: &RunConfiguration) -> Self {
        Self {
            to: config.recipients.clone(),
            from: config.sender.clone(),
            subject: report.subject.clone(),
            body: report.body.clone(),
        }
    }

    /// Value of the `To` header: addresses joined with `, ` in order
    pub fn to_header(&self) -> String {
        self.to.join(", ")
    }

    /// Render the message as a MIME text payload with CRLF line endings
    pub fn render(&self) -> String {
        let mut out = String::new();
        push_header(&mut out, "Content-Type", "text/plain; charset=\"utf-8\"");
        push_header(&mut out, "MIME-Version", "1.0");
        push_header(&mut out, "Content-Transfer-Encoding", "base64");
        push_header(&mut out, "To", &self.to_header());
        push_header(&mut out, "From", &self.from);
        push_header(&mut out, "Subject", &encode_header_word(&self.subject));
        out.push_str("\r\n");

        let encoded = STANDARD.encode(self.body.as_bytes());
        for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
            // base64 output is pure ASCII
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            out.push_str("\r\n");
        }
        out
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// Bare addr-spec for the SMTP envelope
///
/// `Hooks <hooks@x.com>` yields `hooks@x.com`; a string without angle
/// brackets is used as is. Headers keep the full form.
pub fn envelope_address(address: &str) -> &str {
    match (address.rfind('<'), address.rfind('>')) {
        (Some(open), Some(close)) if open < close => address[open + 1..close].trim(),
        _ => address.trim(),
    }
}

/// RFC 2047 encoded-word using UTF-8 and base64
pub fn encode_header_word(text: &str) -> String {
    format!("=?utf-8?b?{}?=", STANDARD.encode(text.as_bytes()))
}

/// Delivers a message somewhere
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Prints the rendered message instead of sending it
#[derive(Debug, Default)]
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(message.render().as_bytes()).await?;
        stdout.flush().await?;
        tracing::info!("Dry run: message printed, relay not contacted");
        Ok(())
    }
}
