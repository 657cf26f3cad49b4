//! SMTP wire codec
//!
//! Replies are one or more lines of the form:
//! ```text
//! 250-first line\r\n
//! 250-more\r\n
//! 250 last line\r\n
//! ```
//! A hyphen after the code marks a continuation, a space marks the end.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Longest reply line we accept, well above the RFC 5321 limit of 512
const MAX_LINE_LEN: usize = 8 * 1024;

/// A complete server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Reply text with continuation lines joined by spaces
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }
}

/// Read one (possibly multi-line) reply
///
/// `stage` names the command being answered, for error messages.
pub async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R, stage: &str) -> Result<Reply> {
    let mut lines = Vec::new();

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::RelayClosed(stage.to_string())
            } else {
                Error::Io(e)
            }
        })?;

        if bytes_read == 0 {
            return Err(Error::RelayClosed(stage.to_string()));
        }
        if line.len() > MAX_LINE_LEN {
            return Err(Error::relay_rejected(stage, 0, "reply line too long"));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        let (code, separator, text) = split_reply_line(line)
            .ok_or_else(|| Error::relay_rejected(stage, 0, &format!("malformed reply: {}", line)))?;

        lines.push(text.to_string());

        if separator != '-' {
            return Ok(Reply { code, lines });
        }
    }
}

fn split_reply_line(line: &str) -> Option<(u16, char, &str)> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = digits.parse().ok()?;

    let rest = &line[3..];
    match rest.chars().next() {
        None => Some((code, ' ', "")),
        Some(sep @ (' ' | '-')) => Some((code, sep, &rest[1..])),
        Some(_) => None,
    }
}

/// Write one command line, appending CRLF
pub async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &str) -> Result<()> {
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Write a DATA payload with dot-stuffing and the terminating `.` line
pub async fn write_data<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> Result<()> {
    writer.write_all(dot_stuff(payload).as_bytes()).await?;
    writer.write_all(b".\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Normalize line endings to CRLF and double any leading dot
fn dot_stuff(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 16);
    for line in payload.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}
