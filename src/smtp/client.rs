//! SMTP client for handing a message to the local mail relay
//!
//! One connection carries exactly one mail transaction. `QUIT` is sent on
//! every path once the connection is open, including after a failed
//! transaction.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::common::config::{RunConfiguration, Settings, RELAY_STAGE};
use crate::common::{Error, Result};
use crate::mail::{envelope_address, EmailMessage, Transport};

use super::codec::{self, Reply};

/// A connected SMTP session
pub struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl SmtpClient {
    /// Open a TCP connection to the relay
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| Error::RelayUnreachable {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        tracing::debug!("Connected to mail relay {}:{}", host, port);

        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: BufWriter::new(write),
        })
    }

    /// Send a command and require one of the `accept` codes
    async fn command(&mut self, command: &str, stage: &str, accept: &[u16]) -> Result<Reply> {
        tracing::trace!("SMTP >>> {}", command);
        codec::write_command(&mut self.writer, command)
            .await
            .map_err(|e| lost_connection(e, stage))?;
        self.expect(stage, accept).await
    }

    async fn expect(&mut self, stage: &str, accept: &[u16]) -> Result<Reply> {
        let reply = codec::read_reply(&mut self.reader, stage)
            .await
            .map_err(|e| lost_connection(e, stage))?;
        tracing::trace!("SMTP <<< {} {}", reply.code, reply.message());
        if accept.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(Error::relay_rejected(stage, reply.code, &reply.message()))
        }
    }

    /// Run greeting, EHLO and one full mail transaction
    ///
    /// Envelope commands carry only the bare address of `from` and each
    /// entry of `to`, so display names are allowed. Refused recipients are skipped with a warning; the transaction fails
    /// only when every recipient is refused.
    pub async fn send_mail(
        &mut self,
        helo_name: &str,
        from: &str,
        to: &[String],
        payload: &str,
    ) -> Result<()> {
        self.expect("greeting", &[220]).await?;

        let ehlo = format!("EHLO {}", helo_name);
        if let Err(e) = self.command(&ehlo, "EHLO", &[250]).await {
            match e {
                Error::RelayRejected { code, .. } if (500..600).contains(&code) => {
                    tracing::debug!("EHLO refused with {}, falling back to HELO", code);
                    self.command(&format!("HELO {}", helo_name), "HELO", &[250])
                        .await?;
                }
                other => return Err(other),
            }
        }

        let sender = envelope_address(from);
        self.command(&format!("MAIL FROM:<{}>", sender), "MAIL FROM", &[250])
            .await?;

        let mut accepted = 0;
        let mut last_refusal = None;
        for address in to {
            match self
                .command(
                    &format!("RCPT TO:<{}>", envelope_address(address)),
                    "RCPT TO",
                    &[250, 251],
                )
                .await
            {
                Ok(_) => accepted += 1,
                Err(Error::RelayRejected { code, message, .. }) => {
                    tracing::warn!("Relay refused recipient {}: {} {}", address, code, message);
                    last_refusal = Some((code, message));
                }
                Err(e) => return Err(e),
            }
        }
        if accepted == 0 {
            let (code, message) = last_refusal.unwrap_or((0, "no recipients".to_string()));
            return Err(Error::relay_rejected("RCPT TO", code, &message));
        }

        self.command("DATA", "DATA", &[354]).await?;
        codec::write_data(&mut self.writer, payload)
            .await
            .map_err(|e| lost_connection(e, "DATA"))?;
        self.expect("end of DATA", &[250]).await?;

        Ok(())
    }

    /// Say goodbye and drop the connection
    pub async fn quit(mut self) -> Result<()> {
        self.command("QUIT", "QUIT", &[221]).await.map(|_| ())
    }
}

/// Socket errors mid-session mean the relay went away
fn lost_connection(error: Error, stage: &str) -> Error {
    match error {
        Error::Io(e) => {
            tracing::debug!("Relay connection lost during {}: {}", stage, e);
            Error::RelayClosed(stage.to_string())
        }
        other => other,
    }
}

/// Delivers messages through an SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    helo_name: String,
    timeout: Option<Duration>,
}

impl SmtpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            helo_name: "localhost".to_string(),
            timeout: None,
        }
    }

    /// Build from the run configuration and settings file
    pub fn from_config(config: &RunConfiguration, settings: &Settings) -> Self {
        Self::new(settings.mail.relay_host.clone(), config.port())
            .with_helo_name(settings.mail.helo_name.clone())
            .with_timeout(settings.timeouts.relay_secs.map(Duration::from_secs))
    }

    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    /// Limit the whole exchange, from connect to QUIT
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn deliver(&self, message: &EmailMessage) -> Result<()> {
        let mut client = SmtpClient::connect(&self.host, self.port).await?;

        let sent = client
            .send_mail(&self.helo_name, &message.from, &message.to, &message.render())
            .await;
        let closed = client.quit().await;

        match (sent, closed) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => {
                // The relay already accepted the message at end of DATA
                tracing::warn!("Message accepted but QUIT failed: {}", e);
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        tracing::info!(
            relay = %format!("{}:{}", self.host, self.port),
            recipients = message.to.len(),
            "Sending \"{}\"",
            message.subject
        );

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.deliver(message))
                .await
                .map_err(|_| Error::timeout(RELAY_STAGE, limit.as_secs()))?,
            None => self.deliver(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// What the mock relay saw
    #[derive(Debug, Default)]
    struct Transcript {
        commands: Vec<String>,
        data: Option<String>,
    }

    /// Serve one connection; `respond` maps a command line to a reply line
    async fn mock_relay<F>(respond: F) -> (u16, JoinHandle<Transcript>)
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = tokio::io::BufReader::new(read);
            let mut transcript = Transcript::default();

            write.write_all(b"220 mock relay ready\r\n").await.unwrap();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                transcript.commands.push(line.clone());

                let reply = respond(&line);
                write.write_all(reply.as_bytes()).await.unwrap();

                if line == "DATA" && reply.starts_with("354") {
                    let mut data = String::new();
                    loop {
                        let mut chunk = String::new();
                        reader.read_line(&mut chunk).await.unwrap();
                        if chunk == ".\r\n" {
                            break;
                        }
                        data.push_str(&chunk);
                    }
                    transcript.data = Some(data);
                    write.write_all(b"250 queued\r\n").await.unwrap();
                }
                if line == "QUIT" {
                    break;
                }
            }
            transcript
        });

        (port, handle)
    }

    fn happy(line: &str) -> String {
        match line {
            l if l.starts_with("EHLO") => "250-mock\r\n250 8BITMIME\r\n".to_string(),
            "DATA" => "354 go ahead\r\n".to_string(),
            "QUIT" => "221 bye\r\n".to_string(),
            _ => "250 ok\r\n".to_string(),
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: vec!["a@x.com".into(), "b@y.com".into()],
            from: "hooks@x.com".into(),
            subject: "suite passed".into(),
            body: "tests output...\n\n.leading dot".into(),
        }
    }

    #[tokio::test]
    async fn test_successful_delivery() {
        let (port, relay) = mock_relay(happy).await;

        SmtpTransport::new("127.0.0.1", port)
            .send(&message())
            .await
            .unwrap();

        let transcript = relay.await.unwrap();
        assert_eq!(
            transcript.commands,
            vec![
                "EHLO localhost",
                "MAIL FROM:<hooks@x.com>",
                "RCPT TO:<a@x.com>",
                "RCPT TO:<b@y.com>",
                "DATA",
                "QUIT",
            ]
        );
        let data = transcript.data.unwrap();
        assert!(data.contains("To: a@x.com, b@y.com\r\n"));
        assert!(data.contains("From: hooks@x.com\r\n"));
    }

    #[tokio::test]
    async fn test_display_names_stay_out_of_envelope() {
        let (port, relay) = mock_relay(|line| {
            // Nested brackets are a syntax error on real relays
            if line.matches('<').count() > 1 {
                "501 syntax error in parameters\r\n".to_string()
            } else {
                happy(line)
            }
        })
        .await;

        let mut message = message();
        message.from = "Hooks <hooks@x.com>".into();
        message.to = vec!["Alice <a@x.com>".into(), "b@y.com".into()];

        SmtpTransport::new("127.0.0.1", port)
            .send(&message)
            .await
            .unwrap();

        let transcript = relay.await.unwrap();
        assert_eq!(
            transcript.commands,
            vec![
                "EHLO localhost",
                "MAIL FROM:<hooks@x.com>",
                "RCPT TO:<a@x.com>",
                "RCPT TO:<b@y.com>",
                "DATA",
                "QUIT",
            ]
        );
        let data = transcript.data.unwrap();
        assert!(data.contains("From: Hooks <hooks@x.com>\r\n"));
        assert!(data.contains("To: Alice <a@x.com>, b@y.com\r\n"));
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let (port, relay) = mock_relay(|line| {
            if line.starts_with("EHLO") {
                "502 command not implemented\r\n".to_string()
            } else {
                happy(line)
            }
        })
        .await;

        SmtpTransport::new("127.0.0.1", port)
            .with_helo_name("ci.example.org")
            .send(&message())
            .await
            .unwrap();

        let transcript = relay.await.unwrap();
        assert_eq!(transcript.commands[0], "EHLO ci.example.org");
        assert_eq!(transcript.commands[1], "HELO ci.example.org");
    }

    #[tokio::test]
    async fn test_rejected_sender_still_quits() {
        let (port, relay) = mock_relay(|line| {
            if line.starts_with("MAIL FROM") {
                "553 sender not allowed\r\n".to_string()
            } else {
                happy(line)
            }
        })
        .await;

        let err = SmtpTransport::new("127.0.0.1", port)
            .send(&message())
            .await
            .unwrap_err();
        assert!(err.is_send_failure());
        match err {
            Error::RelayRejected { command, code, .. } => {
                assert_eq!(command, "MAIL FROM");
                assert_eq!(code, 553);
            }
            other => panic!("Expected RelayRejected, got {:?}", other),
        }

        let transcript = relay.await.unwrap();
        assert_eq!(transcript.commands.last().unwrap(), "QUIT");
        assert!(transcript.data.is_none());
    }

    #[tokio::test]
    async fn test_partial_recipient_refusal_is_tolerated() {
        let (port, relay) = mock_relay(|line| {
            if line == "RCPT TO:<a@x.com>" {
                "550 no such user\r\n".to_string()
            } else {
                happy(line)
            }
        })
        .await;

        SmtpTransport::new("127.0.0.1", port)
            .send(&message())
            .await
            .unwrap();
        assert!(relay.await.unwrap().data.is_some());
    }

    #[tokio::test]
    async fn test_all_recipients_refused() {
        let (port, relay) = mock_relay(|line| {
            if line.starts_with("RCPT TO") {
                "550 no such user\r\n".to_string()
            } else {
                happy(line)
            }
        })
        .await;

        let err = SmtpTransport::new("127.0.0.1", port)
            .send(&message())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RelayRejected { code: 550, .. }));

        let transcript = relay.await.unwrap();
        assert!(!transcript.commands.contains(&"DATA".to_string()));
        assert_eq!(transcript.commands.last().unwrap(), "QUIT");
    }

    #[tokio::test]
    async fn test_unreachable_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SmtpTransport::new("127.0.0.1", port)
            .send(&message())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RelayUnreachable { .. }));
        assert!(err.is_send_failure());
    }

    #[tokio::test]
    async fn test_relay_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept but never greet
        let _silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let err = SmtpTransport::new("127.0.0.1", port)
            .with_timeout(Some(Duration::from_millis(200)))
            .send(&message())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_send_failure());
    }
}
