//! Minimal SMTP client
//!
//! Only what handing a single message to a local relay needs: greeting,
//! EHLO/HELO, one transaction and QUIT. No TLS, no AUTH.

mod client;
pub mod codec;

pub use client::{SmtpClient, SmtpTransport};
