//! SMTP delivery via lettre.
//!
//! Credentials and relay details are configuration-supplied; nothing in
//! here is hard-coded. Delivery is bounded by an explicit network
//! timeout so a slow relay surfaces as a failed notification, never as
//! a stalled attendance path.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::{MailTransport, NotifyError, OutboundEmail};

/// SMTP relay settings, usually loaded from the environment.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_addr: String,
    /// Network timeout for one delivery attempt.
    pub timeout_secs: u64,
}

impl SmtpConfig {
    /// True when credentials are present; without them the caller
    /// should fall back to [`NullTransport`].
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// STARTTLS relay transport.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = Mailbox::new(
            Some(config.from_name.clone()),
            config
                .from_addr
                .parse()
                .map_err(|e| NotifyError::Address(format!("{}: {e}", config.from_addr)))?,
        );
        let transport = SmtpTransport::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();
        Ok(Self { transport, from })
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, mail: &OutboundEmail) -> Result<(), NotifyError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {e}", mail.to)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(mail.html_body.clone())?;
        self.transport.send(&message)?;
        Ok(())
    }
}

/// Transport used when SMTP credentials are absent. Every attempt fails
/// (and is logged as failed by the dispatcher) instead of silently
/// disappearing.
pub struct NullTransport;

impl MailTransport for NullTransport {
    fn send(&self, mail: &OutboundEmail) -> Result<(), NotifyError> {
        tracing::warn!(recipient = %mail.to, "smtp not configured, mail not sent");
        Err(NotifyError::NotConfigured)
    }
}
