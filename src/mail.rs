//! SMTP delivery via `lettre`.
//!
//! Port 465 connects with implicit TLS; every other port upgrades the
//! connection with STARTTLS. Both paths authenticate.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::notify::OutgoingEmail;
use crate::traits::Mailer;

pub const SMTP_PORT_IMPLICIT_TLS: u16 = 465;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let builder = if config.port == SMTP_PORT_IMPLICIT_TLS {
            tracing::debug!("Using implicit TLS (port {})", config.port);
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            tracing::debug!("Using STARTTLS (port {})", config.port);
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout()))
            .build();

        Ok(Self { transport })
    }
}

/// Build the MIME message: plain text, UTF-8, To and Cc headers.
pub fn build_message(email: &OutgoingEmail) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for to in &email.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &email.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    builder
        .body(email.body.clone())
        .map_err(|e| NotifyError::Build(e.to_string()))
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| NotifyError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let message = build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        tracing::info!("Email sent successfully");
        Ok(())
    }
}
