//! Outbound HTML email.

use std::time::Duration;

use async_trait::async_trait;
use cadence_watch::render::escape_html;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::{CadenceError, Result};

/// Attempts per message for transient SMTP failures.
const SEND_ATTEMPTS: u32 = 4;

/// A rendered message ready to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundEmail {
    pub subject: String,
    pub html: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl OutboundEmail {
    /// Checks the subject, the body and that at least one recipient is set.
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(CadenceError::Email("missing subject".into()));
        }
        if self.html.trim().is_empty() {
            return Err(CadenceError::Email("missing HTML body".into()));
        }
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(CadenceError::Email("no recipients (to/cc/bcc)".into()));
        }
        Ok(())
    }
}

/// Sends HTML email and returns the message id.
#[async_trait]
pub trait Emailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String>;

    /// Address used when a run has no recipients of its own.
    fn sender_address(&self) -> Option<String> {
        None
    }
}

/// SMTP delivery through `lettre`.
pub struct SmtpEmailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailer {
    /// Build from config, with credentials from `SMTP_USERNAME` and
    /// `SMTP_PASSWORD` when both are set.
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let credentials = match (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            (Ok(user), Ok(pass)) => Some(Credentials::new(user, pass)),
            _ => None,
        };
        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(config: &SmtpConfig, credentials: Option<Credentials>) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                CadenceError::Config(format!("smtp.from '{}': {e}", config.from))
            })?;

        // 465 is implicit TLS; everything else upgrades with STARTTLS when enabled.
        let mut builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| CadenceError::Config(e.to_string()))?
        } else if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| CadenceError::Config(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let Some(credentials) = credentials {
            builder = builder.credentials(credentials);
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutboundEmail, message_id: &str) -> Result<Message> {
        let parse = |addr: &String| -> Result<Mailbox> {
            addr.parse()
                .map_err(|e: lettre::address::AddressError| CadenceError::Email(format!("'{addr}': {e}")))
        };

        let mut builder = Message::builder()
            .from(self.from.clone())
            .reply_to(self.from.clone())
            .subject(email.subject.clone())
            .message_id(Some(message_id.to_owned()));
        for addr in &email.to {
            builder = builder.to(parse(addr)?);
        }
        for addr in &email.cc {
            builder = builder.cc(parse(addr)?);
        }
        for addr in &email.bcc {
            builder = builder.bcc(parse(addr)?);
        }

        builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body("This message requires an HTML-capable client.".to_owned()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| CadenceError::Email(e.to_string()))
    }
}

#[async_trait]
impl Emailer for SmtpEmailer {
    async fn send(&self, email: &OutboundEmail) -> Result<String> {
        email.validate()?;
        let message_id = format!("<{}@cadence>", uuid::Uuid::new_v4().simple());
        let message = self.build_message(email, &message_id)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(message.clone()).await {
                Ok(_) => {
                    info!(
                        subject = %email.subject,
                        recipients = email.to.len() + email.cc.len() + email.bcc.len(),
                        message_id = %message_id,
                        "email delivered"
                    );
                    return Ok(message_id);
                }
                Err(e) if e.is_transient() && attempt < SEND_ATTEMPTS => {
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(error = %e, attempt, "transient SMTP failure, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(CadenceError::Email(e.to_string())),
            }
        }
    }

    fn sender_address(&self) -> Option<String> {
        Some(self.from.email.to_string())
    }
}

/// Wrap a module's HTML fragment in a minimal document titled `subject`.
/// Full documents are returned unchanged.
pub fn wrap_email_html(subject: &str, inner: &str) -> String {
    let head = inner.trim_start().get(..14).unwrap_or("").to_ascii_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") {
        return inner.to_owned();
    }
    format!(
        "<html>\n  <body style=\"font-family:ui-sans-serif,system-ui;line-height:1.5;margin:0;padding:8px\">\n    \
         <h2>{}</h2>\n    {inner}\n  </body>\n</html>",
        escape_html(subject)
    )
}
