use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use uuid::Uuid;

/// Authenticated SMTP submission identity (secret already decoded).
#[derive(Clone)]
pub struct SmtpIdentity {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (SMTPS). STARTTLS is required otherwise.
    pub secure: bool,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpIdentity")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the message being answered; sets In-Reply-To and References.
    pub in_reply_to: Option<String>,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Submit `email` and return the Message-ID it was sent with.
    async fn send(&self, identity: &SmtpIdentity, email: &OutgoingEmail) -> Result<String>;
}

/// Build a Message with explicit Message-Id. Returns (message, message_id)
pub fn build_email(email: &OutgoingEmail) -> Result<(Message, String)> {
    let from_mb: Mailbox = email
        .from
        .parse()
        .with_context(|| format!("invalid from address {:?}", email.from))?;
    let to_mb: Mailbox = email
        .to
        .parse()
        .with_context(|| format!("invalid to address {:?}", email.to))?;
    let domain = from_mb.email.domain().to_string();
    let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);

    let mut builder = Message::builder()
        .from(from_mb)
        .to(to_mb)
        .subject(email.subject.as_str())
        .message_id(Some(message_id.clone()))
        .header(ContentType::TEXT_PLAIN);
    if let Some(parent) = email.in_reply_to.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let parent = if parent.starts_with('<') {
            parent.to_string()
        } else {
            format!("<{parent}>")
        };
        builder = builder.in_reply_to(parent.clone()).references(parent);
    }

    let message = builder.body(email.body.clone())?;
    Ok((message, message_id))
}

/// lettre-backed sender; one short-lived connection per message.
#[derive(Debug, Clone)]
pub struct LettreMailer {
    pub timeout: Duration,
    pub hello_name: Option<String>,
}

impl LettreMailer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            hello_name: std::env::var("SMTP_HELLO_NAME").ok().filter(|v| !v.trim().is_empty()),
        }
    }

    fn transport(&self, identity: &SmtpIdentity) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        // Trim whitespace that may sneak in from copied app passwords
        let clean_password: String = identity.password.chars().filter(|c| !c.is_whitespace()).collect();
        let creds = Credentials::new(identity.username.clone(), clean_password);

        let tls_params = TlsParameters::new(identity.host.clone())?;
        let tls = if identity.secure || identity.port == 465 {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };

        let client_id = ClientId::Domain(
            self.hello_name
                .clone()
                .unwrap_or_else(|| identity.host.clone()),
        );

        Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&identity.host)
            .port(identity.port)
            .tls(tls)
            .hello_name(client_id)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl MailSender for LettreMailer {
    async fn send(&self, identity: &SmtpIdentity, email: &OutgoingEmail) -> Result<String> {
        let (message, message_id) = build_email(email)?;
        let mailer = self.transport(identity)?;
        // lettre's timeout is per command; bound the whole dialogue as well
        let overall = self.timeout * 3;
        match tokio::time::timeout(overall, mailer.send(message)).await {
            Ok(Ok(response)) => {
                tracing::debug!(host = %identity.host, code = %response.code(), %message_id, "SMTP accepted");
                Ok(message_id)
            }
            Ok(Err(e)) => {
                tracing::warn!(host = %identity.host, user = %identity.username, error = %e, "SMTP send failed");
                Err(e.into())
            }
            Err(_) => anyhow::bail!("SMTP send to {} timed out after {}s", identity.host, overall.as_secs()),
        }
    }
}
