//! Account models for the sender and receiver pools
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::imap::rescue::RescueStrategy;
use crate::imap::ImapEndpoint;
use crate::secret_codec::SecretCodec;
use crate::smtp::SmtpIdentity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Gmail,
    Outlook,
    Yahoo,
    Aol,
    Icloud,
    Zoho,
    #[default]
    Custom,
}

impl EmailProvider {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gmail" | "google" | "gsuite" => Self::Gmail,
            "outlook" | "hotmail" | "office365" | "microsoft" => Self::Outlook,
            "yahoo" => Self::Yahoo,
            "aol" => Self::Aol,
            "icloud" => Self::Icloud,
            "zoho" => Self::Zoho,
            _ => Self::Custom,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::Aol => "aol",
            Self::Icloud => "icloud",
            Self::Zoho => "zoho",
            Self::Custom => "custom",
        }
    }

    /// Yahoo-family and Microsoft mailboxes only honour junk feedback when the
    /// tags land on the message after it reaches INBOX.
    pub fn rescue_strategy(&self) -> RescueStrategy {
        match self {
            Self::Yahoo | Self::Aol | Self::Outlook => RescueStrategy::MoveThenTag,
            Self::Gmail | Self::Icloud | Self::Zoho | Self::Custom => RescueStrategy::DirectMove,
        }
    }
}

/// SMTP-only identity that originates warmup mail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SenderAccount {
    pub id: i64,
    pub host: String,
    pub port: i64,
    pub secure: bool,
    pub auth_user: String,
    #[serde(skip_serializing)]
    pub encrypted_secret: String,
    pub display_name: Option<String>,
    pub display_address: String,
    pub daily_limit: i64,
    pub sent_today: i64,
    pub sent_today_date: Option<NaiveDate>,
    pub enabled: bool,
}

impl SenderAccount {
    /// `"Name <addr>"` when a display name is configured, otherwise the bare address.
    pub fn mailbox(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                format!("{} <{}>", name.replace(['<', '>', '"'], ""), self.display_address)
            }
            _ => self.display_address.clone(),
        }
    }

    pub fn smtp_identity(&self, codec: &SecretCodec) -> SmtpIdentity {
        SmtpIdentity {
            host: self.host.clone(),
            port: clamp_port(self.port, 587),
            secure: self.secure,
            username: self.auth_user.clone(),
            password: codec.decrypt(&self.encrypted_secret),
        }
    }
}

/// IMAP+SMTP identity that receives warmup mail and answers it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReceiverAccount {
    pub id: i64,
    pub imap_host: String,
    pub imap_port: i64,
    pub imap_secure: bool,
    pub imap_user: String,
    #[serde(skip_serializing)]
    pub encrypted_imap_secret: String,
    pub smtp_host: String,
    pub smtp_port: i64,
    pub smtp_secure: bool,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub encrypted_smtp_secret: String,
    pub address: String,
    pub provider_class: String,
    pub enabled: bool,
    pub last_verified_at: Option<i64>,
}

impl ReceiverAccount {
    pub fn provider(&self) -> EmailProvider {
        EmailProvider::from_str(&self.provider_class)
    }

    pub fn imap_endpoint(&self, codec: &SecretCodec) -> ImapEndpoint {
        ImapEndpoint {
            host: self.imap_host.clone(),
            port: clamp_port(self.imap_port, 993),
            secure: self.imap_secure,
            username: self.imap_user.clone(),
            password: codec.decrypt(&self.encrypted_imap_secret),
        }
    }

    /// `None` when the account cannot send replies: no host, no user, or a
    /// secret that decoded to nothing.
    pub fn smtp_identity(&self, codec: &SecretCodec) -> Option<SmtpIdentity> {
        if self.smtp_host.trim().is_empty() || self.smtp_user.trim().is_empty() {
            return None;
        }
        let password = codec.decrypt(&self.encrypted_smtp_secret);
        if password.is_empty() {
            return None;
        }
        Some(SmtpIdentity {
            host: self.smtp_host.clone(),
            port: clamp_port(self.smtp_port, 587),
            secure: self.smtp_secure,
            username: self.smtp_user.clone(),
            password,
        })
    }
}

fn clamp_port(port: i64, default: u16) -> u16 {
    u16::try_from(port).ok().filter(|p| *p != 0).unwrap_or(default)
}
