use serde::{Deserialize, Serialize};

/// Lifecycle of one synthetic message: `sent -> received -> replied`, with a
/// `failed` branch from `sent` or `received`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WarmupStatus {
    Sent,
    Received,
    Replied,
    Failed,
}

impl WarmupStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "received" => Some(Self::Received),
            "replied" => Some(Self::Replied),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Replied => "replied",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Replied | Self::Failed)
    }

    pub fn can_advance_to(&self, next: WarmupStatus) -> bool {
        matches!(
            (self, next),
            (Self::Sent, Self::Received)
                | (Self::Sent, Self::Failed)
                | (Self::Received, Self::Replied)
                | (Self::Received, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WarmupLog {
    pub id: i64,
    pub token: String,
    pub subject: String,
    pub sender_id: Option<i64>,
    pub receiver_id: i64,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub mailbox: Option<String>,
    pub spam_folder: bool,
    pub error: Option<String>,
    pub sent_at: i64,
    pub received_at: Option<i64>,
    pub reply_at: Option<i64>,
}

impl WarmupLog {
    /// Unknown values read back from storage are treated as failed.
    pub fn status(&self) -> WarmupStatus {
        WarmupStatus::from_str(&self.status).unwrap_or(WarmupStatus::Failed)
    }

    /// Unclaimed and still allowed to move to `replied`.
    pub fn awaiting_reply(&self) -> bool {
        self.reply_at.is_none() && self.status().can_advance_to(WarmupStatus::Replied)
    }
}

/// Row to insert for a fresh send attempt or an adopted message.
#[derive(Debug, Clone)]
pub struct NewWarmupLog {
    pub token: String,
    pub subject: String,
    pub sender_id: Option<i64>,
    pub receiver_id: i64,
    pub provider_message_id: Option<String>,
    pub status: WarmupStatus,
    pub mailbox: Option<String>,
    pub spam_folder: bool,
    pub error: Option<String>,
    pub sent_at: i64,
    pub received_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::WarmupStatus::*;

    #[test]
    fn transitions_only_move_forward() {
        assert!(Sent.can_advance_to(Received));
        assert!(Sent.can_advance_to(Failed));
        assert!(Received.can_advance_to(Replied));
        assert!(Received.can_advance_to(Failed));
        assert!(!Replied.can_advance_to(Sent));
        assert!(!Replied.can_advance_to(Failed));
        assert!(!Received.can_advance_to(Sent));
        assert!(!Failed.can_advance_to(Received));
        assert!(!Sent.can_advance_to(Replied));
    }

    #[test]
    fn terminal_states() {
        assert!(Replied.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Sent.is_terminal());
        assert!(!Received.is_terminal());
    }
}
