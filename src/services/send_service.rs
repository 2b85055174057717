use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::now_epoch;
use crate::models::warmup_log::{NewWarmupLog, WarmupStatus};
use crate::secret_codec::SecretCodec;
use crate::services::account_service;
use crate::services::content_service::Composer;
use crate::services::warmup_log_service;
use crate::smtp::{MailSender, OutgoingEmail};
use crate::token;

const TOKEN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// No eligible sender or no enabled receiver.
    Idle,
    Sent {
        token: String,
        sender_id: i64,
        receiver_id: i64,
        message_id: String,
    },
    Failed {
        token: String,
        sender_id: i64,
        receiver_id: i64,
        error: String,
    },
}

/// One synthetic message per tick from a random sender to a random receiver.
#[derive(Clone)]
pub struct SendService {
    pool: SqlitePool,
    codec: Arc<SecretCodec>,
    composer: Arc<Composer>,
    mailer: Arc<dyn MailSender>,
}

impl SendService {
    pub fn new(
        pool: SqlitePool,
        codec: Arc<SecretCodec>,
        composer: Arc<Composer>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            pool,
            codec,
            composer,
            mailer,
        }
    }

    pub async fn run_tick(&self) -> Result<SendOutcome> {
        self.run_tick_on(Utc::now().date_naive()).await
    }

    /// Tick with an explicit calendar day for the quota reset.
    pub async fn run_tick_on(&self, today: NaiveDate) -> Result<SendOutcome> {
        account_service::reset_daily_counters(&self.pool, today).await?;

        let Some((sender, receiver)) = account_service::pick_pair(&self.pool).await? else {
            debug!("no eligible sender/receiver pair, send tick idle");
            return Ok(SendOutcome::Idle);
        };

        let token = self.fresh_token().await?;
        let subject = self
            .composer
            .subject(&sender.display_address, &receiver.address)
            .await;
        let body = self
            .composer
            .body(&sender.display_address, &receiver.address)
            .await;
        let email = OutgoingEmail {
            from: sender.mailbox(),
            to: receiver.address.clone(),
            subject: subject.clone(),
            body: token::append_reference(&body, &token),
            in_reply_to: None,
        };
        let identity = sender.smtp_identity(&self.codec);

        let mut log = NewWarmupLog {
            token: token.clone(),
            subject,
            sender_id: Some(sender.id),
            receiver_id: receiver.id,
            provider_message_id: None,
            status: WarmupStatus::Sent,
            mailbox: None,
            spam_folder: false,
            error: None,
            sent_at: now_epoch(),
            received_at: None,
        };

        match self.mailer.send(&identity, &email).await {
            Ok(message_id) => {
                log.provider_message_id = Some(message_id.clone());
                let logged = warmup_log_service::insert(&self.pool, &log).await;
                // the message is out either way, so it counts against the quota
                account_service::increment_sent(&self.pool, sender.id, today).await?;
                logged.context("record sent warmup message")?;
                info!(
                    sender = %sender.display_address,
                    receiver = %receiver.address,
                    %token,
                    %message_id,
                    "warmup message sent"
                );
                Ok(SendOutcome::Sent {
                    token,
                    sender_id: sender.id,
                    receiver_id: receiver.id,
                    message_id,
                })
            }
            Err(e) => {
                let error = format!("{e:#}");
                log.status = WarmupStatus::Failed;
                log.error = Some(error.clone());
                warmup_log_service::insert(&self.pool, &log)
                    .await
                    .context("record failed warmup message")?;
                warn!(
                    sender = %sender.display_address,
                    receiver = %receiver.address,
                    %token,
                    %error,
                    "warmup send failed"
                );
                Ok(SendOutcome::Failed {
                    token,
                    sender_id: sender.id,
                    receiver_id: receiver.id,
                    error,
                })
            }
        }
    }

    async fn fresh_token(&self) -> Result<String> {
        for _ in 0..TOKEN_ATTEMPTS {
            let candidate = token::generate();
            if !warmup_log_service::token_exists(&self.pool, &candidate).await? {
                return Ok(candidate);
            }
            warn!(token = %candidate, "token collision, re-rolling");
        }
        bail!("could not generate an unused token after {TOKEN_ATTEMPTS} attempts")
    }
}
