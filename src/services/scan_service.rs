use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::now_epoch;
use crate::imap::envelope::Envelope;
use crate::imap::folders::{scan_window, MailboxLocks, SCAN_WINDOW};
use crate::imap::rescue::{FolderLost, RescueStrategy, SEEN_FLAGGED};
use crate::imap::{with_timeout, FetchedMessage, ImapConnector, MailboxSession, INBOX};
use crate::models::account::ReceiverAccount;
use crate::models::warmup_log::{NewWarmupLog, WarmupLog, WarmupStatus};
use crate::secret_codec::SecretCodec;
use crate::services::account_service;
use crate::services::content_service::{reply_subject, Composer};
use crate::services::settings_service::RuntimeSettings;
use crate::services::warmup_log_service;
use crate::smtp::{MailSender, OutgoingEmail, SmtpIdentity};
use crate::token;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub spam_folders: Vec<String>,
    pub concurrency: usize,
    pub account_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            spam_folders: crate::config::DEFAULT_SPAM_FOLDERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            concurrency: 1,
            account_timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub folder: String,
    pub spam: bool,
    pub fetched: usize,
    pub matched: usize,
    pub adopted: usize,
    pub rescued: usize,
    pub replied: usize,
    pub reply_failed: usize,
}

impl FolderReport {
    fn new(folder: &str, spam: bool) -> Self {
        Self {
            folder: folder.to_string(),
            spam,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountReport {
    pub receiver_id: i64,
    pub address: String,
    pub folders: Vec<FolderReport>,
    /// `(folder, error)` for folders that failed mid-scan.
    pub folder_errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub accounts: Vec<AccountReport>,
    /// `(receiver_id, error)` for accounts whose scan aborted.
    pub failed_accounts: Vec<(i64, String)>,
}

impl ScanReport {
    fn total(&self, f: impl Fn(&FolderReport) -> usize) -> usize {
        self.accounts.iter().flat_map(|a| a.folders.iter()).map(f).sum()
    }

    pub fn matched(&self) -> usize {
        self.total(|f| f.matched)
    }

    pub fn rescued(&self) -> usize {
        self.total(|f| f.rescued)
    }

    pub fn replied(&self) -> usize {
        self.total(|f| f.replied)
    }
}

/// Per-account values fixed for the duration of one account scan.
struct AccountContext<'a> {
    receiver: &'a ReceiverAccount,
    strategy: RescueStrategy,
    reply_identity: Option<SmtpIdentity>,
    engage_all: bool,
    adopt_untracked: bool,
}

/// Walks every enabled receiver mailbox, correlates warmup tokens, rescues
/// spam placements and answers first receipts.
#[derive(Clone)]
pub struct ScanService {
    pool: SqlitePool,
    codec: Arc<SecretCodec>,
    composer: Arc<Composer>,
    mailer: Arc<dyn MailSender>,
    imap: Arc<dyn ImapConnector>,
    settings: Arc<RuntimeSettings>,
    options: ScanOptions,
    locks: MailboxLocks,
}

impl ScanService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        codec: Arc<SecretCodec>,
        composer: Arc<Composer>,
        mailer: Arc<dyn MailSender>,
        imap: Arc<dyn ImapConnector>,
        settings: Arc<RuntimeSettings>,
        options: ScanOptions,
        locks: MailboxLocks,
    ) -> Self {
        Self {
            pool,
            codec,
            composer,
            mailer,
            imap,
            settings,
            options,
            locks,
        }
    }

    pub fn settings(&self) -> &Arc<RuntimeSettings> {
        &self.settings
    }

    pub async fn run_tick(&self) -> Result<ScanReport> {
        if let Err(e) = self.settings.refresh(&self.pool).await {
            warn!(error = %e, "settings refresh failed, keeping current values");
        }
        let receivers = account_service::enabled_receivers(&self.pool).await?;
        let limit = self.options.concurrency.max(1);

        let results: Vec<(i64, String, Result<AccountReport>)> = futures::stream::iter(receivers)
            .map(|receiver| async move {
                let res = with_timeout(
                    self.options.account_timeout,
                    "account scan",
                    self.scan_account(&receiver),
                )
                .await;
                (receiver.id, receiver.address, res)
            })
            .buffered(limit)
            .collect()
            .await;

        let mut report = ScanReport::default();
        for (receiver_id, address, res) in results {
            match res {
                Ok(acc) => report.accounts.push(acc),
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(receiver_id, %address, %error, "account scan failed");
                    report.failed_accounts.push((receiver_id, error));
                }
            }
        }
        info!(
            accounts = report.accounts.len(),
            failed = report.failed_accounts.len(),
            matched = report.matched(),
            rescued = report.rescued(),
            replied = report.replied(),
            "scan tick completed"
        );
        Ok(report)
    }

    /// INBOX first, then each configured spam folder. The session is logged
    /// out whatever happened to the folders.
    pub async fn scan_account(&self, receiver: &ReceiverAccount) -> Result<AccountReport> {
        let endpoint = receiver.imap_endpoint(&self.codec);
        let mut session = self
            .imap
            .connect(&endpoint)
            .await
            .with_context(|| format!("IMAP login for {}", receiver.address))?;

        if let Err(e) = account_service::update_last_verified(&self.pool, receiver.id, now_epoch()).await {
            debug!(receiver_id = receiver.id, error = %e, "last_verified_at update failed");
        }

        debug!(receiver = %receiver.address, provider = receiver.provider().as_str(), "scanning account");
        let ctx = AccountContext {
            receiver,
            strategy: receiver.provider().rescue_strategy(),
            reply_identity: receiver.smtp_identity(&self.codec),
            engage_all: self.settings.engage_all(),
            adopt_untracked: self.settings.adopt_untracked(),
        };
        let mut report = AccountReport {
            receiver_id: receiver.id,
            address: receiver.address.clone(),
            ..Default::default()
        };

        let mut folders: Vec<(&str, bool)> = vec![(INBOX, false)];
        for name in &self.options.spam_folders {
            if !name.eq_ignore_ascii_case(INBOX) {
                folders.push((name.as_str(), true));
            }
        }

        for (folder, spam) in folders {
            match self.scan_folder(session.as_mut(), &ctx, folder, spam).await {
                Ok(Some(folder_report)) => report.folders.push(folder_report),
                Ok(None) => {}
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(receiver = %receiver.address, folder, %error, "folder scan failed");
                    report.folder_errors.push((folder.to_string(), error));
                }
            }
        }

        if let Err(e) = session.logout().await {
            debug!(receiver = %receiver.address, error = %e, "logout failed");
        }
        Ok(report)
    }

    /// `None` when a spam folder does not exist on this server.
    async fn scan_folder(
        &self,
        session: &mut dyn MailboxSession,
        ctx: &AccountContext<'_>,
        folder: &str,
        spam: bool,
    ) -> Result<Option<FolderReport>> {
        let _guard = self.locks.acquire(ctx.receiver.id, folder).await;

        let total = match session.select(folder).await {
            Ok(total) => total,
            Err(e) if spam => {
                debug!(receiver = %ctx.receiver.address, folder, error = %e, "spam folder not available, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.context(format!("select {folder}"))),
        };

        let mut report = FolderReport::new(folder, spam);
        let Some((start, end)) = scan_window(total) else {
            return Ok(Some(report));
        };
        let mut messages = session.fetch_sequence(start, end).await?;
        messages.sort_by(|a, b| b.seq.cmp(&a.seq));
        messages.truncate(SCAN_WINDOW as usize);
        report.fetched = messages.len();

        for msg in &messages {
            if let Err(e) = self.process_message(session, ctx, folder, spam, msg, &mut report).await {
                if e.is::<FolderLost>() {
                    return Err(e);
                }
                warn!(receiver = %ctx.receiver.address, folder, uid = msg.uid, error = %format!("{e:#}"), "message processing failed");
            }
        }
        debug!(receiver = %ctx.receiver.address, folder, ?report, "folder scanned");
        Ok(Some(report))
    }

    async fn process_message(
        &self,
        session: &mut dyn MailboxSession,
        ctx: &AccountContext<'_>,
        folder: &str,
        spam: bool,
        msg: &FetchedMessage,
        report: &mut FolderReport,
    ) -> Result<()> {
        let raw = String::from_utf8_lossy(&msg.raw);
        let Some(token) = token::extract(&raw) else {
            return Ok(());
        };
        let envelope = Envelope::parse(&msg.raw);
        let now = now_epoch();

        match warmup_log_service::find_by_token(&self.pool, &token).await? {
            Some(record) => {
                if record.received_at.is_none()
                    && !record.status().is_terminal()
                    && warmup_log_service::mark_received(&self.pool, &token, folder, spam, now).await?
                {
                    info!(receiver = %ctx.receiver.address, %token, folder, spam, "warmup message received");
                }
            }
            None if ctx.adopt_untracked => {
                self.adopt(ctx, &token, &envelope, folder, spam, now).await?;
                report.adopted += 1;
            }
            None => {
                debug!(%token, folder, "untracked token ignored");
                return Ok(());
            }
        }
        report.matched += 1;

        if spam {
            match ctx
                .strategy
                .rescue(session, folder, msg.uid, envelope.message_id.as_deref(), ctx.engage_all)
                .await
            {
                Ok(outcome) => {
                    report.rescued += 1;
                    info!(
                        receiver = %ctx.receiver.address,
                        %token,
                        folder,
                        fallback = outcome.used_fallback,
                        tagged_uid = ?outcome.tagged_uid,
                        "rescued from spam"
                    );
                }
                Err(e) if e.is::<FolderLost>() => return Err(e),
                Err(e) => warn!(receiver = %ctx.receiver.address, %token, folder, error = %format!("{e:#}"), "spam rescue failed"),
            }
        }

        if let Err(e) = session.uid_store(msg.uid, SEEN_FLAGGED).await {
            debug!(uid = msg.uid, folder, error = %e, "flagging original failed");
        }

        if let Some(record) = warmup_log_service::find_by_token(&self.pool, &token).await? {
            if record.awaiting_reply() {
                self.reply(ctx, &record, &envelope, &raw, report).await?;
            }
        }
        Ok(())
    }

    async fn adopt(
        &self,
        ctx: &AccountContext<'_>,
        token: &str,
        envelope: &Envelope,
        folder: &str,
        spam: bool,
        now: i64,
    ) -> Result<()> {
        let sender_id = match envelope.from.as_deref() {
            Some(addr) => account_service::find_sender_by_address(&self.pool, addr)
                .await?
                .map(|s| s.id),
            None => None,
        };
        let log = NewWarmupLog {
            token: token.to_string(),
            subject: envelope.subject.clone().unwrap_or_default(),
            sender_id,
            receiver_id: ctx.receiver.id,
            provider_message_id: envelope.message_id.clone(),
            status: WarmupStatus::Received,
            mailbox: Some(folder.to_string()),
            spam_folder: spam,
            error: None,
            sent_at: now,
            received_at: Some(now),
        };
        if warmup_log_service::insert_if_absent(&self.pool, &log).await? {
            info!(receiver = %ctx.receiver.address, token, ?sender_id, folder, "adopted untracked warmup message");
        }
        Ok(())
    }

    async fn reply(
        &self,
        ctx: &AccountContext<'_>,
        record: &WarmupLog,
        envelope: &Envelope,
        raw: &str,
        report: &mut FolderReport,
    ) -> Result<()> {
        let Some(identity) = ctx.reply_identity.as_ref() else {
            debug!(receiver = %ctx.receiver.address, "no usable SMTP credentials, not replying");
            return Ok(());
        };
        let Some(to) = envelope.from.as_deref() else {
            debug!(token = %record.token, "no from address, not replying");
            return Ok(());
        };

        // Claimed before sending: a reply whose outcome never got recorded is
        // not sent a second time.
        if !warmup_log_service::claim_reply(&self.pool, &record.token, now_epoch()).await? {
            debug!(token = %record.token, "reply already claimed");
            return Ok(());
        }

        let original_subject = envelope.subject.as_deref().unwrap_or(&record.subject);
        let email = OutgoingEmail {
            from: ctx.receiver.address.clone(),
            to: to.to_string(),
            subject: reply_subject(original_subject),
            body: self.composer.reply(raw).await,
            in_reply_to: envelope.message_id.clone(),
        };

        match self.mailer.send(identity, &email).await {
            Ok(message_id) => {
                if warmup_log_service::mark_replied(&self.pool, &record.token, now_epoch()).await? {
                    report.replied += 1;
                    info!(receiver = %ctx.receiver.address, token = %record.token, %message_id, "auto-reply sent");
                }
            }
            Err(e) => {
                let error = format!("reply failed: {e:#}");
                warmup_log_service::mark_failed(&self.pool, &record.token, &error).await?;
                report.reply_failed += 1;
                warn!(receiver = %ctx.receiver.address, token = %record.token, %error, "auto-reply failed");
            }
        }
        Ok(())
    }
}
