//! Correlation log store: one row per synthetic message, keyed by token
use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::warmup_log::{NewWarmupLog, WarmupLog, WarmupStatus};

const LOG_COLUMNS: &str = "id, token, subject, sender_id, receiver_id, provider_message_id, status, \
     mailbox, spam_folder, error, sent_at, received_at, reply_at";

pub async fn token_exists(pool: &SqlitePool, token: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM warmup_logs WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn find_by_token(pool: &SqlitePool, token: &str) -> Result<Option<WarmupLog>> {
    let row = sqlx::query_as::<_, WarmupLog>(&format!(
        "SELECT {LOG_COLUMNS} FROM warmup_logs WHERE token = ?"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a new row. A duplicate token is a unique-constraint error.
pub async fn insert(pool: &SqlitePool, log: &NewWarmupLog) -> Result<i64> {
    let result = sqlx::query(
        r#"INSERT INTO warmup_logs (
            token, subject, sender_id, receiver_id, provider_message_id, status,
            mailbox, spam_folder, error, sent_at, received_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&log.token)
    .bind(&log.subject)
    .bind(log.sender_id)
    .bind(log.receiver_id)
    .bind(&log.provider_message_id)
    .bind(log.status.as_str())
    .bind(&log.mailbox)
    .bind(log.spam_folder)
    .bind(&log.error)
    .bind(log.sent_at)
    .bind(log.received_at)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Adoption path: insert unless the token is already tracked. Returns whether
/// a row was written.
pub async fn insert_if_absent(pool: &SqlitePool, log: &NewWarmupLog) -> Result<bool> {
    let result = sqlx::query(
        r#"INSERT OR IGNORE INTO warmup_logs (
            token, subject, sender_id, receiver_id, provider_message_id, status,
            mailbox, spam_folder, error, sent_at, received_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&log.token)
    .bind(&log.subject)
    .bind(log.sender_id)
    .bind(log.receiver_id)
    .bind(&log.provider_message_id)
    .bind(log.status.as_str())
    .bind(&log.mailbox)
    .bind(log.spam_folder)
    .bind(&log.error)
    .bind(log.sent_at)
    .bind(log.received_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// First observation wins: only a row with no `received_at` is touched, and
/// only `sent` advances to `received`.
pub async fn mark_received(
    pool: &SqlitePool,
    token: &str,
    mailbox: &str,
    spam_folder: bool,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE warmup_logs SET received_at = ?, mailbox = ?, spam_folder = ?, \
         status = CASE WHEN status = 'sent' THEN 'received' ELSE status END \
         WHERE token = ? AND received_at IS NULL",
    )
    .bind(now)
    .bind(mailbox)
    .bind(spam_folder)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Stamp `reply_at` on a received row before its reply is submitted. Only one
/// caller ever wins the claim, so a reply goes out at most once even when the
/// outcome is never recorded.
pub async fn claim_reply(pool: &SqlitePool, token: &str, now: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE warmup_logs SET reply_at = ? \
         WHERE token = ? AND reply_at IS NULL AND status = ?",
    )
    .bind(now)
    .bind(token)
    .bind(WarmupStatus::Received.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// `received -> replied`. A claimed `reply_at` is kept.
pub async fn mark_replied(pool: &SqlitePool, token: &str, now: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE warmup_logs SET status = ?, reply_at = COALESCE(reply_at, ?) \
         WHERE token = ? AND status = ?",
    )
    .bind(WarmupStatus::Replied.as_str())
    .bind(now)
    .bind(token)
    .bind(WarmupStatus::Received.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Divert a non-terminal row to `failed`. `received_at` stays; a reply claim
/// is released since nothing was delivered.
pub async fn mark_failed(pool: &SqlitePool, token: &str, error: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE warmup_logs SET status = 'failed', error = ?, reply_at = NULL \
         WHERE token = ? AND status IN ('sent', 'received')",
    )
    .bind(error)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<WarmupLog>> {
    let rows = sqlx::query_as::<_, WarmupLog>(&format!(
        "SELECT {LOG_COLUMNS} FROM warmup_logs ORDER BY sent_at DESC, id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub sent: i64,
    pub received: i64,
    pub replied: i64,
    pub failed: i64,
    pub spam_placements: i64,
}

pub async fn status_counts(pool: &SqlitePool) -> Result<StatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM warmup_logs GROUP BY status")
            .fetch_all(pool)
            .await?;
    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        match WarmupStatus::from_str(&status) {
            Some(WarmupStatus::Sent) => counts.sent = n,
            Some(WarmupStatus::Received) => counts.received = n,
            Some(WarmupStatus::Replied) => counts.replied = n,
            Some(WarmupStatus::Failed) => counts.failed = n,
            None => tracing::warn!(%status, "unknown status in warmup_logs"),
        }
    }
    counts.spam_placements =
        sqlx::query_scalar("SELECT COUNT(*) FROM warmup_logs WHERE spam_folder = 1")
            .fetch_one(pool)
            .await?;
    Ok(counts)
}
