//! Sender/receiver pool queries: daily quota reset, pair selection, counters
use anyhow::Result;
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;

use crate::models::account::{ReceiverAccount, SenderAccount};

const SENDER_COLUMNS: &str = "id, host, port, secure, auth_user, encrypted_secret, display_name, \
     display_address, daily_limit, sent_today, sent_today_date, enabled";

const RECEIVER_COLUMNS: &str = "id, imap_host, imap_port, imap_secure, imap_user, encrypted_imap_secret, \
     smtp_host, smtp_port, smtp_secure, smtp_user, encrypted_smtp_secret, address, provider_class, \
     enabled, last_verified_at";

pub async fn get_sender(pool: &SqlitePool, sender_id: i64) -> Result<Option<SenderAccount>> {
    let row = sqlx::query_as::<_, SenderAccount>(&format!(
        "SELECT {SENDER_COLUMNS} FROM senders WHERE id = ?"
    ))
    .bind(sender_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn eligible_senders(pool: &SqlitePool) -> Result<Vec<SenderAccount>> {
    let rows = sqlx::query_as::<_, SenderAccount>(&format!(
        "SELECT {SENDER_COLUMNS} FROM senders WHERE enabled = 1 AND sent_today < daily_limit ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn enabled_receivers(pool: &SqlitePool) -> Result<Vec<ReceiverAccount>> {
    let rows = sqlx::query_as::<_, ReceiverAccount>(&format!(
        "SELECT {RECEIVER_COLUMNS} FROM receivers WHERE enabled = 1 ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Zero `sent_today` for every sender whose counter date is not `today`.
/// Running it again on the same day touches nothing.
pub async fn reset_daily_counters(pool: &SqlitePool, today: NaiveDate) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE senders SET sent_today = 0, sent_today_date = ? \
         WHERE sent_today_date IS NULL OR sent_today_date <> ?",
    )
    .bind(today)
    .bind(today)
    .execute(pool)
    .await?;
    let reset = result.rows_affected();
    if reset > 0 {
        tracing::info!(reset, %today, "daily send counters reset");
    }
    Ok(reset)
}

fn is_own_mailbox(sender: &SenderAccount, receiver: &ReceiverAccount) -> bool {
    receiver.address.eq_ignore_ascii_case(&sender.display_address)
}

/// Uniformly random eligible sender and enabled receiver. A receiver sharing
/// the sender's address is never paired with it, and a sender whose only
/// receiver is its own mailbox is passed over. `None` when no pair exists.
pub async fn pick_pair(pool: &SqlitePool) -> Result<Option<(SenderAccount, ReceiverAccount)>> {
    let senders = eligible_senders(pool).await?;
    let receivers = enabled_receivers(pool).await?;
    let pairable: Vec<&SenderAccount> = senders
        .iter()
        .filter(|s| receivers.iter().any(|r| !is_own_mailbox(s, r)))
        .collect();
    let mut rng = rand::thread_rng();
    let Some(sender) = pairable.choose(&mut rng).map(|s| (*s).clone()) else {
        return Ok(None);
    };
    let candidates: Vec<&ReceiverAccount> = receivers
        .iter()
        .filter(|r| !is_own_mailbox(&sender, r))
        .collect();
    let Some(receiver) = candidates.choose(&mut rng).map(|r| (*r).clone()) else {
        return Ok(None);
    };
    Ok(Some((sender, receiver)))
}

pub async fn increment_sent(pool: &SqlitePool, sender_id: i64, today: NaiveDate) -> Result<()> {
    sqlx::query(
        "UPDATE senders SET sent_today = sent_today + 1, sent_today_date = ? WHERE id = ?",
    )
    .bind(today)
    .bind(sender_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Best-effort match of an observed "from" address to a sender.
pub async fn find_sender_by_address(pool: &SqlitePool, address: &str) -> Result<Option<SenderAccount>> {
    let row = sqlx::query_as::<_, SenderAccount>(&format!(
        "SELECT {SENDER_COLUMNS} FROM senders \
         WHERE lower(display_address) = lower(?) OR lower(auth_user) = lower(?) \
         ORDER BY enabled DESC, id LIMIT 1"
    ))
    .bind(address.trim())
    .bind(address.trim())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Stamp a successful IMAP login.
pub async fn update_last_verified(pool: &SqlitePool, receiver_id: i64, now: i64) -> Result<()> {
    sqlx::query("UPDATE receivers SET last_verified_at = ? WHERE id = ?")
        .bind(now)
        .bind(receiver_id)
        .execute(pool)
        .await?;
    Ok(())
}
