use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Most recent messages inspected per folder per tick.
pub const SCAN_WINDOW: u32 = 10;

/// Sequence range `start..=end` covering the newest `SCAN_WINDOW` messages of a
/// folder holding `total` messages. `None` for an empty folder.
pub fn scan_window(total: u32) -> Option<(u32, u32)> {
    if total == 0 {
        return None;
    }
    let start = total.saturating_sub(SCAN_WINDOW - 1).max(1);
    Some((start, total))
}

/// UID SEARCH criteria locating a message by its Message-ID header. Servers
/// differ on whether the angle brackets take part in the match, so both forms
/// are tried.
pub fn message_id_queries(message_id: &str) -> Vec<String> {
    let bare: String = message_id
        .trim()
        .trim_matches(['<', '>'])
        .chars()
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    if bare.is_empty() {
        return Vec::new();
    }
    vec![
        format!("HEADER Message-ID \"<{bare}>\""),
        format!("HEADER Message-ID \"{bare}\""),
    ]
}

/// In-process locks keyed by `(receiver_id, folder)`. A folder's fetch/mutate
/// sequence runs while holding the guard, which releases on drop whatever the
/// exit path. Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Debug, Clone, Default)]
pub struct MailboxLocks {
    inner: Arc<Mutex<HashMap<(i64, String), Arc<tokio::sync::Mutex<()>>>>>,
}

impl MailboxLocks {
    pub async fn acquire(&self, account_id: i64, folder: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // the map's own Arc is the only reference left
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry((account_id, folder.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn window_is_bounded_to_ten() {
        assert_eq!(scan_window(0), None);
        assert_eq!(scan_window(1), Some((1, 1)));
        assert_eq!(scan_window(9), Some((1, 9)));
        assert_eq!(scan_window(10), Some((1, 10)));
        assert_eq!(scan_window(11), Some((2, 11)));
        assert_eq!(scan_window(5000), Some((4991, 5000)));
        for total in 1..200u32 {
            let (start, end) = scan_window(total).unwrap();
            assert_eq!(end - start + 1, total.min(SCAN_WINDOW));
        }
    }

    #[test]
    fn message_id_queries_strip_brackets_and_quotes() {
        assert_eq!(
            message_id_queries("<abc@example.com>"),
            vec![
                "HEADER Message-ID \"<abc@example.com>\"".to_string(),
                "HEADER Message-ID \"abc@example.com\"".to_string(),
            ]
        );
        assert_eq!(message_id_queries("a\"b"), message_id_queries("ab"));
        assert!(message_id_queries("<>").is_empty());
    }

    #[tokio::test]
    async fn same_folder_is_exclusive_other_folders_are_not() {
        let locks = MailboxLocks::default();
        let guard = locks.acquire(1, "INBOX").await;
        // a different folder is free
        let _spam = locks.acquire(1, "Spam").await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(1, "INBOX")).await;
        assert!(blocked.is_err());
        drop(guard);
        let again =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(1, "INBOX")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = MailboxLocks::default();
        drop(locks.acquire(1, "INBOX").await);
        drop(locks.acquire(2, "INBOX").await);
        let held = locks.acquire(3, "Spam").await;
        assert_eq!(locks.inner.lock().unwrap().len(), 1);

        drop(locks.acquire(4, "INBOX").await);
        // a held lock survives pruning
        assert!(locks.inner.lock().unwrap().contains_key(&(3, "Spam".to_string())));
        drop(held);
    }
}
