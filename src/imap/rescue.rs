use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

use super::folders::message_id_queries;
use super::{MailboxSession, INBOX};

pub const SEEN_FLAGGED: &str = "+FLAGS (\\Seen \\Flagged)";
pub const NOT_JUNK_TAGS: &str = "+FLAGS (\\Seen \\Flagged $NotJunk NotJunk)";
pub const NOT_JUNK_ANSWERED_TAGS: &str = "+FLAGS (\\Seen \\Flagged \\Answered $NotJunk NotJunk)";
pub const ENGAGED_TAGS: &str = "+FLAGS (\\Seen \\Flagged \\Answered)";
const DELETED: &str = "+FLAGS (\\Deleted)";

/// How a receiver's provider wants a message pulled out of spam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescueStrategy {
    /// Move to INBOX, then find the moved copy by Message-ID and tag it as
    /// not-junk.
    MoveThenTag,
    /// Move to INBOX; engagement tags only when engage-all is on.
    DirectMove,
}

/// The session no longer has the spam folder selected, so UIDs fetched from
/// it must not be used again on this session.
#[derive(Debug, Error)]
#[error("{folder} is no longer selected: {reason}")]
pub struct FolderLost {
    pub folder: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescueOutcome {
    pub used_fallback: bool,
    pub tagged_uid: Option<u32>,
}

impl RescueStrategy {
    /// Tag set to apply to the moved copy, if any.
    pub fn inbox_tags(&self, engage_all: bool) -> Option<&'static str> {
        match (self, engage_all) {
            (Self::MoveThenTag, false) => Some(NOT_JUNK_TAGS),
            (Self::MoveThenTag, true) => Some(NOT_JUNK_ANSWERED_TAGS),
            (Self::DirectMove, true) => Some(ENGAGED_TAGS),
            (Self::DirectMove, false) => None,
        }
    }

    /// Pull `uid` out of the currently selected spam `folder` into INBOX. When
    /// tagging requires INBOX to be selected, `folder` is re-selected before
    /// returning so the caller's scan can continue on UIDs it already fetched.
    /// If either SELECT fails the error is a [`FolderLost`] and the caller
    /// must stop issuing UID commands for `folder`.
    pub async fn rescue(
        &self,
        session: &mut dyn MailboxSession,
        folder: &str,
        uid: u32,
        message_id: Option<&str>,
        engage_all: bool,
    ) -> Result<RescueOutcome> {
        let used_fallback = move_to_inbox(session, uid).await?;
        let mut outcome = RescueOutcome {
            used_fallback,
            tagged_uid: None,
        };

        let (Some(tags), Some(message_id)) = (self.inbox_tags(engage_all), message_id) else {
            return Ok(outcome);
        };

        if let Err(e) = session.select(INBOX).await {
            return Err(lost(folder, "select INBOX for tagging", e));
        }
        let tagged = tag_by_message_id(session, message_id, tags).await;
        if let Err(e) = session.select(folder).await {
            return Err(lost(folder, "re-select after tagging", e));
        }
        outcome.tagged_uid = tagged?;
        Ok(outcome)
    }
}

fn lost(folder: &str, step: &str, e: anyhow::Error) -> anyhow::Error {
    FolderLost {
        folder: folder.to_string(),
        reason: format!("{step}: {e:#}"),
    }
    .into()
}

/// MOVE with a COPY + \Deleted + EXPUNGE fallback. Returns whether the fallback
/// was needed.
async fn move_to_inbox(session: &mut dyn MailboxSession, uid: u32) -> Result<bool> {
    match session.uid_move(uid, INBOX).await {
        Ok(()) => Ok(false),
        Err(e) => {
            warn!(uid, error = %e, "MOVE failed, falling back to COPY+DELETE");
            session.uid_copy(uid, INBOX).await.context("fallback COPY")?;
            session.uid_store(uid, DELETED).await.context("fallback STORE \\Deleted")?;
            session.expunge().await.context("fallback EXPUNGE")?;
            Ok(true)
        }
    }
}

/// Search the selected folder for `message_id` and store `tags` on the newest
/// match.
pub async fn tag_by_message_id(
    session: &mut dyn MailboxSession,
    message_id: &str,
    tags: &str,
) -> Result<Option<u32>> {
    for query in message_id_queries(message_id) {
        match session.uid_search(&query).await {
            Ok(uids) => {
                if let Some(uid) = uids.iter().copied().max() {
                    session.uid_store(uid, tags).await?;
                    return Ok(Some(uid));
                }
            }
            Err(e) => debug!(%query, error = %e, "search variant failed"),
        }
    }
    debug!(%message_id, "moved message not found in INBOX");
    Ok(None)
}
