// IMAP module: session abstraction, async-imap connector, folder helpers and spam rescue
pub mod conn;
pub mod envelope;
pub mod folders;
pub mod rescue;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub const INBOX: &str = "INBOX";

/// Connection parameters for one receiver mailbox (secret already decoded).
#[derive(Clone)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ImapEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// One message as returned by a sequence-range fetch.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// The subset of an authenticated IMAP session the scanner drives.
#[async_trait]
pub trait MailboxSession: Send {
    /// SELECT the folder read-write and return its EXISTS count.
    async fn select(&mut self, folder: &str) -> Result<u32>;
    /// Fetch sequence numbers `start..=end` of the selected folder.
    async fn fetch_sequence(&mut self, start: u32, end: u32) -> Result<Vec<FetchedMessage>>;
    async fn uid_store(&mut self, uid: u32, query: &str) -> Result<()>;
    async fn uid_move(&mut self, uid: u32, target: &str) -> Result<()>;
    async fn uid_copy(&mut self, uid: u32, target: &str) -> Result<()>;
    async fn expunge(&mut self) -> Result<()>;
    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>>;
    async fn logout(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ImapConnector: Send + Sync {
    async fn connect(&self, endpoint: &ImapEndpoint) -> Result<Box<dyn MailboxSession>>;
}

pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => bail!("{what} timed out after {}s", limit.as_secs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_as_error() {
        let res: Result<()> = with_timeout(Duration::from_secs(5), "SELECT", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        let err = res.unwrap_err().to_string();
        assert!(err.contains("SELECT timed out after 5s"), "{err}");
    }

    #[test]
    fn endpoint_debug_hides_password() {
        let ep = ImapEndpoint {
            host: "imap.example.com".into(),
            port: 993,
            secure: true,
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{ep:?}").contains("hunter2"));
    }
}
