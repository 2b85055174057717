use anyhow::{anyhow, Context, Result};
use async_imap::Session;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::fmt::Debug;
use std::time::Duration;
use tokio::net::TcpStream;
use native_tls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;

use super::{with_timeout, FetchedMessage, ImapConnector, ImapEndpoint, MailboxSession};

/// Connects receivers over TCP (+TLS when `secure`) with async-imap. The same
/// timeout bounds connect+login and every later command.
#[derive(Debug, Clone)]
pub struct AsyncImapConnector {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl AsyncImapConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            accept_invalid_certs: false,
        }
    }
}

#[async_trait]
impl ImapConnector for AsyncImapConnector {
    async fn connect(&self, ep: &ImapEndpoint) -> Result<Box<dyn MailboxSession>> {
        let limit = self.timeout;
        with_timeout(limit, "IMAP connect", async {
            let tcp = TcpStream::connect((ep.host.as_str(), ep.port))
                .await
                .with_context(|| format!("Failed to connect to {}:{}", ep.host, ep.port))?;
            if ep.secure {
                let tls = TlsConnector::builder()
                    .danger_accept_invalid_certs(self.accept_invalid_certs)
                    .build()
                    .context("Failed to build TLS connector")?;
                let tls = tokio_native_tls::TlsConnector::from(tls);
                let tls_stream = tls
                    .connect(&ep.host, tcp)
                    .await
                    .context("TLS handshake failed")?;
                let client = async_imap::Client::new(tls_stream.compat());
                let session = client
                    .login(&ep.username, &ep.password)
                    .await
                    .map_err(|(e, _)| anyhow!("login failed: {e}"))?;
                Ok(Box::new(ImapSession::new(session, limit)) as Box<dyn MailboxSession>)
            } else {
                let client = async_imap::Client::new(tcp.compat());
                let session = client
                    .login(&ep.username, &ep.password)
                    .await
                    .map_err(|(e, _)| anyhow!("login failed: {e}"))?;
                Ok(Box::new(ImapSession::new(session, limit)) as Box<dyn MailboxSession>)
            }
        })
        .await
    }
}

pub struct ImapSession<T>
where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin + Debug + Send,
{
    session: Session<T>,
    op_timeout: Duration,
}

impl<T> ImapSession<T>
where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin + Debug + Send,
{
    pub fn new(session: Session<T>, op_timeout: Duration) -> Self {
        Self {
            session,
            op_timeout,
        }
    }
}

#[async_trait]
impl<T> MailboxSession for ImapSession<T>
where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin + Debug + Send,
{
    async fn select(&mut self, folder: &str) -> Result<u32> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "SELECT", async move {
            let mailbox = session.select(folder).await?;
            Ok(mailbox.exists)
        })
        .await
    }

    async fn fetch_sequence(&mut self, start: u32, end: u32) -> Result<Vec<FetchedMessage>> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "FETCH", async move {
            let mut out = Vec::new();
            let mut stream = session
                .fetch(format!("{start}:{end}"), "(UID FLAGS BODY.PEEK[])")
                .await?;
            while let Some(item) = stream.next().await {
                let f = item?;
                let Some(uid) = f.uid else { continue };
                out.push(FetchedMessage {
                    seq: f.message,
                    uid,
                    raw: f.body().map(|b| b.to_vec()).unwrap_or_default(),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn uid_store(&mut self, uid: u32, query: &str) -> Result<()> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "UID STORE", async move {
            let _updates: Vec<_> = session
                .uid_store(uid.to_string(), query)
                .await?
                .try_collect()
                .await?;
            Ok(())
        })
        .await
    }

    async fn uid_move(&mut self, uid: u32, target: &str) -> Result<()> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "UID MOVE", async move {
            session.uid_mv(uid.to_string(), target).await?;
            Ok(())
        })
        .await
    }

    async fn uid_copy(&mut self, uid: u32, target: &str) -> Result<()> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "UID COPY", async move {
            session.uid_copy(uid.to_string(), target).await?;
            Ok(())
        })
        .await
    }

    async fn expunge(&mut self) -> Result<()> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "EXPUNGE", async move {
            let _expunged: Vec<_> = session.expunge().await?.try_collect().await?;
            Ok(())
        })
        .await
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "UID SEARCH", async move {
            let uids = session.uid_search(query).await?;
            let mut uids: Vec<u32> = uids.into_iter().collect();
            uids.sort_unstable();
            Ok(uids)
        })
        .await
    }

    async fn logout(&mut self) -> Result<()> {
        let session = &mut self.session;
        with_timeout(self.op_timeout, "LOGOUT", async move {
            session.logout().await?;
            Ok(())
        })
        .await
    }
}
