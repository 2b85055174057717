#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailora_warmup::config::Config;
use mailora_warmup::db;
use mailora_warmup::engine::Engine;
use mailora_warmup::imap::{FetchedMessage, ImapConnector, ImapEndpoint, MailboxSession};
use mailora_warmup::secret_codec::SecretCodec;
use mailora_warmup::services::content_service::{Composer, ContentGenerator};
use mailora_warmup::smtp::{MailSender, OutgoingEmail, SmtpIdentity};

pub const SECRET_KEY: &str = "integration-test-key";

pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("WARMUP_SECRET_KEY".into(), SECRET_KEY.into());
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_vars(&vars).unwrap()
}

pub fn codec() -> SecretCodec {
    SecretCodec::new(SECRET_KEY)
}

pub async fn memory_pool() -> SqlitePool {
    let pool = db::connect_memory().await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn insert_sender(pool: &SqlitePool, address: &str, password: &str, daily_limit: i64, sent_today: i64) -> i64 {
    let secret = codec().encrypt(password).unwrap();
    let today = chrono::Utc::now().date_naive();
    sqlx::query(
        "INSERT INTO senders (host, port, secure, auth_user, encrypted_secret, display_name, \
         display_address, daily_limit, sent_today, sent_today_date, enabled) \
         VALUES ('smtp.sender.test', 587, 0, ?, ?, 'Warm Sender', ?, ?, ?, ?, 1)",
    )
    .bind(address)
    .bind(secret)
    .bind(address)
    .bind(daily_limit)
    .bind(sent_today)
    .bind(today)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// Receiver whose IMAP login is `address` / `password`. SMTP is configured
/// with the same credentials when `smtp` is set.
pub async fn insert_receiver(pool: &SqlitePool, address: &str, password: &str, provider: &str, smtp: bool) -> i64 {
    let secret = codec().encrypt(password).unwrap();
    let (smtp_host, smtp_user, smtp_secret) = if smtp {
        ("smtp.receiver.test", address, secret.clone())
    } else {
        ("", "", String::new())
    };
    sqlx::query(
        "INSERT INTO receivers (imap_host, imap_port, imap_secure, imap_user, encrypted_imap_secret, \
         smtp_host, smtp_port, smtp_secure, smtp_user, encrypted_smtp_secret, address, provider_class, enabled) \
         VALUES ('imap.receiver.test', 993, 1, ?, ?, ?, 587, 0, ?, ?, ?, ?, 1)",
    )
    .bind(address)
    .bind(&secret)
    .bind(smtp_host)
    .bind(smtp_user)
    .bind(smtp_secret)
    .bind(address)
    .bind(provider)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub fn raw_message(from: &str, to: &str, subject: &str, message_id: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMessage-ID: <{message_id}>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        body.replace('\n', "\r\n")
    )
    .into_bytes()
}

// ---------- IMAP ----------

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
    pub flags: BTreeSet<String>,
}

impl FakeMessage {
    pub fn message_id_header(&self) -> Option<String> {
        let raw = String::from_utf8_lossy(&self.raw);
        raw.lines()
            .find(|l| l.to_ascii_lowercase().starts_with("message-id:"))
            .map(|l| l["message-id:".len()..].trim().to_string())
    }
}

#[derive(Debug, Default)]
pub struct FakeMailbox {
    pub password: String,
    pub folders: BTreeMap<String, Vec<FakeMessage>>,
    pub next_uid: u32,
}

impl FakeMailbox {
    fn alloc_uid(&mut self) -> u32 {
        self.next_uid += 1;
        self.next_uid
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub mailboxes: HashMap<String, FakeMailbox>,
    /// `(user, folder, start, end)` per fetch.
    pub fetches: Vec<(String, String, u32, u32)>,
    pub moves: Vec<(String, String, u32)>,
    pub copies: usize,
    pub expunges: usize,
    pub searches: Vec<String>,
    pub logins: usize,
    pub logouts: usize,
    pub fail_move: bool,
    pub stall_login: HashSet<String>,
    /// Folder -> SELECTs still allowed to succeed; later ones fail.
    pub select_budget: HashMap<String, usize>,
    pub fail_fetch: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeImap {
    pub state: Arc<Mutex<ServerState>>,
}

impl FakeImap {
    pub fn add_mailbox(&self, user: &str, password: &str, folders: &[&str]) {
        let mut st = self.state.lock().unwrap();
        let mut mb = FakeMailbox {
            password: password.to_string(),
            ..Default::default()
        };
        for f in folders {
            mb.folders.insert(f.to_string(), Vec::new());
        }
        st.mailboxes.insert(user.to_string(), mb);
    }

    /// Append a message and return its UID.
    pub fn deliver(&self, user: &str, folder: &str, raw: Vec<u8>) -> u32 {
        let mut st = self.state.lock().unwrap();
        let mb = st.mailboxes.get_mut(user).unwrap();
        let uid = mb.alloc_uid();
        mb.folders.get_mut(folder).unwrap().push(FakeMessage {
            uid,
            raw,
            flags: BTreeSet::new(),
        });
        uid
    }

    /// Append a message under a fixed UID, as servers with per-folder UID
    /// spaces do.
    pub fn deliver_uid(&self, user: &str, folder: &str, uid: u32, raw: Vec<u8>) {
        let mut st = self.state.lock().unwrap();
        let mb = st.mailboxes.get_mut(user).unwrap();
        mb.next_uid = mb.next_uid.max(uid);
        mb.folders.get_mut(folder).unwrap().push(FakeMessage {
            uid,
            raw,
            flags: BTreeSet::new(),
        });
    }

    pub fn folder(&self, user: &str, folder: &str) -> Vec<FakeMessage> {
        let st = self.state.lock().unwrap();
        st.mailboxes[user].folders.get(folder).cloned().unwrap_or_default()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut st = self.state.lock().unwrap();
        f(&mut st)
    }
}

#[async_trait]
impl ImapConnector for FakeImap {
    async fn connect(&self, endpoint: &ImapEndpoint) -> Result<Box<dyn MailboxSession>> {
        let stall = self.state.lock().unwrap().stall_login.contains(&endpoint.username);
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let mut st = self.state.lock().unwrap();
        let Some(mb) = st.mailboxes.get(&endpoint.username) else {
            bail!("login failed: unknown user {}", endpoint.username);
        };
        if mb.password != endpoint.password {
            bail!("login failed: bad credentials for {}", endpoint.username);
        }
        st.logins += 1;
        Ok(Box::new(FakeSession {
            server: self.clone(),
            user: endpoint.username.clone(),
            selected: None,
        }))
    }
}

pub struct FakeSession {
    server: FakeImap,
    user: String,
    selected: Option<String>,
}

impl FakeSession {
    fn selected(&self) -> Result<String> {
        self.selected.clone().ok_or_else(|| anyhow!("no folder selected"))
    }
}

fn parse_flags(query: &str) -> Vec<String> {
    query
        .trim()
        .trim_start_matches("+FLAGS")
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split_whitespace()
        .map(String::from)
        .collect()
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn select(&mut self, folder: &str) -> Result<u32> {
        let count = {
            let mut st = self.server.state.lock().unwrap();
            if let Some(left) = st.select_budget.get_mut(folder) {
                if *left == 0 {
                    // like a timed-out SELECT, the previous folder stays current
                    bail!("SELECT {folder} timed out");
                }
                *left -= 1;
            }
            st.mailboxes[&self.user].folders.get(folder).map(|m| m.len() as u32)
        };
        match count {
            Some(n) => {
                self.selected = Some(folder.to_string());
                Ok(n)
            }
            None => bail!("NO [NONEXISTENT] mailbox {folder} does not exist"),
        }
    }

    async fn fetch_sequence(&mut self, start: u32, end: u32) -> Result<Vec<FetchedMessage>> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        st.fetches.push((self.user.clone(), folder.clone(), start, end));
        if st.fail_fetch.contains(&folder) {
            bail!("BAD FETCH failed in {folder}");
        }
        let msgs = &st.mailboxes[&self.user].folders[&folder];
        Ok(msgs
            .iter()
            .enumerate()
            .map(|(i, m)| (i as u32 + 1, m))
            .filter(|(seq, _)| *seq >= start && *seq <= end)
            .map(|(seq, m)| FetchedMessage {
                seq,
                uid: m.uid,
                raw: m.raw.clone(),
            })
            .collect())
    }

    async fn uid_store(&mut self, uid: u32, query: &str) -> Result<()> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        let mb = st.mailboxes.get_mut(&self.user).unwrap();
        if let Some(m) = mb.folders.get_mut(&folder).unwrap().iter_mut().find(|m| m.uid == uid) {
            m.flags.extend(parse_flags(query));
        }
        Ok(())
    }

    async fn uid_move(&mut self, uid: u32, target: &str) -> Result<()> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        if st.fail_move {
            bail!("BAD MOVE not supported");
        }
        st.moves.push((self.user.clone(), folder.clone(), uid));
        let mb = st.mailboxes.get_mut(&self.user).unwrap();
        let src = mb.folders.get_mut(&folder).unwrap();
        let Some(pos) = src.iter().position(|m| m.uid == uid) else {
            bail!("no message with uid {uid}");
        };
        let mut msg = src.remove(pos);
        msg.uid = mb.alloc_uid();
        mb.folders
            .get_mut(target)
            .ok_or_else(|| anyhow!("no folder {target}"))?
            .push(msg);
        Ok(())
    }

    async fn uid_copy(&mut self, uid: u32, target: &str) -> Result<()> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        st.copies += 1;
        let mb = st.mailboxes.get_mut(&self.user).unwrap();
        let Some(mut msg) = mb.folders[&folder].iter().find(|m| m.uid == uid).cloned() else {
            bail!("no message with uid {uid}");
        };
        msg.uid = mb.alloc_uid();
        msg.flags.clear();
        mb.folders
            .get_mut(target)
            .ok_or_else(|| anyhow!("no folder {target}"))?
            .push(msg);
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        st.expunges += 1;
        let mb = st.mailboxes.get_mut(&self.user).unwrap();
        mb.folders
            .get_mut(&folder)
            .unwrap()
            .retain(|m| !m.flags.contains("\\Deleted"));
        Ok(())
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>> {
        let folder = self.selected()?;
        let mut st = self.server.state.lock().unwrap();
        st.searches.push(query.to_string());
        let needle = query
            .split('"')
            .nth(1)
            .ok_or_else(|| anyhow!("unsupported search {query}"))?
            .to_string();
        let msgs = &st.mailboxes[&self.user].folders[&folder];
        Ok(msgs
            .iter()
            .filter(|m| m.message_id_header().is_some_and(|h| h.contains(&needle)))
            .map(|m| m.uid)
            .collect())
    }

    async fn logout(&mut self) -> Result<()> {
        self.server.state.lock().unwrap().logouts += 1;
        Ok(())
    }
}

// ---------- SMTP ----------

#[derive(Debug, Clone)]
pub struct SentMail {
    pub username: String,
    pub password: String,
    pub email: OutgoingEmail,
    pub message_id: String,
}

/// Records every submission. Identities whose password is in `reject` fail
/// authentication; users in `stall_after_accept` hang once the message is
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct FakeMailer {
    pub sent: Arc<Mutex<Vec<SentMail>>>,
    pub reject: Arc<Mutex<HashSet<String>>>,
    pub stall_after_accept: Arc<Mutex<HashSet<String>>>,
}

impl FakeMailer {
    pub fn reject_password(&self, password: &str) {
        self.reject.lock().unwrap().insert(password.to_string());
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn stall_after_accept(&self, username: &str, on: bool) {
        let mut users = self.stall_after_accept.lock().unwrap();
        if on {
            users.insert(username.to_string());
        } else {
            users.remove(username);
        }
    }
}

#[async_trait]
impl MailSender for FakeMailer {
    async fn send(&self, identity: &SmtpIdentity, email: &OutgoingEmail) -> Result<String> {
        if self.reject.lock().unwrap().contains(&identity.password) {
            bail!("535 5.7.8 authentication failed");
        }
        let message_id = {
            let mut sent = self.sent.lock().unwrap();
            let message_id = format!("<fake-{}@{}>", sent.len() + 1, identity.host);
            sent.push(SentMail {
                username: identity.username.clone(),
                password: identity.password.clone(),
                email: email.clone(),
                message_id: message_id.clone(),
            });
            message_id
        };
        let stall = self.stall_after_accept.lock().unwrap().contains(&identity.username);
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(message_id)
    }
}

// ---------- content ----------

/// Returns a fixed answer and records every prompt.
#[derive(Debug, Clone, Default)]
pub struct RecordingContent {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ContentGenerator for RecordingContent {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Sounds good, thanks!".to_string())
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub imap: FakeImap,
    pub mailer: FakeMailer,
    pub engine: Engine,
    pub config: Config,
}

pub async fn harness(extra: &[(&str, &str)]) -> Harness {
    harness_with_composer(extra, Composer::offline()).await
}

pub async fn harness_with_composer(extra: &[(&str, &str)], composer: Composer) -> Harness {
    let pool = memory_pool().await;
    let imap = FakeImap::default();
    let mailer = FakeMailer::default();
    let config = test_config(extra);
    let engine = Engine::assemble(
        pool.clone(),
        &config,
        composer,
        Arc::new(mailer.clone()),
        Arc::new(imap.clone()),
    );
    Harness {
        pool,
        imap,
        mailer,
        engine,
        config,
    }
}
