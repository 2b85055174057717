use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_SPAM_FOLDERS: &[&str] = &[
    "Spam",
    "Junk",
    "Junk E-mail",
    "Junk Email",
    "Bulk",
    "Bulk Mail",
    "[Gmail]/Spam",
    "INBOX.Spam",
    "INBOX.Junk",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub send_interval: Duration,
    pub scan_interval: Duration,
    pub spam_folders: Vec<String>,
    pub adopt_untracked: bool,
    pub engage_all: bool,
    pub debug: bool,
    pub scan_concurrency: usize,
    pub imap_timeout: Duration,
    pub smtp_timeout: Duration,
    pub content_timeout: Duration,
    pub account_timeout: Duration,
    pub secret_key: String,
    pub content_api_url: String,
    pub content_api_key: Option<String>,
    pub content_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let secret_key = lookup(vars, "WARMUP_SECRET_KEY")
            .context("WARMUP_SECRET_KEY must be set")?
            .to_string();

        let spam_folders = match lookup(vars, "WARMUP_SPAM_FOLDERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_SPAM_FOLDERS.iter().map(|s| s.to_string()).collect(),
        };

        let scan_concurrency = parse_num(lookup(vars, "WARMUP_SCAN_CONCURRENCY"), "WARMUP_SCAN_CONCURRENCY", 1)?;
        if scan_concurrency == 0 {
            bail!("WARMUP_SCAN_CONCURRENCY must be at least 1");
        }

        Ok(Config {
            database_url: lookup(vars, "DATABASE_URL")
                .unwrap_or("sqlite://mailora_warmup.db")
                .to_string(),
            send_interval: secs(lookup(vars, "WARMUP_SEND_INTERVAL_SECS"), "WARMUP_SEND_INTERVAL_SECS", 120)?,
            scan_interval: secs(lookup(vars, "WARMUP_SCAN_INTERVAL_SECS"), "WARMUP_SCAN_INTERVAL_SECS", 60)?,
            spam_folders,
            adopt_untracked: flag(lookup(vars, "WARMUP_ADOPT_UNTRACKED")),
            engage_all: flag(lookup(vars, "WARMUP_ENGAGE_ALL")),
            debug: flag(lookup(vars, "WARMUP_DEBUG")),
            scan_concurrency,
            imap_timeout: secs(lookup(vars, "WARMUP_IMAP_TIMEOUT_SECS"), "WARMUP_IMAP_TIMEOUT_SECS", 30)?,
            smtp_timeout: secs(lookup(vars, "WARMUP_SMTP_TIMEOUT_SECS"), "WARMUP_SMTP_TIMEOUT_SECS", 30)?,
            content_timeout: secs(lookup(vars, "WARMUP_CONTENT_TIMEOUT_SECS"), "WARMUP_CONTENT_TIMEOUT_SECS", 20)?,
            account_timeout: secs(lookup(vars, "WARMUP_ACCOUNT_TIMEOUT_SECS"), "WARMUP_ACCOUNT_TIMEOUT_SECS", 180)?,
            secret_key,
            content_api_url: lookup(vars, "WARMUP_CONTENT_API_URL")
                .unwrap_or("https://api.openai.com")
                .to_string(),
            content_api_key: lookup(vars, "WARMUP_CONTENT_API_KEY").map(String::from),
            content_model: lookup(vars, "WARMUP_CONTENT_MODEL")
                .unwrap_or("gpt-4.1-mini")
                .to_string(),
        })
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub fn flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_num(value: Option<&str>, key: &str, default: usize) -> Result<usize> {
    match value {
        Some(v) => v
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
        None => Ok(default),
    }
}

fn secs(value: Option<&str>, key: &str, default: u64) -> Result<Duration> {
    let n = parse_num(value, key, default as usize)?;
    if n == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_secs(n as u64))
}
