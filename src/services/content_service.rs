use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Characters of the original raw message handed to the reply prompt.
pub const REPLY_CONTEXT_CHARS: usize = 1500;
const MAX_SUBJECT_CHARS: usize = 120;
const MAX_BODY_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You write short, friendly, plain-text emails between colleagues. \
    Never include links, attachments, signatures, placeholders or markdown.";

/// Text generator behind the composer. Errors and empty output are expected;
/// the composer always has a fallback.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ChatMessage {
    role: Role,
    content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiContent {
    client: reqwest::Client,
    api_hostname: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiContent {
    pub fn new(api_hostname: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_hostname: api_hostname.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    async fn completion(&self, messages: &[ChatMessage]) -> Result<Value> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.9,
        });
        let url = format!("{}/v1/chat/completions", self.api_hostname.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl ContentGenerator for OpenAiContent {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, prompt),
        ];
        let resp = self.completion(&messages).await?;
        resp["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("completion response had no message content"))
    }
}

/// Used when no API key is configured: every request falls back.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticContent;

#[async_trait]
impl ContentGenerator for StaticContent {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(anyhow!("content generation disabled"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Subject,
    Body,
    Reply,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Subject => "subject",
            Kind::Body => "body",
            Kind::Reply => "reply",
        }
    }
}

const FALLBACK_SUBJECTS: &[&str] = &[
    "Quick check-in",
    "Following up on last week",
    "Notes from our chat",
    "A small question",
    "Catching up",
];

const FALLBACK_BODIES: &[&str] = &[
    "Hi,\n\nJust wanted to check in and see how things are going on your side. \
     Let me know if there is anything I can help with this week.\n\nThanks",
    "Hello,\n\nI went through the notes from our last conversation and everything \
     looks good so far. Happy to pick it up again whenever suits you.\n\nBest",
    "Hi there,\n\nHope your week is off to a good start. I had a quick question \
     about the schedule, nothing urgent, so reply whenever you get a moment.\n\nCheers",
];

const FALLBACK_REPLIES: &[&str] = &[
    "Thanks for the message, good to hear from you. All looks fine on my end, \
     I will follow up shortly.",
    "Thanks, got it. I will take a look and get back to you soon.",
    "Appreciate the update. Sounds good to me, talk soon.",
];

/// Picks a fallback from `options` by a checksum of `seed`, so the same
/// input always yields the same text.
fn fallback(options: &[&'static str], seed: &str) -> &'static str {
    let sum = seed.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    options[sum % options.len()]
}

/// Longest prefix of `s` with at most `max_chars` characters.
pub fn bounded_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn strip_wrapping(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix("```").and_then(|r| r.strip_suffix("```")).unwrap_or(s).trim();
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim()
}

pub fn sanitize_subject(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .strip_prefix("Subject:")
        .or_else(|| line.strip_prefix("subject:"))
        .unwrap_or(line);
    let line = strip_wrapping(line);
    if line.is_empty() {
        return None;
    }
    Some(bounded_prefix(line, MAX_SUBJECT_CHARS).to_string())
}

pub fn sanitize_body(raw: &str) -> Option<String> {
    let body = strip_wrapping(raw);
    if body.is_empty() {
        return None;
    }
    let body = body.replace("\r\n", "\n");
    Some(bounded_prefix(&body, MAX_BODY_CHARS).trim_end().to_string())
}

/// `Re: ` exactly once.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Wraps a generator with a timeout, output cleanup and deterministic
/// fallbacks. Never fails.
#[derive(Clone)]
pub struct Composer {
    generator: Arc<dyn ContentGenerator>,
    timeout: Duration,
}

impl Composer {
    pub fn new(generator: Arc<dyn ContentGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn offline() -> Self {
        Self::new(Arc::new(StaticContent), Duration::from_secs(1))
    }

    pub async fn subject(&self, from: &str, to: &str) -> String {
        let prompt = format!(
            "Write a short, natural email subject line (under 8 words) for a casual note \
             from {from} to {to}. Reply with the subject only."
        );
        let seed = format!("{from}{to}");
        match self.ask(Kind::Subject, &prompt).await.as_deref().and_then(sanitize_subject) {
            Some(subject) => subject,
            None => fallback(FALLBACK_SUBJECTS, &seed).to_string(),
        }
    }

    pub async fn body(&self, from: &str, to: &str) -> String {
        let prompt = format!(
            "Write a brief, friendly plain-text email (2 to 4 sentences) from {from} to {to}. \
             Reply with the body only, no subject line."
        );
        let seed = format!("{to}{from}");
        match self.ask(Kind::Body, &prompt).await.as_deref().and_then(sanitize_body) {
            Some(body) => body,
            None => fallback(FALLBACK_BODIES, &seed).to_string(),
        }
    }

    /// `original` is the raw message being answered; only a bounded prefix is
    /// sent to the generator.
    pub async fn reply(&self, original: &str) -> String {
        let context = bounded_prefix(original, REPLY_CONTEXT_CHARS);
        let prompt = format!(
            "Write a short, friendly plain-text reply (1 to 3 sentences) to this email. \
             Reply with the body only.\n\n{context}"
        );
        match self.ask(Kind::Reply, &prompt).await.as_deref().and_then(sanitize_body) {
            Some(reply) => reply,
            None => fallback(FALLBACK_REPLIES, context).to_string(),
        }
    }

    async fn ask(&self, kind: Kind, prompt: &str) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                debug!(kind = kind.as_str(), error = %e, "content generation failed, using fallback");
                None
            }
            Err(_) => {
                warn!(kind = kind.as_str(), timeout_secs = self.timeout.as_secs(), "content generation timed out, using fallback");
                None
            }
        }
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}
