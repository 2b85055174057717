//! Correlation tokens embedded in every warmup message body.

use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;

pub const TOKEN_BYTES: usize = 8;
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Marker written in front of the token on the trailing reference line.
pub const REFERENCE_PREFIX: &str = "Ref:";

static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bRef:[ \t]*([0-9a-f]{16})\b").expect("static regex"));
static BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9a-f]{16})\b").expect("static regex"));

pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Append the token on its own delimited line so it survives quoting and
/// re-wrapping by the receiving provider.
pub fn append_reference(body: &str, token: &str) -> String {
    format!("{}\n\n--\n{} {}\n", body.trim_end(), REFERENCE_PREFIX, token)
}

/// Find the token in a raw message. The reference line wins; otherwise the
/// first standalone run of exactly 16 lowercase hex characters.
pub fn extract(raw: &str) -> Option<String> {
    REFERENCE_RE
        .captures(raw)
        .or_else(|| BARE_RE.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}
