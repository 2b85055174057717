use mail_parser::MessageParser;

/// Header fields the scanner needs from a fetched message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub subject: Option<String>,
    pub from: Option<String>,
    /// Without angle brackets.
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn parse(raw: &[u8]) -> Self {
        let Some(msg) = MessageParser::default().parse(raw) else {
            return Self::default();
        };
        let from = msg
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            subject: msg.subject().map(|s| s.trim().to_string()),
            from,
            message_id: msg
                .message_id()
                .map(|s| s.trim().trim_matches(['<', '>']).to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}
