use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Number of leading content characters that join the message id to form
/// the deduplication key. Source logs re-emit a growing message as whole
/// lines sharing one id; the prefix keeps genuinely distinct messages
/// with a colliding id apart.
pub const DEDUP_PREFIX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Assistant,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One normalized conversation turn. Never constructed with both `content`
/// and `reasoning` empty.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub role: Option<String>,
    pub content: String,
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<RawPayload>,
    uuid: Option<String>,
    timestamp: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    role: Option<String>,
    content: Option<Vec<RawPart>>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    thinking: Option<String>,
}

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    // Magnitudes this large can only be millisecond precision.
    if raw.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let Some(value) = value else {
        return Utc::now();
    };
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| raw.trim().parse::<i64>().ok().and_then(epoch_to_datetime))
            .unwrap_or_else(Utc::now),
        Value::Number(n) => n
            .as_i64()
            .and_then(epoch_to_datetime)
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

/// Normalize one raw JSONL line into a [`Message`].
///
/// Returns `None` for blank lines, lines that are not valid JSON, record
/// types other than `user`/`assistant`, records without a content payload,
/// and records whose parts carry neither text nor thinking. None of these
/// are errors; a corrupt line never aborts its file.
pub fn parse_line(line: &str) -> Option<Message> {
    if line.trim().is_empty() {
        return None;
    }

    let record: RawRecord = serde_json::from_str(line).ok()?;

    let kind = match record.kind.as_deref() {
        Some("user") => MessageKind::User,
        Some("assistant") => MessageKind::Assistant,
        _ => return None,
    };

    let payload = record.message?;
    let parts = payload.content?;

    let mut content = String::new();
    let mut reasoning: Option<String> = None;
    for part in &parts {
        match part.kind.as_deref() {
            Some("text") => {
                if let Some(text) = part.text.as_deref() {
                    content.push_str(text);
                }
            }
            Some("thinking") => {
                // Last thinking part wins; in practice at most one occurs.
                if let Some(thinking) = part.thinking.as_deref() {
                    if !thinking.is_empty() {
                        reasoning = Some(thinking.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if content.is_empty() && reasoning.is_none() {
        return None;
    }

    Some(Message {
        kind,
        role: payload.role,
        content,
        reasoning,
        timestamp: parse_timestamp(record.timestamp.as_ref()),
        id: record.uuid.unwrap_or_default(),
        session_id: record.session_id.unwrap_or_default(),
    })
}

/// Parse a whole session log, in file order, deduplicated.
///
/// The dedup key is `(id, first 50 chars of content)` and the first
/// occurrence wins. Reasoning-only messages parse fine but carry no
/// visible content and are excluded from the transcript.
pub fn parse_file(content: &str) -> Vec<Message> {
    let mut seen = BTreeSet::new();
    let mut messages = Vec::new();

    for line in content.lines() {
        let Some(message) = parse_line(line) else {
            continue;
        };
        if message.content.is_empty() {
            continue;
        }
        let prefix: String = message.content.chars().take(DEDUP_PREFIX_CHARS).collect();
        let key = format!("{}-{}", message.id, prefix);
        if !seen.insert(key) {
            continue;
        }
        messages.push(message);
    }

    messages
}
