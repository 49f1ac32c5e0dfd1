use crate::mirror::parser::Message;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Aggregate of every captured message from one session log file.
///
/// `start_time`/`end_time` are `None` exactly when `messages` is empty;
/// such a session is never persisted by the engine.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub project_path: String,
    pub messages: Vec<Message>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Group an ordered message sequence into a [`Session`]. Never fails; an
/// empty input yields an empty session the caller must treat as "nothing
/// to export".
pub fn assemble(source_path: &Path, messages: Vec<Message>) -> Session {
    let first_id = messages
        .first()
        .map(|m| m.session_id.as_str())
        .filter(|id| !id.is_empty());

    let session_id = first_id.unwrap_or("unknown").to_string();
    // Kept from the source format: the "project path" aliases the session
    // id whenever one is present, and only falls back to the file path.
    let project_path = first_id
        .map(str::to_string)
        .unwrap_or_else(|| source_path.display().to_string());

    let start_time = messages.iter().map(|m| m.timestamp).min();
    let end_time = messages.iter().map(|m| m.timestamp).max();

    Session {
        session_id,
        project_path,
        messages,
        start_time,
        end_time,
    }
}
