use crate::mirror::config::ExportFormat;
use crate::mirror::parser::MessageKind;
use crate::mirror::session::Session;
use chrono::{DateTime, Datelike, Local, SecondsFormat, Utc};
use serde::Serialize;

pub const SNAPSHOT_VERSION: &str = "1.0";
pub const USER_SECTION_LABEL: &str = "## 👤 Kullanıcı";
pub const ASSISTANT_SECTION_LABEL: &str = "## 🤖 Claude";

const TURKISH_MONTHS: [&str; 12] = [
    "Ocak", "Şubat", "Mart", "Nisan", "Mayıs", "Haziran", "Temmuz", "Ağustos", "Eylül", "Ekim",
    "Kasım", "Aralık",
];

fn session_start(session: &Session) -> DateTime<Utc> {
    session.start_time.unwrap_or(DateTime::UNIX_EPOCH)
}

fn turkish_long_date(at: DateTime<Utc>) -> String {
    let local = at.with_timezone(&Local);
    format!(
        "{} {} {}",
        local.day(),
        TURKISH_MONTHS[local.month0() as usize],
        local.year()
    )
}

fn clock_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn iso_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render the human-readable transcript. The Turkish surface strings are
/// part of the published output format (the index scraper keys on them)
/// and must stay byte-for-byte stable.
pub fn render_markdown(session: &Session) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Claude Konuşması".to_string());
    lines.push(String::new());
    lines.push(format!(
        "**Tarih:** {}",
        turkish_long_date(session_start(session))
    ));
    lines.push(format!("**Session ID:** `{}`", session.session_id));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    for message in &session.messages {
        let label = match message.kind {
            MessageKind::User => "👤 Kullanıcı",
            MessageKind::Assistant => "🤖 Claude",
        };

        lines.push(format!("## {} ({})", label, clock_time(message.timestamp)));
        lines.push(String::new());
        lines.push(message.content.clone());
        lines.push(String::new());

        if let Some(reasoning) = &message.reasoning {
            lines.push("<details>".to_string());
            lines.push("<summary>💭 Düşünce Süreci</summary>".to_string());
            lines.push(String::new());
            lines.push(reasoning.clone());
            lines.push(String::new());
            lines.push("</details>".to_string());
            lines.push(String::new());
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub id: String,
    #[serde(rename = "projectPath")]
    pub project_path: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub timestamp: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub session: SnapshotSummary,
    pub messages: Vec<SnapshotMessage>,
}

/// Build the structured snapshot of a session. Everything but
/// `exported_at` derives from the session itself.
pub fn render_snapshot(session: &Session) -> SessionSnapshot {
    SessionSnapshot {
        version: SNAPSHOT_VERSION.to_string(),
        exported_at: iso_instant(Utc::now()),
        session: SnapshotSummary {
            id: session.session_id.clone(),
            project_path: session.project_path.clone(),
            start_time: iso_instant(session_start(session)),
            end_time: iso_instant(session.end_time.unwrap_or(DateTime::UNIX_EPOCH)),
            message_count: session.messages.len(),
        },
        messages: session
            .messages
            .iter()
            .map(|message| SnapshotMessage {
                kind: message.kind.as_str().to_string(),
                content: message.content.clone(),
                thinking: message.reasoning.clone(),
                timestamp: iso_instant(message.timestamp),
                uuid: message.id.clone(),
            })
            .collect(),
    }
}

/// Canonical artifact name: derived only from the session's start date
/// (UTC) and the first 8 characters of the session id, so repeated renders
/// of the same session always land on the same file.
pub fn artifact_file_name(session: &Session, format: ExportFormat) -> String {
    let date = session_start(session).format("%Y-%m-%d");
    let short_id: String = session.session_id.chars().take(8).collect();
    format!("{date}_{short_id}.{}", format.extension())
}
