use crate::mirror::render::{ASSISTANT_SECTION_LABEL, USER_SECTION_LABEL};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE_NAME: &str = "_index.md";

const TOPIC_MAX_CHARS: usize = 60;
const TOPIC_TRUNCATED_CHARS: usize = 57;
const TOPIC_FALLBACK: &str = "Konuşma";

#[derive(Debug, Clone)]
struct IndexEntry {
    date: String,
    short_session_id: String,
    topic: String,
    message_count: usize,
    file_name: String,
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub index_path: PathBuf,
    pub sessions: usize,
}

fn extract_between<'a>(content: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = content.find(prefix)? + prefix.len();
    let rest = &content[start..];
    let end = rest.find(suffix)?;
    Some(&rest[..end])
}

/// Remove complete `<...>` tag spans; an unterminated `<` is left as-is.
fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open + 1..].find('>') {
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
            Some(0) => {
                out.push_str("<>");
                rest = &rest[open + 2..];
            }
            Some(close) => {
                rest = &rest[open + close + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn truncate_topic(topic: &str) -> String {
    if topic.chars().count() > TOPIC_MAX_CHARS {
        let mut out: String = topic.chars().take(TOPIC_TRUNCATED_CHARS).collect();
        out.push_str("...");
        out
    } else {
        topic.to_string()
    }
}

/// The topic is the first body line of the first user section: header line,
/// one blank line, then the line we want.
fn first_user_topic(content: &str) -> Option<String> {
    let marker = format!("{USER_SECTION_LABEL} (");
    let start = content.find(&marker)?;
    let rest = &content[start..];
    let line_end = rest.find('\n')?;
    let after_header = rest[line_end + 1..].strip_prefix('\n')?;
    let body_line = after_header.lines().next()?;
    Some(truncate_topic(strip_tags(body_line).trim()))
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.match_indices(needle).count()
}

fn leading_date(file_name: &str) -> Option<&str> {
    let candidate = file_name.get(..10)?;
    let bytes = candidate.as_bytes();
    let shaped = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    shaped.then_some(candidate)
}

/// Recover an index entry by scraping one rendered transcript. The date
/// comes from the artifact's file name, everything else from its content.
fn scrape_entry(file_name: &str, content: &str) -> IndexEntry {
    let session_id = extract_between(content, "**Session ID:** `", "`").unwrap_or("unknown");
    let short_session_id: String = session_id.chars().take(8).collect();

    let topic = first_user_topic(content).unwrap_or_else(|| TOPIC_FALLBACK.to_string());

    let user_count = count_occurrences(content, USER_SECTION_LABEL);
    let assistant_count = count_occurrences(content, ASSISTANT_SECTION_LABEL);

    IndexEntry {
        date: leading_date(file_name).unwrap_or("unknown").to_string(),
        short_session_id,
        topic,
        message_count: user_count + assistant_count,
        file_name: file_name.to_string(),
    }
}

fn render_index(project_name: &str, entries: &[IndexEntry]) -> String {
    let mut out = String::new();
    out.push_str("# Konuşma Geçmişi\n\n");
    out.push_str(&format!("**Proje:** `{project_name}`\n"));
    out.push_str(&format!("**Toplam Konuşma:** {}\n\n", entries.len()));
    out.push_str("---\n\n");
    out.push_str("| Tarih | Konu | Mesaj | Dosya |\n");
    out.push_str("|-------|------|-------|-------|\n");

    for entry in entries {
        out.push_str(&format!(
            "| {} | {} | {} | [{}.md]({}) |\n",
            entry.date, entry.topic, entry.message_count, entry.short_session_id, entry.file_name
        ));
    }

    out.push_str("\n---\n\n");
    out.push_str(&format!(
        "*Bu dosya otomatik oluşturulmuştur. Son güncelleme: {}*\n",
        Local::now().format("%d.%m.%Y %H:%M:%S")
    ));
    out
}

/// Rebuild the project's `_index.md` wholesale from the transcripts already
/// written into `project_output_dir`. Always a full rebuild, never a patch.
pub fn rebuild_index(project_output_dir: &Path) -> Result<IndexOutcome> {
    let mut entries = Vec::new();

    let read_dir = fs::read_dir(project_output_dir)
        .with_context(|| format!("failed to read {}", project_output_dir.display()))?;
    for entry in read_dir {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".md") || name == INDEX_FILE_NAME {
            continue;
        }
        // Unreadable artifact: drop it from this rebuild, the next one
        // will pick it up again.
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        entries.push(scrape_entry(name, &content));
    }

    entries.sort_by(|a, b| b.date.cmp(&a.date));

    let project_name = project_output_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let rendered = render_index(project_name, &entries);

    let index_path = project_output_dir.join(INDEX_FILE_NAME);
    fs::write(&index_path, rendered)
        .with_context(|| format!("failed to write {}", index_path.display()))?;

    Ok(IndexOutcome {
        index_path,
        sessions: entries.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn transcript(session_id: &str, topic_line: &str, assistant_sections: usize) -> String {
        let mut out = String::new();
        out.push_str("# Claude Konuşması\n\n");
        out.push_str("**Tarih:** 1 Ocak 2024\n");
        out.push_str(&format!("**Session ID:** `{session_id}`\n\n"));
        out.push_str("---\n\n");
        out.push_str(&format!("## 👤 Kullanıcı (10:00:00)\n\n{topic_line}\n\n---\n\n"));
        for _ in 0..assistant_sections {
            out.push_str("## 🤖 Claude (10:00:05)\n\nHi there\n\n---\n\n");
        }
        out
    }

    #[test]
    fn strip_tags_removes_complete_spans_only() {
        assert_eq!(strip_tags("a <b>c</b> d"), "a c d");
        assert_eq!(strip_tags("no tags"), "no tags");
        assert_eq!(strip_tags("dangling < here"), "dangling < here");
        assert_eq!(strip_tags("empty <> stays"), "empty <> stays");
    }

    #[test]
    fn topic_is_truncated_past_sixty_chars() {
        let long = "x".repeat(80);
        let truncated = truncate_topic(&long);
        assert_eq!(truncated.chars().count(), TOPIC_TRUNCATED_CHARS + 3);
        assert!(truncated.ends_with("..."));

        let short = "short topic";
        assert_eq!(truncate_topic(short), short);
    }

    #[test]
    fn leading_date_requires_iso_shape() {
        assert_eq!(leading_date("2024-01-01_s-123.md"), Some("2024-01-01"));
        assert_eq!(leading_date("notadate_s-123.md"), None);
        assert_eq!(leading_date("2024_01_01.md"), None);
        assert_eq!(leading_date("x.md"), None);
    }

    #[test]
    fn scrape_recovers_id_topic_and_counts() {
        let content = transcript("s-123456789", "Fix the <b>parser</b> bug", 2);
        let entry = scrape_entry("2024-01-01_s-123456.md", &content);
        assert_eq!(entry.date, "2024-01-01");
        assert_eq!(entry.short_session_id, "s-123456");
        assert_eq!(entry.topic, "Fix the parser bug");
        assert_eq!(entry.message_count, 3);
        assert_eq!(entry.file_name, "2024-01-01_s-123456.md");
    }

    #[test]
    fn scrape_falls_back_when_sections_are_missing() {
        let entry = scrape_entry("weird.md", "just some text\n");
        assert_eq!(entry.date, "unknown");
        assert_eq!(entry.short_session_id, "unknown");
        assert_eq!(entry.topic, TOPIC_FALLBACK);
        assert_eq!(entry.message_count, 0);
    }

    #[test]
    fn rebuild_sorts_newest_first_and_counts_sessions() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("2024-01-01_aaaa.md"),
            transcript("aaaa", "older conversation", 1),
        )
        .expect("write older");
        fs::write(
            dir.path().join("2024-02-01_bbbb.md"),
            transcript("bbbb", "newer conversation", 1),
        )
        .expect("write newer");

        let outcome = rebuild_index(dir.path()).expect("rebuild");
        assert_eq!(outcome.sessions, 2);

        let index = fs::read_to_string(outcome.index_path).expect("read index");
        assert!(index.contains("**Toplam Konuşma:** 2"));
        let newer = index.find("2024-02-01").expect("newer entry");
        let older = index.find("2024-01-01").expect("older entry");
        assert!(newer < older);
    }

    #[test]
    fn rebuild_excludes_the_index_file_itself() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("2024-01-01_aaaa.md"),
            transcript("aaaa", "a conversation", 1),
        )
        .expect("write transcript");

        let first = rebuild_index(dir.path()).expect("first rebuild");
        assert_eq!(first.sessions, 1);
        let second = rebuild_index(dir.path()).expect("second rebuild");
        assert_eq!(second.sessions, 1);
    }
}
