use crate::error::MirrorError;
use crate::mirror::audit;
use crate::mirror::config::{ExportFormat, MirrorConfig, load_config};
use crate::mirror::index::rebuild_index;
use crate::mirror::parser::parse_file;
use crate::mirror::paths::MirrorPaths;
use crate::mirror::render::{artifact_file_name, render_markdown, render_snapshot};
use crate::mirror::session::assemble;
use crate::mirror::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use fs2::FileExt;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, SystemTime};

pub const LOG_FILE_EXTENSION: &str = "jsonl";
pub const AGENT_FILE_PREFIX: &str = "agent-";
pub const DAEMON_LOCK_FILE: &str = "chat-mirror.daemon.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotLogFile,
    AgentFile,
    NotGrown,
    NoMessages,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotLogFile => "not a session log file",
            Self::AgentFile => "agent session file",
            Self::NotGrown => "no growth since last export",
            Self::NoMessages => "no capturable messages",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub session_id: String,
    pub project: String,
    pub message_count: usize,
    pub written: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Exported(ExportRecord),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    pub scanned: usize,
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The capture pipeline's only stateful component: owns the configuration,
/// the per-file progress map, and the watch loop. Constructed once at the
/// CLI composition point and handed to whichever command drives it.
pub struct CaptureEngine {
    paths: MirrorPaths,
    cfg: MirrorConfig,
    progress: BTreeMap<PathBuf, u64>,
    config_mtime: Option<SystemTime>,
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl CaptureEngine {
    pub fn new(paths: MirrorPaths, cfg: MirrorConfig) -> Self {
        let config_mtime = file_mtime(&paths.config_file);
        Self {
            paths,
            cfg,
            progress: BTreeMap::new(),
            config_mtime,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.cfg
    }

    /// Swap the stored settings in place. The running watch registration is
    /// deliberately not re-created; only future processing sees the change.
    pub fn update_config(&mut self, cfg: MirrorConfig) {
        self.cfg = cfg;
    }

    /// Create the output root, then check the source root. A missing source
    /// root is an operator warning, not an error: the engine must not enter
    /// the running state but nothing crashes.
    fn prepare(&self) -> Result<bool> {
        fs::create_dir_all(&self.cfg.output_root)
            .with_context(|| format!("failed to create {}", self.cfg.output_root.display()))?;

        if !self.cfg.source_root.is_dir() {
            warn::emit(WarnEvent {
                code: "SOURCE_ROOT_MISSING",
                stage: "startup",
                action: "watch",
                file: &self.cfg.source_root.display().to_string(),
                project: "",
                retry: "rerun-after-install",
                reason: "source-root-not-found",
                err: "",
            });
            let _ = audit::append_event(
                &self.paths,
                "watch",
                "degraded",
                &format!("source root not found: {}", self.cfg.source_root.display()),
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// One full capture cycle over every project directory. Returns `None`
    /// when the source root is missing and the engine never started.
    pub fn run_once(&mut self) -> Result<Option<ScanOutcome>> {
        if !self.prepare()? {
            return Ok(None);
        }
        Ok(Some(self.scan_all()))
    }

    /// Full directory sweep. Scan-level errors (unreadable root, racing
    /// deletes) swallow the cycle; the next poll tick retries.
    pub fn scan_all(&mut self) -> ScanOutcome {
        match self.try_scan() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "SCAN_FAILED",
                    stage: "capture",
                    action: "scan-all",
                    file: &self.cfg.source_root.display().to_string(),
                    project: "",
                    retry: "retry-next-cycle",
                    reason: "directory-scan-failed",
                    err: &format!("{err:#}"),
                });
                ScanOutcome::default()
            }
        }
    }

    fn try_scan(&mut self) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        let source_root = self.cfg.source_root.clone();
        let projects = fs::read_dir(&source_root)
            .with_context(|| format!("failed to read {}", source_root.display()))?;
        for project in projects {
            let project_dir = project?.path();
            if !project_dir.is_dir() {
                continue;
            }
            let files = fs::read_dir(&project_dir)
                .with_context(|| format!("failed to read {}", project_dir.display()))?;
            for file in files {
                let path = file?.path();
                if !path.is_file() {
                    continue;
                }
                outcome.scanned += 1;
                self.track_outcome(&path, &mut outcome);
            }
        }

        Ok(outcome)
    }

    fn track_outcome(&mut self, path: &Path, outcome: &mut ScanOutcome) {
        match self.process_file(path) {
            Ok(ProcessOutcome::Exported(_)) => outcome.exported += 1,
            Ok(ProcessOutcome::Skipped(_)) => outcome.skipped += 1,
            Err(err) => {
                outcome.failed += 1;
                self.report_failure(path, &err);
            }
        }
    }

    /// A failed file is logged and left alone; its progress record is not
    /// advanced, so the next growth or poll tick retries it. One bad file
    /// never affects another.
    fn report_failure(&self, path: &Path, err: &anyhow::Error) {
        let project = project_name(path);
        warn::emit(WarnEvent {
            code: "EXPORT_FAILED",
            stage: "capture",
            action: "process-file",
            file: &path.display().to_string(),
            project: &project,
            retry: "retry-next-cycle",
            reason: "process-file-failed",
            err: &format!("{err:#}"),
        });
        let _ = audit::append_event(
            &self.paths,
            "export",
            "degraded",
            &format!("file={} error={err:#}", path.display()),
        );
    }

    /// Process one session log: gate on name and growth, re-parse the whole
    /// current content, and regenerate every enabled artifact plus the
    /// project index. Progress is advanced only after every enabled format
    /// has been written.
    pub fn process_file(&mut self, path: &Path) -> Result<ProcessOutcome> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_FILE_EXTENSION) {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotLogFile));
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotLogFile));
        };
        if file_name.starts_with(AGENT_FILE_PREFIX) {
            return Ok(ProcessOutcome::Skipped(SkipReason::AgentFile));
        }

        let size = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let recorded = self.progress.get(path).copied().unwrap_or(0);
        if size <= recorded {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotGrown));
        }

        // Whole-file re-read on every growth: dedup is content-keyed and
        // the output name is deterministic, so re-deriving the session is
        // safe and far simpler than resuming a byte offset.
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let session = assemble(path, parse_file(&content));
        if session.is_empty() {
            // Progress stays put: a file with no capturable content yet is
            // retried on its next growth, never marked done.
            return Ok(ProcessOutcome::Skipped(SkipReason::NoMessages));
        }
        let project = project_name(path);
        let project_dir = self.cfg.output_root.join(&project);
        fs::create_dir_all(&project_dir)
            .with_context(|| format!("failed to create {}", project_dir.display()))?;

        let mut written = Vec::new();
        for format in &self.cfg.export.formats {
            let target = project_dir.join(artifact_file_name(&session, *format));
            let rendered = match format {
                ExportFormat::Markdown => render_markdown(&session),
                ExportFormat::Json => serde_json::to_string_pretty(&render_snapshot(&session))?,
            };
            fs::write(&target, rendered)
                .with_context(|| format!("failed to write {}", target.display()))?;
            written.push(target);
        }

        self.progress.insert(path.to_path_buf(), size);

        if let Err(err) = rebuild_index(&project_dir) {
            warn::emit(WarnEvent {
                code: "INDEX_REBUILD_FAILED",
                stage: "capture",
                action: "rebuild-index",
                file: &path.display().to_string(),
                project: &project,
                retry: "retry-next-export",
                reason: "index-rebuild-failed",
                err: &format!("{err:#}"),
            });
        }

        let record = ExportRecord {
            session_id: session.session_id.clone(),
            project,
            message_count: session.messages.len(),
            written,
        };
        audit::append_event(
            &self.paths,
            "export",
            "ok",
            &format!(
                "session={} project={} messages={} files={}",
                record.session_id,
                record.project,
                record.message_count,
                record
                    .written
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        )?;

        Ok(ProcessOutcome::Exported(record))
    }

    fn handle_event(&mut self, event: &Event) {
        // Deletions are never mirrored; exports outlive their source.
        if matches!(event.kind, EventKind::Remove(_)) {
            return;
        }
        let mut outcome = ScanOutcome::default();
        for path in &event.paths {
            if !path.is_file() {
                continue;
            }
            outcome.scanned += 1;
            self.track_outcome(path, &mut outcome);
        }
    }

    fn reload_config_if_changed(&mut self) {
        let current = file_mtime(&self.paths.config_file);
        if current == self.config_mtime {
            return;
        }
        self.config_mtime = current;
        match load_config(&self.paths) {
            Ok(cfg) => {
                self.update_config(cfg);
                let _ = audit::append_event(&self.paths, "config", "ok", "configuration reloaded");
            }
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "CONFIG_RELOAD_FAILED",
                    stage: "watch",
                    action: "reload-config",
                    file: &self.paths.config_file.display().to_string(),
                    project: "",
                    retry: "retry-next-tick",
                    reason: "config-reload-failed",
                    err: &format!("{err:#}"),
                });
            }
        }
    }

    fn acquire_daemon_lock(&self) -> Result<fs::File> {
        fs::create_dir_all(&self.paths.logs_dir)
            .with_context(|| format!("failed to create {}", self.paths.logs_dir.display()))?;
        let lock_path = self.paths.logs_dir.join(DAEMON_LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(
                MirrorError::DaemonAlreadyRunning(lock_path.display().to_string()).into(),
            );
        }
        file.set_len(0)
            .with_context(|| format!("failed to truncate {}", lock_path.display()))?;
        writeln!(&file, "{}", std::process::id())
            .with_context(|| format!("failed to write pid to {}", lock_path.display()))?;
        Ok(file)
    }

    /// Long-running watch loop: filesystem notifications and the poll timer
    /// drain through one channel, so all per-file processing is serialized
    /// on this thread and the progress map needs no locking. Returns
    /// `Ok(false)` when the source root was missing and the engine never
    /// entered the running state.
    pub fn run_daemon(&mut self) -> Result<bool> {
        let _lock = self.acquire_daemon_lock()?;

        if !self.prepare()? {
            return Ok(false);
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .context("failed to create filesystem watcher")?;
        watcher
            .watch(&self.cfg.source_root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", self.cfg.source_root.display()))?;

        audit::append_event(
            &self.paths,
            "watch",
            "ok",
            &format!(
                "started source={} output={} poll_interval_secs={}",
                self.cfg.source_root.display(),
                self.cfg.output_root.display(),
                self.cfg.watcher.poll_interval_secs
            ),
        )?;

        // Capture pre-existing files immediately; the loop below only sees
        // future changes and poll ticks.
        self.scan_all();

        loop {
            let poll = Duration::from_secs(self.cfg.watcher.poll_interval_secs);
            match rx.recv_timeout(poll) {
                Ok(Ok(event)) => self.handle_event(&event),
                Ok(Err(err)) => {
                    warn::emit(WarnEvent {
                        code: "WATCH_EVENT_FAILED",
                        stage: "watch",
                        action: "receive-event",
                        file: "",
                        project: "",
                        retry: "poll-covers-missed-events",
                        reason: "notify-error",
                        err: &err.to_string(),
                    });
                }
                // The notification mechanism is allowed to miss events;
                // the timer tick rescans everything as a safety net.
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.reload_config_if_changed();
                    self.scan_all();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        audit::append_event(&self.paths, "watch", "ok", "stopped")?;
        Ok(true)
    }
}

fn project_name(path: &Path) -> String {
    path.parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::config::{ExportSettings, WatcherSettings};
    use tempfile::{TempDir, tempdir};

    const USER_LINE: &str = r#"{"type":"user","message":{"role":"user","content":[{"type":"text","text":"Hello"}]},"uuid":"a1","timestamp":"2024-01-01T10:00:00Z","sessionId":"s-123"}"#;
    const ASSISTANT_LINE: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Hi there"}]},"uuid":"a2","timestamp":"2024-01-01T10:00:05Z","sessionId":"s-123"}"#;

    struct Fixture {
        _tmp: TempDir,
        engine: CaptureEngine,
        source_root: PathBuf,
        output_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().expect("tempdir");
        let source_root = tmp.path().join("projects");
        let output_root = tmp.path().join("exports");
        let mirror_home = tmp.path().join("home");
        fs::create_dir_all(&source_root).expect("mkdir source");

        let paths = MirrorPaths {
            mirror_home: mirror_home.clone(),
            config_file: mirror_home.join("config.toml"),
            logs_dir: mirror_home.join("logs"),
            default_source_root: source_root.clone(),
            default_output_root: output_root.clone(),
        };
        let cfg = MirrorConfig {
            source_root: source_root.clone(),
            output_root: output_root.clone(),
            watcher: WatcherSettings::default(),
            export: ExportSettings::default(),
        };

        Fixture {
            engine: CaptureEngine::new(paths, cfg),
            source_root,
            output_root,
            _tmp: tmp,
        }
    }

    fn write_session(fixture: &Fixture, project: &str, file: &str, content: &str) -> PathBuf {
        let dir = fixture.source_root.join(project);
        fs::create_dir_all(&dir).expect("mkdir project");
        let path = dir.join(file);
        fs::write(&path, content).expect("write session log");
        path
    }

    #[test]
    fn exports_markdown_snapshot_and_index_for_one_session() {
        let mut fx = fixture();
        let path = write_session(
            &fx,
            "proj-a",
            "s-123.jsonl",
            &format!("{USER_LINE}\n{ASSISTANT_LINE}\n"),
        );

        let outcome = fx.engine.process_file(&path).expect("process");
        let ProcessOutcome::Exported(record) = outcome else {
            panic!("expected export");
        };
        assert_eq!(record.session_id, "s-123");
        assert_eq!(record.project, "proj-a");
        assert_eq!(record.message_count, 2);

        let md = fx.output_root.join("proj-a").join("2024-01-01_s-123.md");
        let json = fx.output_root.join("proj-a").join("2024-01-01_s-123.json");
        let index = fx.output_root.join("proj-a").join("_index.md");
        assert!(md.is_file());
        assert!(json.is_file());
        assert!(index.is_file());

        let transcript = fs::read_to_string(&md).expect("read transcript");
        assert!(transcript.contains("Hello"));
        assert!(transcript.contains("Hi there"));
        let user = transcript.find("## 👤 Kullanıcı").expect("user section");
        let assistant = transcript.find("## 🤖 Claude").expect("assistant section");
        assert!(user < assistant);

        let snapshot = fs::read_to_string(&json).expect("read snapshot");
        assert!(snapshot.contains("\"messageCount\": 2"));
        assert!(snapshot.contains("\"version\": \"1.0\""));

        let listing = fs::read_to_string(&index).expect("read index");
        assert!(listing.contains("**Toplam Konuşma:** 1"));
    }

    #[test]
    fn second_call_without_growth_does_no_export_work() {
        let mut fx = fixture();
        let path = write_session(&fx, "proj-a", "s-123.jsonl", &format!("{USER_LINE}\n"));

        let first = fx.engine.process_file(&path).expect("first");
        assert!(matches!(first, ProcessOutcome::Exported(_)));

        // Remove the artifact: if the second call did any export work it
        // would reappear.
        let md = fx.output_root.join("proj-a").join("2024-01-01_s-123.md");
        fs::remove_file(&md).expect("remove artifact");

        let second = fx.engine.process_file(&path).expect("second");
        assert!(matches!(
            second,
            ProcessOutcome::Skipped(SkipReason::NotGrown)
        ));
        assert!(!md.exists());
    }

    #[test]
    fn growth_triggers_a_fresh_export() {
        let mut fx = fixture();
        let path = write_session(&fx, "proj-a", "s-123.jsonl", &format!("{USER_LINE}\n"));

        let first = fx.engine.process_file(&path).expect("first");
        assert!(matches!(first, ProcessOutcome::Exported(_)));

        fs::write(&path, format!("{USER_LINE}\n{ASSISTANT_LINE}\n")).expect("grow file");
        let second = fx.engine.process_file(&path).expect("second");
        let ProcessOutcome::Exported(record) = second else {
            panic!("expected re-export after growth");
        };
        assert_eq!(record.message_count, 2);
    }

    #[test]
    fn shrunken_file_stays_ignored_until_it_grows_past_the_old_mark() {
        let mut fx = fixture();
        let path = write_session(
            &fx,
            "proj-a",
            "s-123.jsonl",
            &format!("{USER_LINE}\n{ASSISTANT_LINE}\n"),
        );
        let first = fx.engine.process_file(&path).expect("first");
        assert!(matches!(first, ProcessOutcome::Exported(_)));

        fs::write(&path, format!("{USER_LINE}\n")).expect("truncate");
        let second = fx.engine.process_file(&path).expect("second");
        assert!(matches!(
            second,
            ProcessOutcome::Skipped(SkipReason::NotGrown)
        ));
    }

    #[test]
    fn agent_files_and_foreign_extensions_are_skipped() {
        let mut fx = fixture();
        let agent = write_session(&fx, "proj-a", "agent-s-1.jsonl", USER_LINE);
        let other = write_session(&fx, "proj-a", "notes.txt", "hello");

        let agent_outcome = fx.engine.process_file(&agent).expect("agent");
        assert!(matches!(
            agent_outcome,
            ProcessOutcome::Skipped(SkipReason::AgentFile)
        ));

        let other_outcome = fx.engine.process_file(&other).expect("other");
        assert!(matches!(
            other_outcome,
            ProcessOutcome::Skipped(SkipReason::NotLogFile)
        ));
    }

    #[test]
    fn file_without_messages_is_retried_not_marked_done() {
        let mut fx = fixture();
        let path = write_session(&fx, "proj-a", "s-123.jsonl", "{\"type\":\"system\"}\nnot json\n");

        let first = fx.engine.process_file(&path).expect("first");
        assert!(matches!(
            first,
            ProcessOutcome::Skipped(SkipReason::NoMessages)
        ));

        // Progress must not have advanced: the same unchanged file is
        // re-read on the next cycle rather than gated out as NotGrown.
        let second = fx.engine.process_file(&path).expect("second");
        assert!(matches!(
            second,
            ProcessOutcome::Skipped(SkipReason::NoMessages)
        ));
    }

    #[test]
    fn reexport_after_progress_reset_is_byte_identical() {
        let mut fx = fixture();
        let path = write_session(
            &fx,
            "proj-a",
            "s-123.jsonl",
            &format!("{USER_LINE}\n{ASSISTANT_LINE}\n"),
        );

        fx.engine.process_file(&path).expect("first export");
        let md = fx.output_root.join("proj-a").join("2024-01-01_s-123.md");
        let first_bytes = fs::read(&md).expect("read first");

        // A fresh engine simulates a restart: all progress records lost.
        let mut restarted = CaptureEngine::new(fx.engine.paths.clone(), fx.engine.cfg.clone());
        let outcome = restarted.process_file(&path).expect("re-export");
        assert!(matches!(outcome, ProcessOutcome::Exported(_)));
        let second_bytes = fs::read(&md).expect("read second");

        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn scan_covers_pre_existing_files_and_counts_outcomes() {
        let mut fx = fixture();
        write_session(&fx, "proj-a", "s-123.jsonl", &format!("{USER_LINE}\n"));
        write_session(&fx, "proj-a", "agent-x.jsonl", USER_LINE);
        write_session(&fx, "proj-b", "empty.jsonl", "\n");

        let outcome = fx.engine.scan_all();
        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn run_once_reports_missing_source_root_without_failing() {
        let mut fx = fixture();
        fs::remove_dir_all(&fx.source_root).expect("remove source root");

        let outcome = fx.engine.run_once().expect("run once");
        assert!(outcome.is_none());
    }

    #[test]
    fn update_config_hot_swaps_settings() {
        let mut fx = fixture();
        let mut cfg = fx.engine.config().clone();
        cfg.export.formats = vec![ExportFormat::Markdown];
        fx.engine.update_config(cfg);

        let path = write_session(&fx, "proj-a", "s-123.jsonl", &format!("{USER_LINE}\n"));
        fx.engine.process_file(&path).expect("process");

        assert!(fx.output_root.join("proj-a").join("2024-01-01_s-123.md").is_file());
        assert!(!fx.output_root.join("proj-a").join("2024-01-01_s-123.json").exists());
    }
}
