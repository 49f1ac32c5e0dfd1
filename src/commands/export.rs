use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::mirror::config::load_config;
use crate::mirror::engine::{CaptureEngine, ProcessOutcome};
use crate::mirror::paths::resolve_paths;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub file: PathBuf,
}

/// One-shot export of a single session log, without starting the watcher.
pub fn run(opts: &ExportOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("export");
    report.detail(format!("file={}", opts.file.display()));

    if !opts.file.is_file() {
        report.issue(format!("session log not found: {}", opts.file.display()));
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    report.detail(format!("output_root={}", cfg.output_root.display()));

    let mut engine = CaptureEngine::new(paths, cfg);
    match engine.process_file(&opts.file)? {
        ProcessOutcome::Exported(record) => {
            report.detail(format!("session_id={}", record.session_id));
            report.detail(format!("project={}", record.project));
            report.detail(format!("messages={}", record.message_count));
            for path in &record.written {
                report.detail(format!("wrote={}", path.display()));
            }
        }
        ProcessOutcome::Skipped(reason) => {
            report.issue(format!("skipped: {}", reason.as_str()));
        }
    }

    Ok(report)
}
