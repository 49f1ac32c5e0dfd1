use anyhow::Result;

use crate::commands::CommandReport;
use crate::mirror::config::load_config;
use crate::mirror::engine::CaptureEngine;
use crate::mirror::paths::resolve_paths;

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    report.detail(format!("source_root={}", cfg.source_root.display()));
    report.detail(format!("output_root={}", cfg.output_root.display()));
    report.detail(format!(
        "formats={}",
        cfg.export
            .formats
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",")
    ));
    report.detail(format!(
        "poll_interval_secs={}",
        cfg.watcher.poll_interval_secs
    ));

    let mut engine = CaptureEngine::new(paths, cfg);

    if opts.daemon {
        report.detail("starting capture daemon");
        if !engine.run_daemon()? {
            report.issue("source root not found; watcher not started");
        }
        return Ok(report);
    }

    match engine.run_once()? {
        None => report.issue("source root not found; nothing captured"),
        Some(outcome) => {
            report.detail("capture cycle completed");
            report.detail(format!("files_scanned={}", outcome.scanned));
            report.detail(format!("files_exported={}", outcome.exported));
            report.detail(format!("files_skipped={}", outcome.skipped));
            report.detail(format!("files_failed={}", outcome.failed));
        }
    }

    Ok(report)
}
