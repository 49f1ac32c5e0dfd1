use anyhow::Result;

use crate::commands::CommandReport;
use crate::mirror::config::load_config;
use crate::mirror::index::rebuild_index;
use crate::mirror::paths::resolve_paths;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub project: String,
}

/// Rebuild one project's `_index.md` from its already-written transcripts.
pub fn run(opts: &IndexOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("index");

    let project_dir = cfg.output_root.join(&opts.project);
    report.detail(format!("project_dir={}", project_dir.display()));

    if !project_dir.is_dir() {
        report.issue("project output dir does not exist");
        return Ok(report);
    }

    let outcome = rebuild_index(&project_dir)?;
    report.detail(format!("index={}", outcome.index_path.display()));
    report.detail(format!("sessions={}", outcome.sessions));

    Ok(report)
}
