use anyhow::Result;

use crate::commands::CommandReport;
use crate::mirror::config::load_config;
use crate::mirror::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/mirror_env_allowlist.rs"));

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("mirror_home={}", paths.mirror_home.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    match load_config(&paths) {
        Ok(cfg) => {
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
            report.detail(format!("auto_start={}", cfg.export.auto_start));
            report.detail(format!(
                "poll_interval_secs={}",
                cfg.watcher.poll_interval_secs
            ));

            if !cfg.source_root.is_dir() {
                report.issue(format!(
                    "missing source root {} (is Claude Code installed?)",
                    cfg.source_root.display()
                ));
            }
            if !cfg.output_root.is_dir() {
                report.detail("output root does not exist yet; created on first capture");
            }
        }
        Err(err) => {
            report.issue(format!("configuration invalid: {err:#}"));
        }
    }

    report.detail(format!(
        "env_keys={}",
        GENERATED_MIRROR_ENV_ALLOWLIST.join(",")
    ));

    Ok(report)
}
