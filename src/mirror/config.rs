use crate::error::MirrorError;
use crate::mirror::paths::MirrorPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        match raw.trim() {
            "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(MirrorError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    pub poll_interval_secs: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    pub formats: Vec<ExportFormat>,
    pub auto_start: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            formats: vec![ExportFormat::Markdown, ExportFormat::Json],
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub watcher: WatcherSettings,
    pub export: ExportSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialPathsSection {
    source_root: Option<String>,
    output_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialMirrorConfig {
    paths: Option<PartialPathsSection>,
    watcher: Option<WatcherSettings>,
    export: Option<ExportSettings>,
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn env_or_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => expand_home(v.trim()),
        _ => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_formats(var: &str, fallback: &[ExportFormat]) -> Result<Vec<ExportFormat>> {
    match env::var(var) {
        Ok(v) => {
            let mut out = Vec::new();
            for part in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let format = ExportFormat::parse(part)?;
                if !out.contains(&format) {
                    out.push(format);
                }
            }
            if out.is_empty() {
                Ok(fallback.to_vec())
            } else {
                Ok(out)
            }
        }
        Err(_) => Ok(fallback.to_vec()),
    }
}

fn validate(cfg: &MirrorConfig) -> Result<(), MirrorError> {
    if cfg.watcher.poll_interval_secs == 0 {
        return Err(MirrorError::InvalidConfig(
            "watcher poll interval must be >= 1 second".to_string(),
        ));
    }
    if cfg.export.formats.is_empty() {
        return Err(MirrorError::InvalidConfig(
            "at least one export format must be enabled".to_string(),
        ));
    }
    if cfg.source_root.as_os_str().is_empty() {
        return Err(MirrorError::InvalidConfig(
            "source root cannot be empty".to_string(),
        ));
    }
    if cfg.output_root.as_os_str().is_empty() {
        return Err(MirrorError::InvalidConfig(
            "output root cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn merge_file_config(paths: &MirrorPaths, base: &mut MirrorConfig) -> Result<()> {
    if !paths.config_file.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&paths.config_file)?;
    let parsed: PartialMirrorConfig = toml::from_str(&raw).map_err(|err| {
        anyhow::anyhow!(
            "failed to parse mirror config {}: {err}",
            paths.config_file.display()
        )
    })?;
    if let Some(section) = parsed.paths {
        if let Some(source_root) = section.source_root {
            base.source_root = expand_home(&source_root);
        }
        if let Some(output_root) = section.output_root {
            base.output_root = expand_home(&output_root);
        }
    }
    if let Some(watcher) = parsed.watcher {
        base.watcher = watcher;
    }
    if let Some(export) = parsed.export {
        base.export = export;
    }
    Ok(())
}

pub fn load_config(paths: &MirrorPaths) -> Result<MirrorConfig> {
    let mut cfg = MirrorConfig {
        source_root: paths.default_source_root.clone(),
        output_root: paths.default_output_root.clone(),
        watcher: WatcherSettings::default(),
        export: ExportSettings::default(),
    };
    merge_file_config(paths, &mut cfg)?;

    cfg.source_root = env_or_path("MIRROR_SOURCE_DIR", cfg.source_root);
    cfg.output_root = env_or_path("MIRROR_OUTPUT_DIR", cfg.output_root);
    cfg.watcher.poll_interval_secs = env_or_u64(
        "MIRROR_POLL_INTERVAL_SECS",
        cfg.watcher.poll_interval_secs,
    );
    cfg.export.formats = env_or_formats("MIRROR_FORMATS", &cfg.export.formats)?;
    cfg.export.auto_start = env_or_bool("MIRROR_AUTO_START", cfg.export.auto_start);

    validate(&cfg)?;
    Ok(cfg)
}
