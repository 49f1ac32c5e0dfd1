use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MirrorPaths {
    pub mirror_home: PathBuf,
    pub config_file: PathBuf,
    pub logs_dir: PathBuf,
    pub default_source_root: PathBuf,
    pub default_output_root: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<MirrorPaths> {
    let home = required_home_dir()?;
    let mirror_home = env_or_default_path("MIRROR_HOME", home.join(".chat-mirror"));

    let config_file = env_or_default_path("MIRROR_CONFIG_PATH", mirror_home.join("config.toml"));
    let logs_dir = env_or_default_path("MIRROR_LOGS_DIR", mirror_home.join("logs"));
    let default_source_root = home.join(".claude").join("projects");
    let default_output_root = home.join("claude-conversations");

    Ok(MirrorPaths {
        mirror_home,
        config_file,
        logs_dir,
        default_source_root,
        default_output_root,
    })
}
