use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown export format `{0}`: use `markdown` or `json`")]
    UnknownFormat(String),
    #[error("watch daemon already running (lock {0})")]
    DaemonAlreadyRunning(String),
}
