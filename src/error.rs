#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while cleaning the output directory:\n{0}")]
    Clean(#[from] CleanError),

    #[error("Step '{0}':\n{1}")]
    Step(String, anyhow::Error),

    #[error("Cycle detected in the task graph at step '{0}'")]
    Cycle(String),

    #[error("Pipeline '{0}' requires the `{1}` feature")]
    Unsupported(&'static str, &'static str),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse {0}.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Couldn't remove the output directory.\n{0}")]
    Remove(std::io::Error),

    #[error("Couldn't create the output directory.\n{0}")]
    Create(std::io::Error),
}

/// Errors shared by every step that reads a glob-matched asset set.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Couldn't read asset.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Source directory {0} does not exist")]
    Missing(Utf8PathBuf),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("Couldn't resolve watched path {0}.\n{1}")]
    Resolve(String, anyhow::Error),
}
