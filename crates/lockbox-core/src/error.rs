use std::path::PathBuf;
use thiserror::Error;

pub type LockboxResult<T> = Result<T, LockboxError>;

#[derive(Debug, Error)]
pub enum LockboxError {
    #[error("reading config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("serializing config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
