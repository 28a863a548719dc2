use std::path::PathBuf;
use thiserror::Error;

use lockbox_crypto::CryptoError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be read with the supplied key (or lack of one).
    /// Raised before anything is written.
    #[error(
        "cannot open {}: wrong encryption key or database not encrypted ({reason})",
        .path.display()
    )]
    StoreWrongKeyOrNotEncrypted { path: PathBuf, reason: String },

    #[error("sqlite: {action} {}: {source}", .path.display())]
    Sqlite {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Crypto {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },

    #[error("invalid content address {0:?}")]
    InvalidAddress(String),
}

impl StoreError {
    pub(crate) fn sqlite(
        action: &'static str,
        path: &std::path::Path,
        source: rusqlite::Error,
    ) -> Self {
        Self::Sqlite {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn io(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn crypto(path: &std::path::Path, source: CryptoError) -> Self {
        Self::Crypto {
            path: path.to_path_buf(),
            source,
        }
    }
}
