use std::path::PathBuf;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the key material and envelope layer.
///
/// `DecryptionFailed` deliberately covers both a wrong key and tampered
/// ciphertext so callers cannot tell the two apart.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key size: got {got} bytes, want {want}")]
    InvalidKeySize { got: usize, want: usize },

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("decryption failed (wrong key or tampered data)")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("unsupported format version 0x{0:02x}")]
    UnsupportedFormatVersion(u8),

    #[error("payload too short: {len} bytes (minimum {min})")]
    TruncatedOrCorruptPayload { len: usize, min: usize },

    #[error("salt too short: got {got} bytes, need at least {min}")]
    SaltTooShort { got: usize, min: usize },

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptoError {
    pub fn io(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
