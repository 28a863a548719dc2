use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

use lockbox_core::LockboxError;
use lockbox_crypto::{CryptoError, Fingerprint};
use lockbox_keys::KeyError;
use lockbox_store::StoreError;

use crate::bulk::BulkError;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption is not enabled; run `lockbox encrypt` first")]
    NotEnabled,

    #[error(
        "encryption key already exists in {provider} ({location}); \
         use `lockbox key rotate` to change it"
    )]
    AlreadyExists {
        provider: &'static str,
        location: String,
    },

    #[error("{operation} only supports the keyring and keyfile providers, got {provider:?}")]
    UnsupportedProvider {
        operation: &'static str,
        provider: String,
    },

    #[error(
        "keyfile provider requires a path; \
         pass --keyfile-path or set [encryption.keyfile] path"
    )]
    KeyfilePathMissing,

    /// The store already uses the new key, but no provider holds it.
    #[error(
        "DATABASE HAS BEEN RE-KEYED but the new key could not be stored: {source}\n\
         Files re-encrypted: {files_rekeyed}\n\
         Old key fingerprint: {old_fingerprint}\n\
         New key fingerprint: {new_fingerprint}\n\
         New key (base64): {}\n\
         Copy this key into a file now; it is the only way to open the archive.\n\
         Then run `lockbox key rotate --resume <file>` to store it in the provider.",
        new_key_b64.as_str()
    )]
    RotationPartiallyComplete {
        old_fingerprint: Fingerprint,
        new_fingerprint: Fingerprint,
        new_key_b64: Zeroizing<String>,
        files_rekeyed: usize,
        #[source]
        source: KeyError,
    },

    /// File re-encryption stopped after some data moved to the new key.
    #[error(
        "KEY ROTATION INCOMPLETE: file re-encryption stopped: {source}\n\
         Database re-keyed: {store_rekeyed}\n\
         Old key fingerprint: {old_fingerprint}\n\
         New key fingerprint: {new_fingerprint}\n\
         New key (base64): {}\n\
         Copy this key into a file and leave the current key in its provider.\n\
         Then run `lockbox key rotate --resume <file>` to finish.",
        new_key_b64.as_str()
    )]
    StoreMigratedFilesIncomplete {
        old_fingerprint: Fingerprint,
        new_fingerprint: Fingerprint,
        new_key_b64: Zeroizing<String>,
        store_rekeyed: bool,
        #[source]
        source: BulkError,
    },

    #[error("cancelled before {stage}; no archive data was changed")]
    Cancelled { stage: &'static str },

    /// The provider's key does not open the store, which is what an
    /// unfinished rotation looks like.
    #[error(
        "the current key ({fingerprint}) does not open the database: {source}\n\
         If an earlier `lockbox key rotate` stopped partway, finish it with\n\
         `lockbox key rotate --resume <file holding the new key>`."
    )]
    StoreKeyMismatch {
        fingerprint: Fingerprint,
        #[source]
        source: StoreError,
    },

    #[error(
        "the provider already holds the rotation target ({fingerprint}); \
         pass the key the data is moving away from with --previous-key"
    )]
    ResumeNeedsPreviousKey { fingerprint: Fingerprint },

    #[error(transparent)]
    Bulk(#[from] BulkError),

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] LockboxError),

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VaultError {
    pub(crate) fn io(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
