use std::path::PathBuf;
use thiserror::Error;

use lockbox_crypto::CryptoError;

pub type KeyResult<T> = Result<T, KeyError>;

/// Key resolution failures. Messages name the provider and source, never key bytes.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("encryption key not found in {provider} for {scope:?}")]
    KeyNotFound {
        provider: &'static str,
        scope: String,
    },

    #[error("{provider}: invalid key size: got {got} bytes, want {want}")]
    InvalidKeySize {
        provider: &'static str,
        got: usize,
        want: usize,
    },

    #[error("encryption provider {provider:?} is misconfigured: {reason}")]
    ProviderMisconfigured { provider: String, reason: String },

    #[error("{provider}: {detail}")]
    ProviderSourceUnavailable {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider}: reading {}: {source}", .path.display())]
    KeyfileIo {
        provider: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("provider {0:?} is read-only; update the external key source manually")]
    ReadOnlyProvider(&'static str),

    #[error("{provider}: {source}")]
    Crypto {
        provider: &'static str,
        #[source]
        source: CryptoError,
    },
}

impl KeyError {
    /// Attribute a crypto-layer failure to `provider`, lifting size errors to
    /// the provider-level `InvalidKeySize`.
    pub(crate) fn from_crypto(provider: &'static str, err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeySize { got, want } => Self::InvalidKeySize {
                provider,
                got,
                want,
            },
            source => Self::Crypto { provider, source },
        }
    }

    pub(crate) fn misconfigured(provider: &str, reason: impl Into<String>) -> Self {
        Self::ProviderMisconfigured {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}
