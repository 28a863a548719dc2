use secrecy::SecretString;

use lockbox_crypto::{derive_key, EncryptionKey, KdfParams, MIN_SALT_LEN};

use crate::error::{KeyError, KeyResult};
use crate::provider::{KeyContext, KeySource};

const PROVIDER: &str = "passphrase";

/// Derives the key from a passphrase with Argon2id.
///
/// The salt is validated at construction, so a misconfigured salt fails before
/// any KDF work is spent.
pub struct PassphraseProvider {
    passphrase: SecretString,
    salt: Vec<u8>,
    params: KdfParams,
}

impl std::fmt::Debug for PassphraseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseProvider")
            .field("salt_len", &self.salt.len())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PassphraseProvider {
    pub fn new(passphrase: SecretString, salt: Vec<u8>) -> KeyResult<Self> {
        Self::with_params(passphrase, salt, KdfParams::default())
    }

    pub fn with_params(
        passphrase: SecretString,
        salt: Vec<u8>,
        params: KdfParams,
    ) -> KeyResult<Self> {
        if salt.len() < MIN_SALT_LEN {
            return Err(KeyError::misconfigured(
                PROVIDER,
                format!("salt must be at least {MIN_SALT_LEN} bytes, got {}", salt.len()),
            ));
        }
        Ok(Self {
            passphrase,
            salt,
            params,
        })
    }
}

impl KeySource for PassphraseProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_key(&self, _ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        derive_key(&self.passphrase, &self.salt, &self.params)
            .map_err(|e| KeyError::from_crypto(PROVIDER, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn provider(pass: &str, salt: &[u8]) -> PassphraseProvider {
        PassphraseProvider::with_params(SecretString::from(pass), salt.to_vec(), fast()).unwrap()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let ctx = KeyContext::default();
        let a = provider("correct horse", &[3u8; 16]).get_key(&ctx).await.unwrap();
        let b = provider("correct horse", &[3u8; 16]).get_key(&ctx).await.unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[tokio::test]
    async fn test_sensitive_to_inputs() {
        let ctx = KeyContext::default();
        let base = provider("correct horse", &[3u8; 16]).get_key(&ctx).await.unwrap();
        let other_pass = provider("battery staple", &[3u8; 16]).get_key(&ctx).await.unwrap();
        let other_salt = provider("correct horse", &[4u8; 16]).get_key(&ctx).await.unwrap();
        assert_ne!(base.as_bytes(), other_pass.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
    }

    #[test]
    fn test_short_salt_rejected() {
        let err = PassphraseProvider::new(SecretString::from("pw"), vec![0u8; 15]).unwrap_err();
        assert!(matches!(err, KeyError::ProviderMisconfigured { .. }));
    }

    #[test]
    fn test_debug_hides_passphrase() {
        let p = provider("super-secret-words", &[1u8; 16]);
        let dbg = format!("{p:?}");
        assert!(!dbg.contains("super-secret-words"));
    }
}
