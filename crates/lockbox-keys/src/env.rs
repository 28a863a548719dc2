use zeroize::Zeroizing;

use lockbox_core::config::DEFAULT_KEY_ENV_VAR;
use lockbox_crypto::EncryptionKey;

use crate::error::{KeyError, KeyResult};
use crate::provider::{KeyContext, KeySource};

const PROVIDER: &str = "env";

/// Reads a base64 key from an environment variable.
///
/// An unset or empty variable is an error: it never means "no encryption".
#[derive(Debug, Clone)]
pub struct EnvProvider {
    var: String,
}

impl EnvProvider {
    /// `None` or an empty name selects `LOCKBOX_ENCRYPTION_KEY`.
    pub fn new(var: Option<&str>) -> Self {
        let var = match var {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => DEFAULT_KEY_ENV_VAR.to_string(),
        };
        Self { var }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl KeySource for EnvProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_key(&self, _ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        let value = match std::env::var(&self.var) {
            Ok(v) if !v.trim().is_empty() => Zeroizing::new(v),
            _ => {
                return Err(KeyError::KeyNotFound {
                    provider: PROVIDER,
                    scope: self.var.clone(),
                })
            }
        };
        EncryptionKey::from_base64(value.trim()).map_err(|e| KeyError::from_crypto(PROVIDER, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as B64, Engine};

    // Each test uses its own variable name so parallel tests never race.

    #[tokio::test]
    async fn test_reads_key() {
        let key = EncryptionKey::generate();
        std::env::set_var("LOCKBOX_TEST_ENV_READS", key.to_base64().as_str());
        let p = EnvProvider::new(Some("LOCKBOX_TEST_ENV_READS"));
        let got = p.get_key(&KeyContext::default()).await.unwrap();
        assert_eq!(got.as_bytes(), key.as_bytes());
        std::env::remove_var("LOCKBOX_TEST_ENV_READS");
    }

    #[tokio::test]
    async fn test_unset_is_error() {
        let p = EnvProvider::new(Some("LOCKBOX_TEST_ENV_NEVER_SET"));
        let err = p.get_key(&KeyContext::default()).await.unwrap_err();
        assert!(matches!(err, KeyError::KeyNotFound { provider: "env", .. }));
        assert!(err.to_string().contains("LOCKBOX_TEST_ENV_NEVER_SET"));
    }

    #[tokio::test]
    async fn test_wrong_size() {
        std::env::set_var("LOCKBOX_TEST_ENV_SHORT", B64.encode([0u8; 8]));
        let p = EnvProvider::new(Some("LOCKBOX_TEST_ENV_SHORT"));
        let err = p.get_key(&KeyContext::default()).await.unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeySize { got: 8, want: 32, .. }));
        std::env::remove_var("LOCKBOX_TEST_ENV_SHORT");
    }

    #[test]
    fn test_default_var() {
        assert_eq!(EnvProvider::new(None).var(), DEFAULT_KEY_ENV_VAR);
        assert_eq!(EnvProvider::new(Some("  ")).var(), DEFAULT_KEY_ENV_VAR);
        assert_eq!(EnvProvider::new(Some("MY_KEY")).var(), "MY_KEY");
    }
}
