//! Key derivation: Argon2id passphrase + salt → archive key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;
use crate::KEY_SIZE;

/// Shortest salt accepted by [`derive_key`].
pub const MIN_SALT_LEN: usize = 16;

/// Argon2id parameters for KDF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit key from a passphrase and salt using Argon2id.
///
/// Deterministic: the same passphrase, salt and params always give the same
/// key. The salt is not secret but must be at least 16 bytes.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<EncryptionKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::SaltTooShort {
            got: salt.len(),
            min: MIN_SALT_LEN,
        });
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id failed: {e}")))?;

    let derived = EncryptionKey::from_bytes(key);
    zeroize::Zeroize::zeroize(&mut key);
    Ok(derived)
}

/// Generate a random salt of [`MIN_SALT_LEN`] bytes for a new passphrase setup.
pub fn generate_salt() -> [u8; MIN_SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; MIN_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    // Use fast params for testing
    fn fast() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; 16];

        let key1 = derive_key(&passphrase, &salt, &fast()).unwrap();
        let key2 = derive_key(&passphrase, &salt, &fast()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];

        let key1 = derive_key(&SecretString::from("passphrase-a"), &salt, &fast()).unwrap();
        let key2 = derive_key(&SecretString::from("passphrase-b"), &salt, &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");

        let key1 = derive_key(&passphrase, &[1u8; 16], &fast()).unwrap();
        let key2 = derive_key(&passphrase, &[2u8; 16], &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_rejects_short_salt() {
        let passphrase = SecretString::from("pw");
        let err = derive_key(&passphrase, &[0u8; 15], &fast()).unwrap_err();
        assert!(matches!(err, CryptoError::SaltTooShort { got: 15, min: 16 }));
    }

    #[test]
    fn test_kdf_accepts_long_salt() {
        let passphrase = SecretString::from("pw");
        assert!(derive_key(&passphrase, &[9u8; 32], &fast()).is_ok());
    }

    #[test]
    fn test_default_params() {
        let p = KdfParams::default();
        assert_eq!((p.time_cost, p.mem_cost_kib, p.parallelism), (3, 65536, 4));
    }

    #[test]
    fn test_generate_salt_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
