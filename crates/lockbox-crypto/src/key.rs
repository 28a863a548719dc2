//! Key material: the 256-bit archive key and its non-secret fingerprint

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Number of SHA-256 bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 8;

/// A 256-bit archive encryption key. Zeroized on drop.
///
/// Keys are immutable: rotation generates a new key, it never edits one.
/// There is intentionally no `Display` impl and `Debug` is redacted.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generate a fresh key from the OS-seeded CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from an arbitrary slice, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        validate_key(bytes)?;
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Decode a standard-base64 key. Surrounding whitespace is ignored.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut raw = B64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(B64.encode(self.bytes))
    }

    /// Lowercase hex, the form SQLCipher expects inside `x'...'`.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint().as_str())
            .finish()
    }
}

/// Short non-secret identifier of a key: truncated SHA-256, hex encoded.
///
/// Lets an operator confirm two machines hold the same key without revealing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(key: &EncryptionKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(format!(
            "SHA-256: {}",
            hex::encode(&digest[..FINGERPRINT_BYTES])
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject any key material that is not exactly 32 bytes.
pub fn validate_key(bytes: &[u8]) -> CryptoResult<()> {
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeySize {
            got: bytes.len(),
            want: KEY_SIZE,
        });
    }
    Ok(())
}
