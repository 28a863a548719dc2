//! AES-256-GCM file envelope
//!
//! Encrypted payload format (binary):
//! ```text
//! [1 byte: version = 0x01][12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! A fresh nonce is drawn for every call, so encrypting the same plaintext
//! twice under one key never yields the same bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroize;

use crate::atomic::write_atomic;
use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;
use crate::{FORMAT_VERSION, MIN_ENCRYPTED_SIZE, NONCE_SIZE};

/// Encrypt `plaintext` into a versioned envelope.
pub fn encrypt_bytes(key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an envelope produced by [`encrypt_bytes`].
///
/// A wrong key and a tampered payload both surface as
/// [`CryptoError::DecryptionFailed`]; nothing partial is ever returned.
pub fn decrypt_bytes(key: &EncryptionKey, payload: &[u8]) -> CryptoResult<Vec<u8>> {
    if payload.len() < MIN_ENCRYPTED_SIZE {
        return Err(CryptoError::TruncatedOrCorruptPayload {
            len: payload.len(),
            min: MIN_ENCRYPTED_SIZE,
        });
    }
    if payload[0] != FORMAT_VERSION {
        return Err(CryptoError::UnsupportedFormatVersion(payload[0]));
    }

    let (nonce_bytes, ciphertext) = payload[1..].split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Heuristic sniff: long enough to be an envelope and starts with the version byte.
///
/// This is not a cryptographic check. A plaintext file that happens to begin
/// with `0x01` and is at least 29 bytes long is classified as encrypted too;
/// only a successful [`decrypt_bytes`] proves the payload is genuine.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= MIN_ENCRYPTED_SIZE && data[0] == FORMAT_VERSION
}

/// Encrypt the file at `src` and atomically write the envelope to `dst`.
///
/// `src` and `dst` may be the same path.
pub fn encrypt_file(key: &EncryptionKey, src: &Path, dst: &Path) -> CryptoResult<()> {
    let mut plaintext = read(src)?;
    let encrypted = encrypt_bytes(key, &plaintext);
    plaintext.zeroize();
    write_atomic(dst, &encrypted?)
}

/// Decrypt the envelope at `src` and atomically write the plaintext to `dst`.
pub fn decrypt_file(key: &EncryptionKey, src: &Path, dst: &Path) -> CryptoResult<()> {
    let data = read(src)?;
    let mut plaintext = decrypt_bytes(key, &data)?;
    let written = write_atomic(dst, &plaintext);
    plaintext.zeroize();
    written
}

/// Re-encrypt `path` in place from `old` to `new`.
///
/// Returns `Ok(false)` without touching the file when it does not look
/// encrypted, which makes repeated bulk runs idempotent.
pub fn reencrypt_file(old: &EncryptionKey, new: &EncryptionKey, path: &Path) -> CryptoResult<bool> {
    let data = read(path)?;
    if !is_encrypted(&data) {
        tracing::debug!(path = %path.display(), "skipping plaintext file during re-key");
        return Ok(false);
    }
    let mut plaintext = decrypt_bytes(old, &data)?;
    let encrypted = encrypt_bytes(new, &plaintext);
    plaintext.zeroize();
    write_atomic(path, &encrypted?)?;
    Ok(true)
}

fn read(path: &Path) -> CryptoResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CryptoError::io("reading", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TAG_SIZE;

    fn test_key() -> EncryptionKey {
        EncryptionKey::generate()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"hello, encrypted archive!";

        let encrypted = encrypt_bytes(&key, plaintext).unwrap();
        let decrypted = decrypt_bytes(&key, &encrypted).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = test_key();

        let encrypted = encrypt_bytes(&key, b"").unwrap();
        assert_eq!(encrypted.len(), MIN_ENCRYPTED_SIZE);
        let decrypted = decrypt_bytes(&key, &encrypted).unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_envelope_layout() {
        let key = test_key();
        let plaintext = vec![0u8; 1000];

        let encrypted = encrypt_bytes(&key, &plaintext).unwrap();

        // version (1) + nonce (12) + plaintext (1000) + tag (16)
        assert_eq!(encrypted.len(), 1 + NONCE_SIZE + 1000 + TAG_SIZE);
        assert_eq!(encrypted[0], FORMAT_VERSION);
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let key = test_key();
        let a = encrypt_bytes(&key, b"same bytes").unwrap();
        let b = encrypt_bytes(&key, b"same bytes").unwrap();
        assert_ne!(a, b, "nonces must be fresh per call");
        assert_ne!(a[1..1 + NONCE_SIZE], b[1..1 + NONCE_SIZE]);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let encrypted = encrypt_bytes(&test_key(), b"secret data").unwrap();
        let err = decrypt_bytes(&test_key(), &encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"secret data").unwrap();
        encrypted[1 + NONCE_SIZE] ^= 0xFF;

        let err = decrypt_bytes(&key, &encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_one_below_minimum_is_truncation_error() {
        let key = test_key();
        let data = vec![FORMAT_VERSION; MIN_ENCRYPTED_SIZE - 1];
        let err = decrypt_bytes(&key, &data).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::TruncatedOrCorruptPayload { len: 28, min: 29 }
        ));
    }

    #[test]
    fn test_truncated_envelope() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"some plaintext").unwrap();
        for len in [0, 1, 13, MIN_ENCRYPTED_SIZE - 1] {
            assert!(decrypt_bytes(&key, &encrypted[..len]).is_err(), "len {len}");
        }
        // long enough but cut short: tag check fails
        let cut = &encrypted[..encrypted.len() - 1];
        assert!(matches!(
            decrypt_bytes(&key, cut).unwrap_err(),
            CryptoError::DecryptionFailed
        ));
    }

    #[test]
    fn test_bad_version() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"data").unwrap();
        encrypted[0] = 0x02;
        let err = decrypt_bytes(&key, &encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedFormatVersion(0x02)));
    }

    #[test]
    fn test_is_encrypted() {
        let key = test_key();
        assert!(is_encrypted(&encrypt_bytes(&key, b"").unwrap()));
        assert!(is_encrypted(&encrypt_bytes(&key, b"attachment").unwrap()));

        assert!(!is_encrypted(b""));
        assert!(!is_encrypted(&[FORMAT_VERSION; MIN_ENCRYPTED_SIZE - 1]));
        assert!(!is_encrypted(b"{\"access_token\": \"plain json token file\"}"));

        let mut wrong_version = encrypt_bytes(&key, b"x").unwrap();
        wrong_version[0] = 0x00;
        assert!(!is_encrypted(&wrong_version));
    }

    #[test]
    fn test_encrypt_decrypt_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attachment.bin");
        let original = b"binary attachment payload \x00\x01\x02";
        std::fs::write(&path, original).unwrap();
        let key = test_key();

        encrypt_file(&key, &path, &path).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert!(is_encrypted(&on_disk));
        assert_ne!(on_disk.as_slice(), original.as_slice());

        decrypt_file(&key, &path, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_decrypt_file_wrong_key_leaves_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("enc");
        let dst = dir.path().join("out");
        std::fs::write(&src, b"plain").unwrap();
        std::fs::write(&dst, b"existing target").unwrap();

        let key = test_key();
        encrypt_file(&key, &src, &src).unwrap();

        let err = decrypt_file(&test_key(), &src, &dst).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
        assert_eq!(std::fs::read(&dst).unwrap(), b"existing target");
    }

    #[test]
    fn test_encrypt_file_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = encrypt_file(&test_key(), &missing, &missing).unwrap_err();
        assert!(matches!(err, CryptoError::Io { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_reencrypt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, b"{\"refresh_token\":\"abc\"}").unwrap();
        let old = test_key();
        let new = test_key();

        // plaintext files are left alone
        assert!(!reencrypt_file(&old, &new, &path).unwrap());

        encrypt_file(&old, &path, &path).unwrap();
        assert!(reencrypt_file(&old, &new, &path).unwrap());

        let data = std::fs::read(&path).unwrap();
        assert!(decrypt_bytes(&old, &data).is_err());
        assert_eq!(
            decrypt_bytes(&new, &data).unwrap(),
            b"{\"refresh_token\":\"abc\"}"
        );
    }
}
