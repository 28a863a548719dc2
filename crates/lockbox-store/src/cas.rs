//! Content-addressed attachments and credential token files.
//!
//! Attachments are addressed by the BLAKE3 hash of their *plaintext*, taken
//! before any envelope encryption, so identity survives key rotation and
//! toggling encryption on or off. Objects are sharded two hex chars deep:
//!
//! ```text
//! <attachments>/ab/ab3f...e9   (64 hex chars)
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use lockbox_crypto::{decrypt_bytes, encrypt_bytes, is_encrypted, write_atomic, EncryptionKey};

use crate::error::{StoreError, StoreResult};

/// BLAKE3 digest of an attachment's plaintext, as 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn of(plaintext: &[u8]) -> Self {
        Self(blake3::hash(plaintext).to_hex().to_string())
    }

    pub fn from_hex(hex: &str) -> StoreResult<Self> {
        let hash = blake3::Hash::from_hex(hex)
            .map_err(|_| StoreError::InvalidAddress(hex.to_string()))?;
        Ok(Self(hash.to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn create_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::io("creating directory", parent, e))?;
    }
    Ok(())
}

fn write_maybe_encrypted(
    path: &Path,
    plaintext: &[u8],
    key: Option<&EncryptionKey>,
) -> StoreResult<()> {
    create_parent(path)?;
    match key {
        Some(key) => {
            let ct = encrypt_bytes(key, plaintext).map_err(|e| StoreError::crypto(path, e))?;
            write_atomic(path, &ct)
        }
        None => write_atomic(path, plaintext),
    }
    .map_err(|e| StoreError::crypto(path, e))
}

fn read_maybe_encrypted(path: &Path, key: Option<&EncryptionKey>) -> StoreResult<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| StoreError::io("reading", path, e))?;
    match key {
        Some(key) if is_encrypted(&data) => {
            decrypt_bytes(key, &data).map_err(|e| StoreError::crypto(path, e))
        }
        _ => Ok(data),
    }
}

/// Deduplicating attachment store.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, addr: &ContentAddress) -> PathBuf {
        self.root.join(&addr.as_str()[..2]).join(addr.as_str())
    }

    pub fn contains(&self, addr: &ContentAddress) -> bool {
        self.object_path(addr).is_file()
    }

    /// Store `plaintext`, encrypting it when a key is given. Returns the
    /// plaintext address; an existing object with that address is left as is.
    pub fn put(
        &self,
        plaintext: &[u8],
        key: Option<&EncryptionKey>,
    ) -> StoreResult<ContentAddress> {
        let addr = ContentAddress::of(plaintext);
        let path = self.object_path(&addr);
        if path.is_file() {
            tracing::trace!(addr = %addr, "attachment already stored");
            return Ok(addr);
        }
        write_maybe_encrypted(&path, plaintext, key)?;
        tracing::debug!(
            addr = %addr,
            encrypted = key.is_some(),
            bytes = plaintext.len(),
            "stored attachment"
        );
        Ok(addr)
    }

    /// Read an attachment, decrypting only if the stored bytes look encrypted.
    pub fn get(&self, addr: &ContentAddress, key: Option<&EncryptionKey>) -> StoreResult<Vec<u8>> {
        read_maybe_encrypted(&self.object_path(addr), key)
    }
}

/// Credential token files, `<tokens>/<name>.json`.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn save(&self, name: &str, json: &[u8], key: Option<&EncryptionKey>) -> StoreResult<()> {
        let path = self.path_for(name);
        write_maybe_encrypted(&path, json, key)?;
        tracing::debug!(path = %path.display(), encrypted = key.is_some(), "saved token");
        Ok(())
    }

    pub fn load(&self, name: &str, key: Option<&EncryptionKey>) -> StoreResult<Vec<u8>> {
        read_maybe_encrypted(&self.path_for(name), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_address_is_blake3_of_plaintext() {
        let addr = ContentAddress::of(b"hello");
        assert_eq!(addr.as_str(), blake3::hash(b"hello").to_hex().as_str());
        assert_eq!(addr.as_str().len(), 64);
    }

    #[test]
    fn test_from_hex_validates() {
        let addr = ContentAddress::of(b"x");
        assert_eq!(ContentAddress::from_hex(addr.as_str()).unwrap(), addr);
        assert!(ContentAddress::from_hex("zz").is_err());
    }

    #[test]
    fn test_put_get_plain_and_sharding() {
        let tmp = TempDir::new().unwrap();
        let store = AttachmentStore::new(tmp.path());
        let addr = store.put(b"attachment body", None).unwrap();

        let path = store.object_path(&addr);
        assert_eq!(path.parent().unwrap().file_name().unwrap(), &addr.as_str()[..2]);
        assert_eq!(std::fs::read(&path).unwrap(), b"attachment body");
        assert_eq!(store.get(&addr, None).unwrap(), b"attachment body");
    }

    #[test]
    fn test_put_encrypted() {
        let tmp = TempDir::new().unwrap();
        let store = AttachmentStore::new(tmp.path());
        let key = EncryptionKey::generate();
        let addr = store.put(b"secret pdf", Some(&key)).unwrap();

        let raw = std::fs::read(store.object_path(&addr)).unwrap();
        assert!(is_encrypted(&raw));
        assert_eq!(store.get(&addr, Some(&key)).unwrap(), b"secret pdf");
    }

    #[test]
    fn test_put_existing_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = AttachmentStore::new(tmp.path());
        let key = EncryptionKey::generate();
        let a1 = store.put(b"same", Some(&key)).unwrap();
        let before = std::fs::read(store.object_path(&a1)).unwrap();
        let a2 = store.put(b"same", Some(&key)).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(std::fs::read(store.object_path(&a2)).unwrap(), before);
    }

    #[test]
    fn test_token_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let tokens = TokenStore::new(tmp.path().join("tokens"));
        let key = EncryptionKey::generate();
        tokens.save("alice@example.com", br#"{"refresh":"r"}"#, Some(&key)).unwrap();

        let raw = std::fs::read(tokens.path_for("alice@example.com")).unwrap();
        assert!(is_encrypted(&raw));
        assert_eq!(tokens.load("alice@example.com", Some(&key)).unwrap(), br#"{"refresh":"r"}"#);
    }

    #[test]
    fn test_token_wrong_key_fails() {
        let tmp = TempDir::new().unwrap();
        let tokens = TokenStore::new(tmp.path());
        tokens.save("bob", b"{}", Some(&EncryptionKey::generate())).unwrap();
        let err = tokens.load("bob", Some(&EncryptionKey::generate())).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Crypto { source: lockbox_crypto::CryptoError::DecryptionFailed, .. }
        ));
    }
}
