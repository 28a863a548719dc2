//! lockbox-crypto: encryption at rest for archive files
//!
//! Envelope format:
//! ```text
//! [version: 1 byte = 0x01][nonce: 12 bytes][AES-256-GCM ciphertext][tag: 16 bytes]
//! ```
//!
//! Key sources:
//! ```text
//! EncryptionKey (256-bit)
//!   ├── random (EncryptionKey::generate), persisted by a key provider
//!   └── Argon2id(passphrase, salt) via kdf::derive_key
//! ```

pub mod atomic;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod key;

pub use atomic::write_atomic;
pub use envelope::{
    decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, is_encrypted, reencrypt_file,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, KdfParams, MIN_SALT_LEN};
pub use key::{validate_key, EncryptionKey, Fingerprint};

/// Size of an archive key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Current envelope format version
pub const FORMAT_VERSION: u8 = 0x01;

/// Smallest valid envelope: version + nonce + tag (empty plaintext)
pub const MIN_ENCRYPTED_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;
