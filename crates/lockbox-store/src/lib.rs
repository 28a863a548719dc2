//! lockbox-store: the archive's protected storage
//!
//! - `store`: the relational database, opened through SQLCipher with the
//!   archive key applied before any other statement
//! - `rekey`: export-and-swap migrations between {no key}, {key A}, {key B}
//! - `cas`: plaintext-addressed attachments and credential token files

pub mod cas;
pub mod error;
pub mod rekey;
pub mod store;

pub use cas::{AttachmentStore, ContentAddress, TokenStore};
pub use error::{StoreError, StoreResult};
pub use rekey::{decrypt_database, encrypt_database, rekey_database, target_path};
pub use store::Store;
