//! lockbox-vault: whole-archive encryption operations
//!
//! ```text
//! encrypt      key (resolve or generate) -> store -> tokens + attachments -> config
//! decrypt      key -> store -> tokens + attachments -> config
//! key rotate   old key -> new key -> store -> files -> caches -> provider
//! --resume     old key + new key -> (store) -> remaining files -> caches -> provider
//! ```
//!
//! The store is single-writer. Nothing here takes a lock, so these operations
//! must not run while another process writes to the archive.

pub mod archive;
pub mod bulk;
pub mod cache;
pub mod error;
pub mod keyops;
pub mod migrate;
pub mod rotate;

pub use archive::Archive;
pub use bulk::{BulkError, BulkSummary, FileTransform};
pub use cache::{AnalyticsCache, CacheInvalidator};
pub use error::{VaultError, VaultResult};
pub use keyops::{
    export_key, fingerprint, import_key, init_key, load_key, read_key_input, ExportTarget,
    KeyInput,
};
pub use migrate::{disable_encryption, enable_encryption, MigrationReport};
pub use rotate::{resume_rotation, rotate_key, RotationRecord, RotationReport};
