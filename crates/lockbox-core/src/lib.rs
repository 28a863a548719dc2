//! lockbox-core: configuration schema, archive layout, and shared errors
//!
//! Every other lockbox crate receives a `LockboxConfig` value explicitly;
//! nothing here is process-global.

pub mod config;
pub mod error;

pub use config::{ArchiveLayout, EncryptionConfig, LockboxConfig};
pub use error::{LockboxError, LockboxResult};
