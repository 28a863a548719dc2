//! lockbox-keys: where the archive key comes from
//!
//! Providers (selected by `encryption.provider`):
//!   keyring     OS credential store, account = database path (default)
//!   keyfile     base64 key in a file
//!   env         base64 key in an environment variable
//!   passphrase  Argon2id(passphrase, configured salt)
//!   exec        stdout of `sh -c <command>`
//!
//! Only keyring and keyfile can persist a key. The others are read-only and
//! ask the operator to update the external source after rotation.

pub mod env;
pub mod error;
pub mod exec;
pub mod factory;
pub mod keyfile;
pub mod keyring;
pub mod passphrase;
pub mod provider;

pub use env::EnvProvider;
pub use error::{KeyError, KeyResult};
pub use exec::ExecProvider;
pub use factory::{from_config, ProviderOptions};
pub use keyfile::KeyfileProvider;
pub use keyring::{CredentialStore, KeyringProvider, MemoryCredentialStore, OsCredentialStore};
pub use passphrase::PassphraseProvider;
pub use provider::{KeyContext, KeyPersistence, KeyProvider, KeySource};
