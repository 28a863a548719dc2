//! Turning encryption on and off for a whole archive.
//!
//! The store's actual state, not the config flag, decides whether it needs
//! migrating, so either direction can be re-run after an interruption. The
//! flag is written as soon as the store changes state, before the file pass.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as B64, Engine};

use lockbox_crypto::kdf::generate_salt;
use lockbox_crypto::{EncryptionKey, Fingerprint};
use lockbox_keys::{KeyContext, KeyError, KeySource};
use lockbox_store::{decrypt_database, encrypt_database, Store, StoreError};

use crate::archive::Archive;
use crate::bulk::{self, BulkSummary, FileTransform};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub fingerprint: Fingerprint,
    /// A fresh key was generated and stored in the keyring.
    pub key_generated: bool,
    /// A passphrase salt was generated and written to the config.
    pub salt_generated: bool,
    pub store_migrated: bool,
    pub files: BulkSummary,
}

/// Give a passphrase archive its salt on first use.
fn ensure_passphrase_salt(archive: &mut Archive) -> VaultResult<bool> {
    let enc = &mut archive.config.encryption;
    if enc.provider_name() != "passphrase" {
        return Ok(false);
    }
    if enc.passphrase.salt.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        return Ok(false);
    }
    enc.passphrase.salt = Some(B64.encode(generate_salt()));
    archive.save()?;
    tracing::info!("generated passphrase salt");
    Ok(true)
}

/// Resolve the key for `encrypt`. With the keyring provider a missing key is
/// generated and stored; every other provider must already supply one.
async fn resolve_or_generate(
    archive: &Archive,
    ctx: &KeyContext,
) -> VaultResult<(EncryptionKey, bool)> {
    if archive.config.encryption.provider_name() == "keyring" {
        let keyring = archive.keyring();
        return match keyring.get_key(ctx).await {
            Ok(key) => Ok((key, false)),
            Err(KeyError::KeyNotFound { .. }) => {
                let key = EncryptionKey::generate();
                keyring.set_key(&key)?;
                tracing::info!(fingerprint = %key.fingerprint(), "generated new key in OS keyring");
                Ok((key, true))
            }
            Err(e) => Err(e.into()),
        };
    }
    let key = archive.provider()?.get_key(ctx).await?;
    Ok((key, false))
}

fn opens_without_key(db: &Path) -> VaultResult<bool> {
    match Store::open(db, None) {
        Ok(store) => {
            store.close()?;
            Ok(true)
        }
        Err(StoreError::StoreWrongKeyOrNotEncrypted { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Bring the store to the keyed state. Returns whether it was migrated.
fn ensure_store_keyed(db: &Path, key: &EncryptionKey) -> VaultResult<bool> {
    match Store::open(db, Some(key)) {
        Ok(store) => {
            store.close()?;
            Ok(false)
        }
        Err(StoreError::StoreWrongKeyOrNotEncrypted { .. }) if opens_without_key(db)? => {
            tracing::info!(path = %db.display(), "encrypting database");
            encrypt_database(db, key)?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Bring the store to the plaintext state. Returns whether it was migrated.
fn ensure_store_plain(db: &Path, key: &EncryptionKey) -> VaultResult<bool> {
    if opens_without_key(db)? {
        return Ok(false);
    }
    tracing::info!(path = %db.display(), "decrypting database");
    decrypt_database(db, key)?;
    Ok(true)
}

/// Encrypt the store and every token and attachment file, recording
/// `encryption.enabled = true` once the store is keyed.
///
/// Re-runnable: a store that already opens with the key is left alone and
/// files that are already encrypted are skipped.
pub async fn enable_encryption(
    archive: &mut Archive,
    ctx: &KeyContext,
    on_file: &(dyn Fn(usize) + Sync),
) -> VaultResult<MigrationReport> {
    let salt_generated = ensure_passphrase_salt(archive)?;
    let (key, key_generated) = resolve_or_generate(archive, ctx).await?;
    if ctx.cancel.is_cancelled() {
        return Err(VaultError::Cancelled {
            stage: "encrypting the database",
        });
    }

    let layout = archive.layout();
    let store_migrated = layout.database.exists() && ensure_store_keyed(&layout.database, &key)?;

    let enc = &mut archive.config.encryption;
    if !enc.enabled || enc.provider.is_empty() {
        enc.enabled = true;
        if enc.provider.is_empty() {
            enc.provider = "keyring".into();
        }
        archive.save()?;
    }

    let files = bulk::collect_protected_files(&layout)?;
    let summary = bulk::run(&files, FileTransform::Encrypt(&key), &ctx.cancel, on_file)?;

    let fingerprint = key.fingerprint();
    tracing::info!(%fingerprint, files = summary.changed, "encryption enabled");
    Ok(MigrationReport {
        fingerprint,
        key_generated,
        salt_generated,
        store_migrated,
        files: summary,
    })
}

/// Reverse of [`enable_encryption`]: decrypt everything, recording
/// `encryption.enabled = false` once the store is plaintext.
///
/// Refuses with [`VaultError::NotEnabled`] only when the flag is off and
/// nothing on disk is encrypted, so an interrupted run can be finished.
pub async fn disable_encryption(
    archive: &mut Archive,
    ctx: &KeyContext,
    on_file: &(dyn Fn(usize) + Sync),
) -> VaultResult<MigrationReport> {
    let layout = archive.layout();
    let files = bulk::collect_protected_files(&layout)?;
    if !archive.config.encryption.enabled {
        let store_keyed = layout.database.exists() && !opens_without_key(&layout.database)?;
        if !store_keyed && !bulk::any_encrypted(&files)? {
            return Err(VaultError::NotEnabled);
        }
        tracing::info!("finishing an interrupted decrypt");
    }

    let key = archive.provider()?.get_key(ctx).await?;
    if ctx.cancel.is_cancelled() {
        return Err(VaultError::Cancelled {
            stage: "decrypting the database",
        });
    }

    let store_migrated = layout.database.exists() && ensure_store_plain(&layout.database, &key)?;

    if archive.config.encryption.enabled {
        archive.config.encryption.enabled = false;
        archive.save()?;
    }

    let summary = bulk::run(&files, FileTransform::Decrypt(&key), &ctx.cancel, on_file)?;

    let fingerprint = key.fingerprint();
    tracing::info!(%fingerprint, files = summary.changed, "encryption disabled");
    Ok(MigrationReport {
        fingerprint,
        key_generated: false,
        salt_generated: false,
        store_migrated,
        files: summary,
    })
}
