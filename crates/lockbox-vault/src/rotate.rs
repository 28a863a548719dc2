//! Key rotation.
//!
//! Ordered steps, each re-runnable on its own:
//!   1. resolve the current key from the active provider
//!   2. generate a new key
//!   3. re-key the store (skipped when there is no database file)
//!   4. re-encrypt every encrypted token and attachment
//!   5. invalidate derived caches (failure is logged, not fatal)
//!   6. hand the new key to the provider, or print it for read-only providers
//!
//! Once step 3 succeeds the only copy of the new key is in memory until step
//! 6 completes, so any later failure surfaces the key in the error.
//! [`resume_rotation`] takes that key back and finishes steps 3 to 6: the
//! store is left alone if it already opens with it, and files already under
//! it are skipped.

use zeroize::Zeroizing;

use lockbox_crypto::{EncryptionKey, Fingerprint};
use lockbox_keys::{KeyContext, KeyPersistence, KeyProvider, KeySource};
use lockbox_store::{rekey_database, Store, StoreError};

use crate::archive::Archive;
use crate::bulk::{self, BulkSummary, FileTransform};
use crate::cache::CacheInvalidator;
use crate::error::{VaultError, VaultResult};

/// Progress of a rotation that has passed the point of no return.
#[derive(Debug)]
pub struct RotationRecord {
    /// The key the data is moving away from, for `--previous-key`.
    pub old_fingerprint: Fingerprint,
    pub new_key: EncryptionKey,
    /// The store now opens with `new_key`.
    pub store_rekeyed: bool,
    pub files_rekeyed: usize,
}

#[derive(Debug)]
pub struct RotationReport {
    pub old_fingerprint: Fingerprint,
    pub new_fingerprint: Fingerprint,
    pub store_rekeyed: bool,
    pub files: BulkSummary,
    pub cache_invalidated: bool,
    pub persistence: KeyPersistence,
    /// Set only when the provider is read-only and must be updated by hand.
    pub manual_key_b64: Option<Zeroizing<String>>,
}

impl RotationRecord {
    fn files_incomplete(&self, source: bulk::BulkError) -> VaultError {
        VaultError::StoreMigratedFilesIncomplete {
            old_fingerprint: self.old_fingerprint.clone(),
            new_fingerprint: self.new_key.fingerprint(),
            new_key_b64: self.new_key.to_base64(),
            store_rekeyed: self.store_rekeyed,
            source,
        }
    }

    fn partially_complete(self, source: lockbox_keys::KeyError) -> VaultError {
        VaultError::RotationPartiallyComplete {
            old_fingerprint: self.old_fingerprint,
            new_fingerprint: self.new_key.fingerprint(),
            new_key_b64: self.new_key.to_base64(),
            files_rekeyed: self.files_rekeyed,
            source,
        }
    }
}

fn ensure_not_cancelled(ctx: &KeyContext) -> VaultResult<()> {
    if ctx.cancel.is_cancelled() {
        return Err(VaultError::Cancelled {
            stage: "re-keying the database",
        });
    }
    Ok(())
}

pub async fn rotate_key(
    archive: &Archive,
    ctx: &KeyContext,
    caches: &[&dyn CacheInvalidator],
    on_file: &(dyn Fn(usize) + Sync),
) -> VaultResult<RotationReport> {
    if !archive.config.encryption.enabled {
        return Err(VaultError::NotEnabled);
    }

    let provider = archive.provider()?;
    let old_key = provider.get_key(ctx).await?;
    let old_fingerprint = old_key.fingerprint();
    tracing::info!(
        provider = provider.name(),
        fingerprint = %old_fingerprint,
        "step 1: resolved current key"
    );

    let new_key = EncryptionKey::generate();
    tracing::info!(fingerprint = %new_key.fingerprint(), "step 2: generated new key");

    ensure_not_cancelled(ctx)?;
    let layout = archive.layout();
    let store_rekeyed = if layout.database.exists() {
        rekey_database(&layout.database, &old_key, &new_key).map_err(|e| match e {
            StoreError::StoreWrongKeyOrNotEncrypted { .. } => VaultError::StoreKeyMismatch {
                fingerprint: old_fingerprint.clone(),
                source: e,
            },
            other => other.into(),
        })?;
        tracing::info!(path = %layout.database.display(), "step 3: store re-keyed");
        true
    } else {
        tracing::info!(path = %layout.database.display(), "step 3: no store file, skipping");
        false
    };

    let record = RotationRecord {
        old_fingerprint,
        new_key,
        store_rekeyed,
        files_rekeyed: 0,
    };
    finish(archive, &provider, &old_key, record, ctx, caches, on_file)
}

/// Finish a rotation to `target` that stopped after step 3.
///
/// `previous` is the key the data is moving away from. When `None` the
/// provider's current key is used; it still holds the old key until step 6
/// succeeds.
pub async fn resume_rotation(
    archive: &Archive,
    ctx: &KeyContext,
    target: EncryptionKey,
    previous: Option<EncryptionKey>,
    caches: &[&dyn CacheInvalidator],
    on_file: &(dyn Fn(usize) + Sync),
) -> VaultResult<RotationReport> {
    if !archive.config.encryption.enabled {
        return Err(VaultError::NotEnabled);
    }

    let provider = archive.provider()?;
    let old_key = match previous {
        Some(key) => key,
        None => provider.get_key(ctx).await?,
    };
    let new_fingerprint = target.fingerprint();
    if old_key.fingerprint() == new_fingerprint {
        return Err(VaultError::ResumeNeedsPreviousKey {
            fingerprint: new_fingerprint,
        });
    }
    tracing::info!(
        provider = provider.name(),
        old = %old_key.fingerprint(),
        new = %new_fingerprint,
        "resuming rotation"
    );

    ensure_not_cancelled(ctx)?;
    let layout = archive.layout();
    let store_rekeyed = if layout.database.exists() {
        match Store::open(&layout.database, Some(&target)) {
            Ok(store) => {
                store.close()?;
                tracing::info!(path = %layout.database.display(), "step 3: store already re-keyed");
            }
            Err(StoreError::StoreWrongKeyOrNotEncrypted { .. }) => {
                rekey_database(&layout.database, &old_key, &target)?;
                tracing::info!(path = %layout.database.display(), "step 3: store re-keyed");
            }
            Err(e) => return Err(e.into()),
        }
        true
    } else {
        false
    };

    let record = RotationRecord {
        old_fingerprint: old_key.fingerprint(),
        new_key: target,
        store_rekeyed,
        files_rekeyed: 0,
    };
    finish(archive, &provider, &old_key, record, ctx, caches, on_file)
}

/// Steps 4 to 6, shared by a fresh and a resumed rotation.
fn finish(
    archive: &Archive,
    provider: &KeyProvider,
    old_key: &EncryptionKey,
    mut record: RotationRecord,
    ctx: &KeyContext,
    caches: &[&dyn CacheInvalidator],
    on_file: &(dyn Fn(usize) + Sync),
) -> VaultResult<RotationReport> {
    let layout = archive.layout();
    let rekey = FileTransform::Rekey {
        old: old_key,
        new: &record.new_key,
    };
    let files = match bulk::collect_protected_files(&layout)
        .and_then(|files| bulk::run(&files, rekey, &ctx.cancel, on_file))
    {
        Ok(summary) => summary,
        Err(source) => return Err(record.files_incomplete(source)),
    };
    record.files_rekeyed = files.changed;
    tracing::info!(files = files.changed, "step 4: files re-encrypted");

    let mut cache_invalidated = false;
    for cache in caches {
        match cache.invalidate() {
            Ok(removed) => cache_invalidated |= removed,
            Err(e) => tracing::warn!(error = %e, "step 5: failed to invalidate cache"),
        }
    }

    let persistence = match provider.store_key(&record.new_key) {
        Ok(p) => p,
        Err(e) => return Err(record.partially_complete(e)),
    };
    let manual_key_b64 = match persistence {
        KeyPersistence::Stored => {
            tracing::info!(provider = provider.name(), "step 6: new key stored");
            None
        }
        KeyPersistence::ManualUpdateRequired { provider } => {
            tracing::warn!(
                provider,
                "step 6: provider is read-only; new key must be installed manually"
            );
            Some(record.new_key.to_base64())
        }
    };

    let new_fingerprint = record.new_key.fingerprint();
    tracing::info!(old = %record.old_fingerprint, new = %new_fingerprint, "key rotated");
    Ok(RotationReport {
        old_fingerprint: record.old_fingerprint,
        new_fingerprint,
        store_rekeyed: record.store_rekeyed,
        files,
        cache_invalidated,
        persistence,
        manual_key_b64,
    })
}
