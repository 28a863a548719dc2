//! Store migration between key states by export-and-swap.
//!
//! ```text
//! {no key} --encrypt_database--> {key A} --rekey_database--> {key B}
//!     ^                             |
//!     +-------decrypt_database------+
//! ```
//!
//! Every transition exports the whole database into a sibling file keyed for
//! the target state (`<db>.encrypted`, `<db>.decrypted`, `<db>.rotated`), then
//! renames it over the original. Until that rename the original is untouched.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use lockbox_crypto::EncryptionKey;

use crate::error::{StoreError, StoreResult};
use crate::store::{exec_discard, key_literal, open_connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Encrypt,
    Decrypt,
    Rekey,
}

impl Transition {
    fn suffix(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypted",
            Self::Decrypt => "decrypted",
            Self::Rekey => "rotated",
        }
    }

    fn alias(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypted",
            Self::Decrypt => "plaintext",
            Self::Rekey => "new_db",
        }
    }
}

fn appended(path: &Path, tail: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(tail);
    PathBuf::from(s)
}

/// Path of the migration target for `db` under a given transition suffix.
pub fn target_path(db: &Path, suffix: &str) -> PathBuf {
    appended(db, &format!(".{suffix}"))
}

fn remove_quiet(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove"),
    }
}

fn remove_journals(path: &Path) {
    remove_quiet(&appended(path, "-wal"));
    remove_quiet(&appended(path, "-shm"));
}

fn remove_with_journals(path: &Path) {
    remove_quiet(path);
    remove_journals(path);
}

/// Encrypt a plaintext store in place under `key`.
pub fn encrypt_database(path: &Path, key: &EncryptionKey) -> StoreResult<()> {
    export_and_swap(path, None, Some(key), Transition::Encrypt)
}

/// Decrypt a store keyed with `key` back to plaintext.
pub fn decrypt_database(path: &Path, key: &EncryptionKey) -> StoreResult<()> {
    export_and_swap(path, Some(key), None, Transition::Decrypt)
}

/// Move a store from `old` to `new`.
pub fn rekey_database(path: &Path, old: &EncryptionKey, new: &EncryptionKey) -> StoreResult<()> {
    export_and_swap(path, Some(old), Some(new), Transition::Rekey)
}

fn export_and_swap(
    path: &Path,
    from: Option<&EncryptionKey>,
    to: Option<&EncryptionKey>,
    transition: Transition,
) -> StoreResult<()> {
    if !path.exists() {
        return Err(StoreError::io(
            "migrating",
            path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let target = target_path(path, transition.suffix());
    let span = tracing::info_span!(
        "store_migration",
        path = %path.display(),
        transition = transition.suffix()
    );
    let _enter = span.enter();

    // Opening under the current key fails here, before anything is written,
    // if the key is wrong.
    let conn = open_connection(path, from)?;

    remove_with_journals(&target);

    if let Err(e) = export_into(&conn, path, &target, to, transition) {
        drop(conn);
        remove_with_journals(&target);
        return Err(e);
    }

    if let Err((_, e)) = conn.close() {
        remove_with_journals(&target);
        return Err(StoreError::sqlite("closing", path, e));
    }

    // Journals belong to the old file and would be misread against the new one.
    remove_journals(path);

    std::fs::rename(&target, path).map_err(|e| {
        remove_with_journals(&target);
        StoreError::io("replacing store with", &target, e)
    })?;

    remove_journals(&target);

    tracing::info!("store migrated");
    Ok(())
}

fn export_into(
    conn: &Connection,
    source: &Path,
    target: &Path,
    to: Option<&EncryptionKey>,
    transition: Transition,
) -> StoreResult<()> {
    let alias = transition.alias();
    let target_str = target.to_string_lossy().replace('\'', "''");
    let key_clause = match to {
        Some(key) => key_literal(key),
        None => zeroize::Zeroizing::new("''".to_string()),
    };
    let attach = zeroize::Zeroizing::new(format!(
        "ATTACH DATABASE '{target_str}' AS {alias} KEY {}",
        key_clause.as_str()
    ));
    exec_discard(conn, &attach).map_err(|e| StoreError::sqlite("attaching target for", source, e))?;

    exec_discard(conn, &format!("SELECT sqlcipher_export('{alias}')"))
        .map_err(|e| StoreError::sqlite("exporting", source, e))?;

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .map_err(|e| StoreError::sqlite("reading user_version of", source, e))?;
    conn.execute_batch(&format!("PRAGMA {alias}.user_version = {version};"))
        .map_err(|e| StoreError::sqlite("copying user_version to", target, e))?;

    if let Err(e) = exec_discard(conn, &format!("PRAGMA {alias}.journal_mode = WAL")) {
        tracing::warn!(path = %target.display(), error = %e, "could not set WAL on migrated store");
    }

    exec_discard(conn, &format!("DETACH DATABASE {alias}"))
        .map_err(|e| StoreError::sqlite("detaching", target, e))?;
    Ok(())
}
