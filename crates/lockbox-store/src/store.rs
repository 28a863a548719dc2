//! Keyed open of the relational store (SQLCipher).

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use lockbox_core::EncryptionConfig;
use lockbox_crypto::EncryptionKey;

use crate::error::{StoreError, StoreResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a statement and drain whatever rows it yields. SQLCipher pragmas and
/// `sqlcipher_export` return rows on some versions and none on others.
pub(crate) fn exec_discard(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// SQLCipher raw-key literal: `"x'<64 hex>'"`.
pub(crate) fn key_literal(key: &EncryptionKey) -> zeroize::Zeroizing<String> {
    zeroize::Zeroizing::new(format!("\"x'{}'\"", key.to_hex().as_str()))
}

/// Apply the key (if any) and verify the file is readable with it.
pub(crate) fn open_connection(path: &Path, key: Option<&EncryptionKey>) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(|e| StoreError::sqlite("opening", path, e))?;

    // The key must be the first statement on the connection.
    if let Some(key) = key {
        let sql = zeroize::Zeroizing::new(format!("PRAGMA key = {};", key_literal(key).as_str()));
        exec_discard(&conn, &sql).map_err(|e| StoreError::sqlite("applying key to", path, e))?;
    }

    conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
        .map_err(|e| StoreError::StoreWrongKeyOrNotEncrypted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(conn)
}

/// An open handle on the archive database.
///
/// Single-writer: rotation and normal writes must not run concurrently. This
/// is an operational precondition, not enforced by locks.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: PathBuf,
    encrypted: bool,
}

impl Store {
    /// Open (or create) the store. With a key, `PRAGMA key` is applied before
    /// anything else, then the key is verified by reading the schema.
    pub fn open(path: &Path, key: Option<&EncryptionKey>) -> StoreResult<Self> {
        let conn = open_connection(path, key)?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::sqlite("setting busy_timeout on", path, e))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .map_err(|e| StoreError::sqlite("enabling WAL on", path, e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(path = %path.display(), mode, "store did not switch to WAL");
        }
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::sqlite("enabling foreign keys on", path, e))?;

        tracing::debug!(path = %path.display(), encrypted = key.is_some(), "opened store");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            encrypted: key.is_some(),
        })
    }

    /// Open honouring the configuration's `encryption.enabled` flag.
    ///
    /// A keyless open of a store marked as encrypted is refused without
    /// touching the file, so a missing key can never silently create or read
    /// a plaintext database in its place.
    pub fn open_for_config(
        path: &Path,
        cfg: &EncryptionConfig,
        key: Option<&EncryptionKey>,
    ) -> StoreResult<Self> {
        if cfg.enabled && key.is_none() {
            return Err(StoreError::StoreWrongKeyOrNotEncrypted {
                path: path.to_path_buf(),
                reason: "encryption is enabled but no key was supplied".into(),
            });
        }
        Self::open(path, if cfg.enabled { key } else { None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn close(self) -> StoreResult<()> {
        let path = self.path;
        self.conn
            .close()
            .map_err(|(_, e)| StoreError::sqlite("closing", &path, e))
    }
}
