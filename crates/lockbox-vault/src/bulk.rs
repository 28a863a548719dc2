//! Bulk per-file envelope work over tokens and attachments.
//!
//! Files are independent, so the work fans out over rayon. Cancellation is
//! cooperative: a cancelled run stops starting new files, never abandons one
//! halfway (each file is replaced atomically), and reports how many finished.
//! The first per-file failure aborts the run.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use lockbox_core::ArchiveLayout;
use lockbox_crypto::atomic::is_temp_artifact;
use lockbox_crypto::{
    decrypt_bytes, encrypt_bytes, is_encrypted, reencrypt_file, write_atomic, CryptoError,
    CryptoResult, EncryptionKey, MIN_ENCRYPTED_SIZE,
};

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("{}: {source} ({completed} files finished before the failure)", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: CryptoError,
        completed: usize,
    },

    #[error("scanning {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled after {completed} files")]
    Cancelled { completed: usize },
}

impl BulkError {
    /// Files fully processed before the run stopped.
    pub fn completed(&self) -> usize {
        match self {
            Self::File { completed, .. } | Self::Cancelled { completed } => *completed,
            Self::Scan { .. } => 0,
        }
    }
}

/// What to do to each file.
#[derive(Debug, Clone, Copy)]
pub enum FileTransform<'a> {
    /// Encrypt files that are not already encrypted.
    Encrypt(&'a EncryptionKey),
    /// Decrypt files that look encrypted.
    Decrypt(&'a EncryptionKey),
    /// Re-encrypt encrypted files from `old` to `new`.
    Rekey {
        old: &'a EncryptionKey,
        new: &'a EncryptionKey,
    },
}

impl FileTransform<'_> {
    /// Returns whether the file was rewritten.
    pub fn apply(&self, path: &Path) -> CryptoResult<bool> {
        match *self {
            Self::Encrypt(key) => {
                let data = std::fs::read(path).map_err(|e| CryptoError::io("reading", path, e))?;
                if is_encrypted(&data) {
                    return Ok(false);
                }
                write_atomic(path, &encrypt_bytes(key, &data)?)?;
                Ok(true)
            }
            Self::Decrypt(key) => {
                let data = std::fs::read(path).map_err(|e| CryptoError::io("reading", path, e))?;
                if !is_encrypted(&data) {
                    return Ok(false);
                }
                let plain = zeroize::Zeroizing::new(decrypt_bytes(key, &data)?);
                write_atomic(path, &plain)?;
                Ok(true)
            }
            Self::Rekey { old, new } => match reencrypt_file(old, new, path) {
                // Already moved by an earlier run that stopped partway.
                Err(CryptoError::DecryptionFailed) if opens_with(new, path)? => Ok(false),
                other => other,
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Encrypt(_) => "encrypt",
            Self::Decrypt(_) => "decrypt",
            Self::Rekey { .. } => "rekey",
        }
    }
}

fn opens_with(key: &EncryptionKey, path: &Path) -> CryptoResult<bool> {
    let data = std::fs::read(path).map_err(|e| CryptoError::io("reading", path, e))?;
    Ok(decrypt_bytes(key, &data).map(zeroize::Zeroizing::new).is_ok())
}

/// Outcome of a completed bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Files visited.
    pub scanned: usize,
    /// Files actually rewritten.
    pub changed: usize,
}

/// Every individually protected file: `*.json` directly under the tokens dir
/// and every regular file under the attachments tree. Missing dirs are empty.
pub fn collect_protected_files(layout: &ArchiveLayout) -> Result<Vec<PathBuf>, BulkError> {
    let mut files = Vec::new();

    if layout.tokens.is_dir() {
        for entry in read_dir(&layout.tokens)? {
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && path.extension().is_some_and(|e| e == "json") && !is_temp_artifact(&path)
            {
                files.push(path);
            }
        }
    }

    if layout.attachments.is_dir() {
        collect_tree(&layout.attachments, &mut files)?;
    }

    files.sort();
    Ok(files)
}

/// Whether any of `files` starts with an envelope header. Only the header
/// bytes are read.
pub fn any_encrypted(files: &[PathBuf]) -> Result<bool, BulkError> {
    for path in files {
        let mut head = Vec::with_capacity(MIN_ENCRYPTED_SIZE);
        std::fs::File::open(path)
            .and_then(|f| f.take(MIN_ENCRYPTED_SIZE as u64).read_to_end(&mut head))
            .map_err(|source| BulkError::Scan {
                path: path.clone(),
                source,
            })?;
        if is_encrypted(&head) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, BulkError> {
    let scan_err = |source| BulkError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::read_dir(dir)
        .map_err(scan_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(scan_err)
}

fn collect_tree(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BulkError> {
    for entry in read_dir(dir)? {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| BulkError::Scan {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            collect_tree(&path, out)?;
        } else if file_type.is_file() && !is_temp_artifact(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Apply `transform` to every file in parallel.
///
/// `on_file` is called once per finished file with the running count.
pub fn run(
    files: &[PathBuf],
    transform: FileTransform<'_>,
    cancel: &CancellationToken,
    on_file: &(dyn Fn(usize) + Sync),
) -> Result<BulkSummary, BulkError> {
    let completed = AtomicUsize::new(0);
    let changed = AtomicUsize::new(0);

    let result = files.par_iter().try_for_each(|path| {
        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled { completed: 0 });
        }
        let rewritten = transform.apply(path).map_err(|source| BulkError::File {
            path: path.clone(),
            source,
            completed: 0,
        })?;
        if rewritten {
            changed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %path.display(), op = transform.label(), "file rewritten");
        }
        on_file(completed.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(())
    });

    // Counts inside the closure race with other workers; report the final tally.
    let done = completed.load(Ordering::SeqCst);
    match result {
        Ok(()) => {
            let summary = BulkSummary {
                scanned: done,
                changed: changed.load(Ordering::SeqCst),
            };
            tracing::info!(
                op = transform.label(),
                scanned = summary.scanned,
                changed = summary.changed,
                "bulk file pass complete"
            );
            Ok(summary)
        }
        Err(BulkError::Cancelled { .. }) => {
            tracing::warn!(op = transform.label(), completed = done, "bulk file pass cancelled");
            Err(BulkError::Cancelled { completed: done })
        }
        Err(BulkError::File { path, source, .. }) => {
            tracing::error!(
                op = transform.label(),
                path = %path.display(),
                error = %source,
                "bulk file pass failed"
            );
            Err(BulkError::File {
                path,
                source,
                completed: done,
            })
        }
        Err(other) => Err(other),
    }
}
