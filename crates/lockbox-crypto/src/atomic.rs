//! Atomic file replacement: scoped temp file in the target's directory, then rename.
//!
//! A concurrent reader sees either the old file or the new one, never a
//! half-written target. If anything fails before the rename, the temp file is
//! removed when it goes out of scope and the target is untouched.
//!
//! Platform divergence: the guarantee rests on `rename(2)` replacing the
//! destination atomically within one filesystem. That holds on local POSIX
//! filesystems. It does not hold on Windows while another process has the
//! target open, nor on many network filesystems (NFS, SMB) where rename may be
//! non-atomic or fail outright. Those targets need a write-ahead marker plus
//! rename two-phase commit, which is not implemented here.

use std::io::Write;
use std::path::Path;

use crate::error::{CryptoError, CryptoResult};

/// Prefix of every temp file this crate creates. Bulk walkers skip these.
pub const TEMP_PREFIX: &str = ".lockbox-";

/// Replace `path` with `contents` atomically. The result is mode 0600 on Unix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> CryptoResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| CryptoError::io("creating temp file in", parent, e))?;

    tmp.write_all(contents)
        .map_err(|e| CryptoError::io("writing temp file for", path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CryptoError::io("setting permissions for", path, e))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| CryptoError::io("syncing temp file for", path, e))?;

    // On failure PersistError hands the temp file back; dropping it unlinks it.
    tmp.persist(path)
        .map_err(|e| CryptoError::io("renaming temp file onto", path, e.error))?;
    Ok(())
}

/// True for names produced by [`write_atomic`] that a crash left behind.
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}
