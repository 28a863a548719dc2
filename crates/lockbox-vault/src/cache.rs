use std::path::{Path, PathBuf};

/// Hook for derived data that embeds or depends on the archive key.
///
/// Called after rotation. Failure is logged by the caller and never fatal:
/// a stale cache is rebuilt from the store on next use.
pub trait CacheInvalidator: Send + Sync {
    /// Returns whether anything was removed.
    fn invalidate(&self) -> std::io::Result<bool>;
}

/// The analytics cache directory (`<data_dir>/analytics`).
#[derive(Debug, Clone)]
pub struct AnalyticsCache {
    dir: PathBuf,
}

impl AnalyticsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CacheInvalidator for AnalyticsCache {
    fn invalidate(&self) -> std::io::Result<bool> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::info!(path = %self.dir.display(), "cleared analytics cache");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
