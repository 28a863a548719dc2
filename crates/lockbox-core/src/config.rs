use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{LockboxError, LockboxResult};

/// Default environment variable read by the `env` key provider.
pub const DEFAULT_KEY_ENV_VAR: &str = "LOCKBOX_ENCRYPTION_KEY";

/// Default deadline for the `exec` key provider, in seconds.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Provider names accepted in `[encryption] provider`.
pub const PROVIDER_NAMES: &[&str] = &["keyring", "keyfile", "env", "passphrase", "exec"];

/// Top-level archive configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockboxConfig {
    pub data: DataConfig,
    pub encryption: EncryptionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Archive root (default: ~/.lockbox)
    pub data_dir: PathBuf,
    /// Relational store path (default: <data_dir>/lockbox.db)
    pub database: Option<PathBuf>,
}

/// Encryption-at-rest configuration.
///
/// `enabled` doubles as the redundant record of the store's state: when it is
/// true the relational store is keyed and must never be opened without a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// One of `keyring`, `keyfile`, `env`, `passphrase`, `exec` (empty = keyring)
    pub provider: String,
    pub keyfile: KeyfileConfig,
    pub exec: ExecConfig,
    pub env: EnvConfig,
    pub passphrase: PassphraseConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyfileConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Shell command whose stdout is the base64 key
    pub command: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub var: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassphraseConfig {
    /// Base64 salt, at least 16 bytes once decoded
    pub salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.lockbox"),
            database: None,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "keyring".into(),
            keyfile: KeyfileConfig::default(),
            exec: ExecConfig::default(),
            env: EnvConfig::default(),
            passphrase: PassphraseConfig::default(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            var: DEFAULT_KEY_ENV_VAR.into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl EncryptionConfig {
    /// Provider name with the empty-string default applied.
    pub fn provider_name(&self) -> &str {
        if self.provider.is_empty() {
            "keyring"
        } else {
            &self.provider
        }
    }
}

/// Resolved on-disk locations of every protected artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub attachments: PathBuf,
    pub tokens: PathBuf,
    /// Derived analytic cache, rebuilt lazily from the store
    pub analytics: PathBuf,
}

impl ArchiveLayout {
    pub fn from_data_dir(data_dir: &Path, database: Option<&Path>) -> Self {
        let data_dir = expand_tilde(data_dir);
        let database = database
            .map(expand_tilde)
            .unwrap_or_else(|| data_dir.join("lockbox.db"));
        Self {
            attachments: data_dir.join("attachments"),
            tokens: data_dir.join("tokens"),
            analytics: data_dir.join("analytics"),
            database,
            data_dir,
        }
    }
}

impl LockboxConfig {
    /// Load the config at `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> LockboxResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| LockboxError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| LockboxError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist the config atomically (temp file in the same directory, then rename).
    pub fn save(&self, path: &Path) -> LockboxResult<()> {
        let content = toml::to_string_pretty(self)?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".config-")
            .tempfile_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockboxError::Io(e.error))?;

        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::from_data_dir(&self.data.data_dir, self.data.database.as_deref())
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Default config location: `~/.lockbox/config.toml`
pub fn default_config_path() -> PathBuf {
    home_dir().join(".lockbox").join("config.toml")
}
