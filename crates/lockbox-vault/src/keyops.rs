//! Key administration: init, export, import, fingerprint.

use std::io::Read;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use lockbox_crypto::{write_atomic, EncryptionKey, Fingerprint};
use lockbox_keys::{KeyContext, KeyError, KeySource};

use crate::archive::Archive;
use crate::error::{VaultError, VaultResult};

/// Where a key was put.
#[derive(Debug, Clone)]
pub struct KeyPlacement {
    pub provider: &'static str,
    /// Keyring scope or keyfile path.
    pub location: String,
    pub fingerprint: Fingerprint,
}

fn writable_provider(operation: &'static str, name: &str) -> VaultResult<&'static str> {
    match name {
        "" | "keyring" => Ok("keyring"),
        "keyfile" => Ok("keyfile"),
        other => Err(VaultError::UnsupportedProvider {
            operation,
            provider: other.to_string(),
        }),
    }
}

fn keyfile_path(archive: &Archive, flag: Option<&Path>) -> VaultResult<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| archive.config.encryption.keyfile.path.clone())
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(VaultError::KeyfilePathMissing)
}

fn enable_with(archive: &mut Archive, provider: &'static str, keyfile: Option<&Path>) {
    let enc = &mut archive.config.encryption;
    enc.enabled = true;
    enc.provider = provider.into();
    if let Some(path) = keyfile {
        enc.keyfile.path = Some(path.to_path_buf());
    }
}

/// Generate a key and store it in the keyring or a keyfile, then mark
/// encryption enabled. Refuses if a key is already present.
pub async fn init_key(
    archive: &mut Archive,
    ctx: &KeyContext,
    provider: Option<&str>,
) -> VaultResult<KeyPlacement> {
    let requested = provider.unwrap_or_else(|| archive.config.encryption.provider_name());
    let provider = writable_provider("key init", requested)?;
    let key = EncryptionKey::generate();

    let location = match provider {
        "keyring" => {
            let keyring = archive.keyring();
            match keyring.get_key(ctx).await {
                Ok(_) => {
                    return Err(VaultError::AlreadyExists {
                        provider,
                        location: archive.scope(),
                    })
                }
                Err(KeyError::KeyNotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            keyring.set_key(&key)?;
            archive.scope()
        }
        _ => {
            let path = keyfile_path(archive, None)?;
            let keyfile = archive.keyfile(&path);
            if keyfile.path().exists() {
                return Err(VaultError::AlreadyExists {
                    provider,
                    location: keyfile.path().display().to_string(),
                });
            }
            keyfile.set_key(&key)?;
            keyfile.path().display().to_string()
        }
    };

    enable_with(archive, provider, None);
    archive.save()?;

    let fingerprint = key.fingerprint();
    tracing::info!(provider, %location, %fingerprint, "initialized encryption key");
    Ok(KeyPlacement {
        provider,
        location,
        fingerprint,
    })
}

/// Destination for `key export`.
#[derive(Debug, Clone)]
pub enum ExportTarget {
    /// Written as `base64 + "\n"`, mode 0600.
    File(PathBuf),
    /// Returned to the caller to print.
    Stdout,
}

#[derive(Debug)]
pub struct Exported {
    pub fingerprint: Fingerprint,
    /// Present for [`ExportTarget::Stdout`].
    pub key_b64: Option<Zeroizing<String>>,
}

pub async fn export_key(
    archive: &Archive,
    ctx: &KeyContext,
    target: &ExportTarget,
) -> VaultResult<Exported> {
    let key = archive.provider()?.get_key(ctx).await?;
    let encoded = key.to_base64();
    let key_b64 = match target {
        ExportTarget::File(path) => {
            let mut line = Zeroizing::new(String::with_capacity(encoded.len() + 1));
            line.push_str(&encoded);
            line.push('\n');
            write_atomic(path, line.as_bytes())?;
            tracing::info!(
                path = %path.display(),
                fingerprint = %key.fingerprint(),
                "exported key"
            );
            None
        }
        ExportTarget::Stdout => Some(encoded),
    };
    Ok(Exported {
        fingerprint: key.fingerprint(),
        key_b64,
    })
}

/// Source for `key import`.
#[derive(Debug, Clone)]
pub enum KeyInput {
    File(PathBuf),
    Stdin,
}

/// Read base64 key text, trimmed.
pub fn read_key_input(input: &KeyInput) -> VaultResult<Zeroizing<String>> {
    let mut raw = Zeroizing::new(String::new());
    match input {
        KeyInput::File(path) => {
            let mut f =
                std::fs::File::open(path).map_err(|e| VaultError::io("opening", path, e))?;
            f.read_to_string(&mut raw)
                .map_err(|e| VaultError::io("reading", path, e))?;
        }
        KeyInput::Stdin => {
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|e| VaultError::io("reading", Path::new("<stdin>"), e))?;
        }
    }
    Ok(Zeroizing::new(raw.trim().to_string()))
}

/// Read and decode a base64 key, e.g. the one printed by an unfinished rotation.
pub fn load_key(input: &KeyInput) -> VaultResult<EncryptionKey> {
    let encoded = read_key_input(input)?;
    Ok(EncryptionKey::from_base64(&encoded)?)
}

/// Validate `encoded` and store it in the keyring or a keyfile. Encryption is
/// enabled in the config if it was not already.
pub fn import_key(
    archive: &mut Archive,
    encoded: &str,
    provider: Option<&str>,
    keyfile_flag: Option<&Path>,
) -> VaultResult<KeyPlacement> {
    let key = EncryptionKey::from_base64(encoded)?;

    let requested = provider.unwrap_or_else(|| archive.config.encryption.provider_name());
    let provider = writable_provider("key import", requested)?;

    let location = match provider {
        "keyring" => {
            archive.keyring().set_key(&key)?;
            archive.scope()
        }
        _ => {
            let path = keyfile_path(archive, keyfile_flag)?;
            let keyfile = archive.keyfile(&path);
            keyfile.set_key(&key)?;
            keyfile.path().display().to_string()
        }
    };

    if !archive.config.encryption.enabled {
        enable_with(archive, provider, keyfile_flag);
        archive.save()?;
    }

    let fingerprint = key.fingerprint();
    tracing::info!(provider, %location, %fingerprint, "imported encryption key");
    Ok(KeyPlacement {
        provider,
        location,
        fingerprint,
    })
}

pub async fn fingerprint(archive: &Archive, ctx: &KeyContext) -> VaultResult<Fingerprint> {
    Ok(archive.provider()?.get_key(ctx).await?.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_provider() {
        assert_eq!(writable_provider("x", "").unwrap(), "keyring");
        assert_eq!(writable_provider("x", "keyfile").unwrap(), "keyfile");
        assert!(matches!(
            writable_provider("key init", "env"),
            Err(VaultError::UnsupportedProvider { operation: "key init", .. })
        ));
    }

    #[test]
    fn test_read_key_input_trims() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("backup.txt");
        std::fs::write(&path, "  abc=\n\n").unwrap();
        assert_eq!(read_key_input(&KeyInput::File(path)).unwrap().as_str(), "abc=");
    }

    #[test]
    fn test_load_key_decodes_backup() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("new.key");
        let key = EncryptionKey::generate();
        std::fs::write(&path, format!("{}\n", key.to_base64().as_str())).unwrap();
        let loaded = load_key(&KeyInput::File(path.clone())).unwrap();
        assert_eq!(loaded.fingerprint(), key.fingerprint());

        std::fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            load_key(&KeyInput::File(path)),
            Err(VaultError::Crypto(_))
        ));
    }
}
