//! Key administration flows: init, export, import, fingerprint.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use tempfile::TempDir;

use lockbox_core::LockboxConfig;
use lockbox_crypto::{CryptoError, EncryptionKey};
use lockbox_keys::{KeyContext, KeyError, KeySource, MemoryCredentialStore};
use lockbox_vault::{
    export_key, fingerprint, import_key, init_key, read_key_input, Archive, ExportTarget, KeyInput,
    VaultError,
};

fn archive_in(tmp: &TempDir) -> Archive {
    let mut config = LockboxConfig::default();
    config.data.data_dir = tmp.path().join("data");
    Archive::new(config, tmp.path().join("config.toml"))
        .with_credential_store(Arc::new(MemoryCredentialStore::default()))
}

#[tokio::test]
async fn init_keyring_enables_and_refuses_twice() {
    let tmp = TempDir::new().unwrap();
    let mut archive = archive_in(&tmp);
    let ctx = KeyContext::default();

    let placed = init_key(&mut archive, &ctx, None).await.unwrap();
    assert_eq!(placed.provider, "keyring");
    assert_eq!(placed.location, archive.scope());

    let saved = LockboxConfig::load(&archive.config_path).unwrap();
    assert!(saved.encryption.enabled);
    assert_eq!(saved.encryption.provider, "keyring");

    let stored = archive.keyring().get_key(&ctx).await.unwrap();
    assert_eq!(stored.fingerprint(), placed.fingerprint);
    assert_eq!(fingerprint(&archive, &ctx).await.unwrap(), placed.fingerprint);

    assert!(matches!(
        init_key(&mut archive, &ctx, None).await,
        Err(VaultError::AlreadyExists { provider: "keyring", .. })
    ));
}

#[tokio::test]
async fn init_keyfile_writes_private_file() {
    let tmp = TempDir::new().unwrap();
    let mut archive = archive_in(&tmp);
    let path = tmp.path().join("keys").join("lockbox.key");
    archive.config.encryption.keyfile.path = Some(path.clone());
    let ctx = KeyContext::default();

    let placed = init_key(&mut archive, &ctx, Some("keyfile")).await.unwrap();
    assert_eq!(placed.provider, "keyfile");

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let key = EncryptionKey::from_base64(text.trim()).unwrap();
    assert_eq!(key.fingerprint(), placed.fingerprint);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    assert_eq!(archive.config.encryption.provider, "keyfile");
    assert_eq!(fingerprint(&archive, &ctx).await.unwrap(), placed.fingerprint);
    assert!(matches!(
        init_key(&mut archive, &ctx, Some("keyfile")).await,
        Err(VaultError::AlreadyExists { provider: "keyfile", .. })
    ));
}

#[tokio::test]
async fn init_rejects_read_only_providers_and_missing_path() {
    let tmp = TempDir::new().unwrap();
    let mut archive = archive_in(&tmp);
    let ctx = KeyContext::default();

    for provider in ["env", "exec", "passphrase"] {
        assert!(matches!(
            init_key(&mut archive, &ctx, Some(provider)).await,
            Err(VaultError::UnsupportedProvider { .. })
        ));
    }
    assert!(matches!(
        init_key(&mut archive, &ctx, Some("keyfile")).await,
        Err(VaultError::KeyfilePathMissing)
    ));
    assert!(!archive.config_path.exists());
}

#[tokio::test]
async fn export_then_import_into_another_archive() {
    let tmp = TempDir::new().unwrap();
    let mut source = archive_in(&tmp);
    let ctx = KeyContext::default();
    let placed = init_key(&mut source, &ctx, None).await.unwrap();

    let backup = tmp.path().join("backup.txt");
    let exported = export_key(&source, &ctx, &ExportTarget::File(backup.clone()))
        .await
        .unwrap();
    assert_eq!(exported.fingerprint, placed.fingerprint);
    assert!(exported.key_b64.is_none());

    let to_stdout = export_key(&source, &ctx, &ExportTarget::Stdout).await.unwrap();
    let printed = to_stdout.key_b64.unwrap();
    assert_eq!(std::fs::read_to_string(&backup).unwrap().trim(), printed.as_str());

    let other_tmp = TempDir::new().unwrap();
    let mut target = archive_in(&other_tmp);
    let text = read_key_input(&KeyInput::File(backup)).unwrap();
    let imported = import_key(&mut target, &text, None, None).unwrap();
    assert_eq!(imported.provider, "keyring");
    assert_eq!(imported.fingerprint, placed.fingerprint);
    assert!(target.config.encryption.enabled);
    assert_eq!(fingerprint(&target, &ctx).await.unwrap(), placed.fingerprint);
}

#[tokio::test]
async fn import_validates_before_storing() {
    let tmp = TempDir::new().unwrap();
    let mut archive = archive_in(&tmp);
    let ctx = KeyContext::default();

    assert!(matches!(
        import_key(&mut archive, "%%% not base64 %%%", None, None),
        Err(VaultError::Crypto(CryptoError::InvalidKeyEncoding(_)))
    ));
    assert!(matches!(
        import_key(&mut archive, &B64.encode([1u8; 16]), None, None),
        Err(VaultError::Crypto(CryptoError::InvalidKeySize { got: 16, want: 32 }))
    ));
    assert!(matches!(
        import_key(&mut archive, &B64.encode([1u8; 32]), Some("env"), None),
        Err(VaultError::UnsupportedProvider { .. })
    ));

    assert!(matches!(
        archive.keyring().get_key(&ctx).await,
        Err(KeyError::KeyNotFound { .. })
    ));
    assert!(!archive.config.encryption.enabled);
}

#[tokio::test]
async fn import_to_keyfile_path_flag() {
    let tmp = TempDir::new().unwrap();
    let mut archive = archive_in(&tmp);
    let key = EncryptionKey::generate();
    let path = tmp.path().join("imported.key");

    let placed = import_key(
        &mut archive,
        key.to_base64().as_str(),
        Some("keyfile"),
        Some(&path),
    )
    .unwrap();
    assert_eq!(placed.provider, "keyfile");
    assert_eq!(placed.fingerprint, key.fingerprint());

    let saved = LockboxConfig::load(&archive.config_path).unwrap();
    assert_eq!(saved.encryption.provider, "keyfile");
    assert_eq!(saved.encryption.keyfile.path.as_deref(), Some(path.as_path()));
    assert_eq!(
        fingerprint(&archive, &KeyContext::default()).await.unwrap(),
        key.fingerprint()
    );
}

#[tokio::test]
async fn fingerprint_without_key_fails() {
    let tmp = TempDir::new().unwrap();
    let archive = archive_in(&tmp);
    assert!(matches!(
        fingerprint(&archive, &KeyContext::default()).await,
        Err(VaultError::Keys(KeyError::KeyNotFound { .. }))
    ));
}
