//! Store migrations and content addressing across key states.

use std::path::Path;

use lockbox_crypto::EncryptionKey;
use lockbox_store::{
    decrypt_database, encrypt_database, rekey_database, target_path, AttachmentStore, Store,
    StoreError,
};
use tempfile::TempDir;

fn seed(path: &Path, key: Option<&EncryptionKey>) {
    let store = Store::open(path, key).unwrap();
    store
        .conn()
        .execute_batch(
            "CREATE TABLE messages (id INTEGER PRIMARY KEY, subject TEXT NOT NULL);
             INSERT INTO messages (subject) VALUES ('quarterly report'), ('lunch?');
             PRAGMA user_version = 7;",
        )
        .unwrap();
    store.close().unwrap();
}

fn subjects(path: &Path, key: Option<&EncryptionKey>) -> Vec<String> {
    let store = Store::open(path, key).unwrap();
    let mut stmt = store
        .conn()
        .prepare("SELECT subject FROM messages ORDER BY id")
        .unwrap();
    let rows = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

fn user_version(path: &Path, key: Option<&EncryptionKey>) -> i64 {
    let store = Store::open(path, key).unwrap();
    let v = store
        .conn()
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap();
    v
}

fn no_migration_leftovers(db: &Path) {
    for suffix in ["encrypted", "decrypted", "rotated"] {
        let target = target_path(db, suffix);
        assert!(!target.exists(), "{} left behind", target.display());
    }
}

#[test]
fn encrypt_then_decrypt_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("lockbox.db");
    let key = EncryptionKey::generate();
    seed(&db, None);

    encrypt_database(&db, &key).unwrap();
    no_migration_leftovers(&db);
    assert!(matches!(
        Store::open(&db, None),
        Err(StoreError::StoreWrongKeyOrNotEncrypted { .. })
    ));
    assert_eq!(subjects(&db, Some(&key)), ["quarterly report", "lunch?"]);
    assert_eq!(user_version(&db, Some(&key)), 7);

    decrypt_database(&db, &key).unwrap();
    no_migration_leftovers(&db);
    assert_eq!(subjects(&db, None), ["quarterly report", "lunch?"]);
    assert_eq!(user_version(&db, None), 7);
}

#[test]
fn rekey_moves_store_to_new_key() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("lockbox.db");
    let old = EncryptionKey::generate();
    let new = EncryptionKey::generate();
    seed(&db, Some(&old));

    rekey_database(&db, &old, &new).unwrap();
    no_migration_leftovers(&db);

    assert_eq!(subjects(&db, Some(&new)), ["quarterly report", "lunch?"]);
    assert!(matches!(
        Store::open(&db, Some(&old)),
        Err(StoreError::StoreWrongKeyOrNotEncrypted { .. })
    ));
}

#[test]
fn wrong_key_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("lockbox.db");
    let key = EncryptionKey::generate();
    seed(&db, Some(&key));
    let before = std::fs::read(&db).unwrap();

    let err =
        rekey_database(&db, &EncryptionKey::generate(), &EncryptionKey::generate()).unwrap_err();
    assert!(matches!(err, StoreError::StoreWrongKeyOrNotEncrypted { .. }));

    assert_eq!(std::fs::read(&db).unwrap(), before);
    no_migration_leftovers(&db);
    assert_eq!(subjects(&db, Some(&key)), ["quarterly report", "lunch?"]);
}

#[test]
fn encrypting_an_encrypted_store_fails_closed() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("lockbox.db");
    let key = EncryptionKey::generate();
    seed(&db, Some(&key));

    let err = encrypt_database(&db, &EncryptionKey::generate()).unwrap_err();
    assert!(matches!(err, StoreError::StoreWrongKeyOrNotEncrypted { .. }));
    assert_eq!(subjects(&db, Some(&key)), ["quarterly report", "lunch?"]);
}

#[test]
fn stale_target_from_failed_attempt_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("lockbox.db");
    let key = EncryptionKey::generate();
    seed(&db, None);
    std::fs::write(target_path(&db, "encrypted"), b"garbage from a crashed run").unwrap();

    encrypt_database(&db, &key).unwrap();
    assert_eq!(subjects(&db, Some(&key)), ["quarterly report", "lunch?"]);
    no_migration_leftovers(&db);
}

#[test]
fn dedup_identity_independent_of_encryption() {
    let tmp = TempDir::new().unwrap();
    let plain = AttachmentStore::new(tmp.path().join("plain"));
    let enc_a = AttachmentStore::new(tmp.path().join("a"));
    let enc_b = AttachmentStore::new(tmp.path().join("b"));
    let key_a = EncryptionKey::generate();
    let key_b = EncryptionKey::generate();
    let body = b"%PDF-1.7 invoice bytes".repeat(64);

    let addr_plain = plain.put(&body, None).unwrap();
    let addr_a = enc_a.put(&body, Some(&key_a)).unwrap();
    let addr_b = enc_b.put(&body, Some(&key_b)).unwrap();

    assert_eq!(addr_plain, addr_a);
    assert_eq!(addr_a, addr_b);
    assert_ne!(
        std::fs::read(enc_a.object_path(&addr_a)).unwrap(),
        std::fs::read(enc_b.object_path(&addr_b)).unwrap()
    );
    assert_eq!(enc_b.get(&addr_b, Some(&key_b)).unwrap(), body);
}
