mod support;

use objvault_transform::metadata::ENC_KEY_ID;
use objvault_transform::{
    KeyStore, KeyStoreConfig, KeyStoreKeySource, MasterKeySource, MemoryKeyStore, Metadata,
    PemDirectoryKeyStore, TransformChain, TransformError,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use support::*;
use zeroize::Zeroizing;

fn pem_store() -> Arc<PemDirectoryKeyStore> {
    Arc::new(PemDirectoryKeyStore::open(keystore_dir()).unwrap())
}

fn passwords(aliases: &[(&str, &str)]) -> HashMap<String, Zeroizing<Vec<u8>>> {
    aliases
        .iter()
        .map(|(a, p)| (a.to_string(), Zeroizing::new(p.as_bytes().to_vec())))
        .collect()
}

#[test]
fn pem_directory_lists_certificates() {
    let store = pem_store();
    assert_eq!(store.aliases(), ["archive", "custom", "primary"]);

    let primary = store.certificate("primary").unwrap();
    assert_eq!(primary.subject_key_id(), Some(KEY_A_ID));
    let archive = store.certificate("archive").unwrap();
    assert_eq!(archive.subject_key_id(), None);
    assert_eq!(archive.key_id().unwrap(), KEY_B_ID);
    assert!(matches!(store.certificate("nope"), Err(TransformError::KeyStore(_))));
}

#[test]
fn key_ids_prefer_the_subject_key_identifier() {
    let source = KeyStoreKeySource::new(pem_store(), "primary", &keystore_passwords()).unwrap();

    assert_eq!(source.key_id_for("primary"), Some(KEY_A_ID));
    assert_eq!(source.key_id_for("archive"), Some(KEY_B_ID));
    // The custom certificate's SKI is not derived from its key.
    assert_eq!(source.key_id_for("custom"), Some(CUSTOM_SKI));
    assert_eq!(source.alias_for(CUSTOM_SKI), Some("custom"));
    assert_eq!(source.current_key_id(), KEY_A_ID);
    assert_eq!(source.current_alias().as_deref(), Some("primary"));

    let mut ids = vec![KEY_A_ID, KEY_B_ID, CUSTOM_SKI];
    ids.sort();
    assert_eq!(source.snapshot().key_ids(), ids);
}

#[test]
fn wrong_password_fails() {
    let store = pem_store();
    assert!(matches!(
        store.private_key("primary", b"not-the-secret"),
        Err(TransformError::KeyStore(_))
    ));
    let bad = passwords(&[("primary", "nope")]);
    assert!(matches!(
        KeyStoreKeySource::new(store, "primary", &bad),
        Err(TransformError::KeyStore(_))
    ));
}

#[test]
fn current_alias_must_exist_and_be_unlocked() {
    let only_archive = passwords(&[("archive", "archive-secret")]);
    assert!(matches!(
        KeyStoreKeySource::new(pem_store(), "primary", &only_archive),
        Err(TransformError::Configuration(_))
    ));
    assert!(matches!(
        KeyStoreKeySource::new(pem_store(), "missing", &keystore_passwords()),
        Err(TransformError::Configuration(_))
    ));
}

#[test]
fn objects_carry_the_subject_key_identifier() {
    let source = Arc::new(KeyStoreKeySource::new(pem_store(), "primary", &keystore_passwords()).unwrap());
    source.set_current_alias("custom").unwrap();
    let chain = TransformChain::default().with_encryption(Arc::new(
        objvault_transform::EncryptionFactory::new(
            source.clone(),
            &Default::default(),
            objvault_crypto::CryptoProvider::rust_crypto(),
        )
        .unwrap(),
    ));

    let (encoded, meta) = chain.encode(&b"keystore object"[..], &Metadata::new()).unwrap();
    assert_eq!(meta[ENC_KEY_ID], CUSTOM_SKI);
    let (reader, _) = chain.decode(Cursor::new(encoded), &meta).unwrap();
    assert_eq!(read_all(reader), b"keystore object");
}

#[test]
fn locked_aliases_unlock_on_demand() {
    let primary_only = passwords(&[("primary", "primary-secret")]);
    let source = KeyStoreKeySource::new(pem_store(), "primary", &primary_only).unwrap();
    assert!(!source.snapshot().contains(KEY_B_ID));
    assert!(matches!(
        source.set_current_alias("archive"),
        Err(TransformError::Configuration(_))
    ));

    source.unlock("archive", b"archive-secret").unwrap();
    assert!(source.snapshot().contains(KEY_B_ID));
    source.set_current_alias("archive").unwrap();
    assert_eq!(source.current_key_id(), KEY_B_ID);
}

#[test]
fn keystore_decodes_the_chain_fixture() {
    let source = KeyStoreKeySource::new(pem_store(), "primary", &keystore_passwords()).unwrap();
    let factory = objvault_transform::EncryptionFactory::new(
        Arc::new(source),
        &Default::default(),
        objvault_crypto::CryptoProvider::rust_crypto(),
    )
    .unwrap();
    let chain = TransformChain::default()
        .with_encryption(Arc::new(factory))
        .with_factory(compression());

    let (body, meta) = chain_object();
    let (reader, _) = chain.decode(Cursor::new(body), &meta).unwrap();
    assert_eq!(sha1_hex(&read_all(reader)), PLAINTEXT_SHA1);
}

#[test]
fn opens_from_config() {
    let dir = tempfile::tempdir().unwrap();
    for file in ["primary.crt", "primary.key"] {
        std::fs::copy(keystore_dir().join(file), dir.path().join(file)).unwrap();
    }
    // Anything other than a certificate is ignored.
    std::fs::write(dir.path().join("README"), "not a certificate").unwrap();

    let config = KeyStoreConfig {
        path: Some(dir.path().to_path_buf()),
        current_alias: Some("primary".to_string()),
    };
    let source = KeyStoreKeySource::from_config(&config, &keystore_passwords()).unwrap();
    assert_eq!(source.current_key_id(), KEY_A_ID);
    assert_eq!(source.snapshot().key_ids(), [KEY_A_ID]);

    let unset = KeyStoreConfig::default();
    assert!(matches!(
        KeyStoreKeySource::from_config(&unset, &keystore_passwords()),
        Err(TransformError::Configuration(_))
    ));
}

#[test]
fn missing_keystore_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        PemDirectoryKeyStore::open(dir.path().join("absent")),
        Err(TransformError::KeyStore(_))
    ));
}

#[test]
fn memory_keystore_indexes_by_fingerprint() {
    let mut store = MemoryKeyStore::new();
    store.insert("a", key_a(), b"pw-a");
    store.insert("b", key_b(), b"pw-b");
    let source = KeyStoreKeySource::new(
        Arc::new(store),
        "b",
        &passwords(&[("a", "pw-a"), ("b", "pw-b")]),
    )
    .unwrap();

    assert_eq!(source.key_id_for("a"), Some(KEY_A_ID));
    assert_eq!(source.current_key_id(), KEY_B_ID);
}
