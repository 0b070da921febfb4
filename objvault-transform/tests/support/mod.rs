//! Shared fixtures for the transform integration tests.
//!
//! Keys, ciphertexts and certificates under `tests/fixtures/` were produced
//! with OpenSSL, independently of this crate.

#![allow(dead_code)]

use objvault_crypto::{CryptoProvider, MasterKeyPair};
use objvault_transform::{
    BareKeySource, CompressionConfig, CompressionFactory, EncryptionConfig, EncryptionFactory,
    Metadata, TransformChain,
};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const KEY_A_ID: &str = "cb130a450abe76c647c559f0b6fda10c61feedeb";
pub const KEY_B_ID: &str = "f2b390c87d5d57a49d0d3300a3c4041b6db44a5a";
pub const KEY_1024_ID: &str = "155d9a5dad7f9664737b9d5913bc83b3d8c5cf33";
pub const KEY_512_ID: &str = "889367b72040dad1bbff630994c214ad17af5e15";

/// Subject Key Identifier written into `keystore/custom.crt`.
pub const CUSTOM_SKI: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f901234567";

pub const PLAINTEXT_SHA1: &str = "4cf028638bec9230662441a8444ffcbec161944a";
pub const PLAINTEXT_SIZE: usize = 91070;

pub fn key_a() -> MasterKeyPair {
    MasterKeyPair::from_pkcs8_pem(include_str!("../fixtures/master-2048-a.pem")).unwrap()
}

pub fn key_b() -> MasterKeyPair {
    MasterKeyPair::from_pkcs8_pem(include_str!("../fixtures/master-2048-b.pem")).unwrap()
}

pub fn key_1024() -> MasterKeyPair {
    MasterKeyPair::from_pkcs8_pem(include_str!("../fixtures/master-1024.pem")).unwrap()
}

pub fn key_512() -> MasterKeyPair {
    MasterKeyPair::from_pkcs8_pem(include_str!("../fixtures/master-512.pem")).unwrap()
}

pub fn plaintext() -> &'static [u8] {
    include_bytes!("../fixtures/fixture-plaintext.txt")
}

/// Single-stage object encrypted under key A, written without a key-wrap
/// field.
pub fn fixture_object() -> (Vec<u8>, Metadata) {
    (
        include_bytes!("../fixtures/fixture-ciphertext.bin").to_vec(),
        serde_json::from_str(include_str!("../fixtures/fixture-metadata.json")).unwrap(),
    )
}

/// `COMP:Deflate/5|ENC:AES/CBC/PKCS5Padding` object encrypted under key B.
pub fn chain_object() -> (Vec<u8>, Metadata) {
    (
        include_bytes!("../fixtures/chain-ciphertext.bin").to_vec(),
        serde_json::from_str(include_str!("../fixtures/chain-metadata.json")).unwrap(),
    )
}

pub fn keystore_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keystore")
}

pub fn keystore_passwords() -> std::collections::HashMap<String, Zeroizing<Vec<u8>>> {
    [
        ("primary", "primary-secret"),
        ("archive", "archive-secret"),
        ("custom", "custom-secret"),
    ]
    .into_iter()
    .map(|(alias, pw)| (alias.to_string(), Zeroizing::new(pw.as_bytes().to_vec())))
    .collect()
}

pub fn bare_keys(current: MasterKeyPair, others: Vec<MasterKeyPair>) -> Arc<BareKeySource> {
    Arc::new(BareKeySource::new(current, others).unwrap())
}

pub fn encryption(keys: Arc<BareKeySource>) -> Arc<EncryptionFactory> {
    encryption_with(keys, &EncryptionConfig::default())
}

pub fn encryption_with(keys: Arc<BareKeySource>, config: &EncryptionConfig) -> Arc<EncryptionFactory> {
    Arc::new(EncryptionFactory::new(keys, config, CryptoProvider::rust_crypto()).unwrap())
}

pub fn compression() -> Arc<CompressionFactory> {
    Arc::new(CompressionFactory::new(&CompressionConfig::default()).unwrap())
}

pub fn encrypting_chain(keys: Arc<BareKeySource>) -> TransformChain {
    TransformChain::default().with_encryption(encryption(keys))
}

pub fn compressing_chain(keys: Arc<BareKeySource>) -> TransformChain {
    encrypting_chain(keys).with_factory(compression())
}

pub fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Repetitive text that deflates well.
pub fn compressible(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
