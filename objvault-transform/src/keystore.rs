//! Password-protected master key storage.
//!
//! A keystore maps aliases to a certificate (public half, optionally with a
//! Subject Key Identifier) and a private key unlocked by a password.

use crate::error::{TransformError, TransformResult};
use objvault_crypto::{MasterKeyPair, RsaPublicKey, fingerprint};
use rsa::pkcs8::DecodePublicKey;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use x509_cert::Certificate;
use x509_cert::der::{DecodePem, Encode};
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use zeroize::Zeroizing;

const CERT_EXTENSION: &str = "crt";
const KEY_EXTENSION: &str = "key";

/// Public half of a keystore entry.
#[derive(Clone, Debug)]
pub struct CertificateInfo {
    public_key: RsaPublicKey,
    subject_key_id: Option<String>,
}

impl CertificateInfo {
    pub fn new(public_key: RsaPublicKey, subject_key_id: Option<String>) -> Self {
        Self {
            public_key,
            subject_key_id,
        }
    }

    /// Parses a PEM X.509 certificate holding an RSA key.
    pub fn from_pem(pem: &[u8]) -> TransformResult<Self> {
        let cert = Certificate::from_pem(pem)
            .map_err(|e| TransformError::KeyStore(format!("invalid certificate: {e}")))?;
        let tbs = &cert.tbs_certificate;

        let spki = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| TransformError::KeyStore(format!("invalid public key info: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| TransformError::KeyStore(format!("certificate key is not RSA: {e}")))?;

        let subject_key_id = tbs
            .get::<SubjectKeyIdentifier>()
            .map_err(|e| TransformError::KeyStore(format!("bad subject key identifier: {e}")))?
            .map(|(_, ski)| hex::encode(ski.0.as_bytes()));

        Ok(Self::new(public_key, subject_key_id))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn subject_key_id(&self) -> Option<&str> {
        self.subject_key_id.as_deref()
    }

    /// Key id recorded in object metadata: the Subject Key Identifier when
    /// the certificate has one, else the public key fingerprint.
    pub fn key_id(&self) -> TransformResult<String> {
        match &self.subject_key_id {
            Some(ski) => Ok(ski.clone()),
            None => Ok(fingerprint(&self.public_key)?),
        }
    }
}

pub trait KeyStore: Send + Sync {
    /// All aliases, sorted.
    fn aliases(&self) -> Vec<String>;

    fn certificate(&self, alias: &str) -> TransformResult<CertificateInfo>;

    /// Unlocks the private key for `alias`.
    fn private_key(&self, alias: &str, password: &[u8]) -> TransformResult<MasterKeyPair>;
}

/// Directory of `<alias>.crt` PEM certificates with matching
/// `<alias>.key` encrypted PKCS#8 private keys.
#[derive(Debug)]
pub struct PemDirectoryKeyStore {
    dir: PathBuf,
    certificates: BTreeMap<String, CertificateInfo>,
}

impl PemDirectoryKeyStore {
    /// Reads every certificate in `dir`. Private keys are read on demand.
    pub fn open(dir: impl AsRef<Path>) -> TransformResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            TransformError::KeyStore(format!("cannot open keystore {}: {e}", dir.display()))
        })?;

        let mut certificates = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CERT_EXTENSION) {
                continue;
            }
            let Some(alias) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let pem = std::fs::read(&path)?;
            let info = CertificateInfo::from_pem(&pem).map_err(|e| {
                TransformError::KeyStore(format!("{}: {e}", path.display()))
            })?;
            certificates.insert(alias.to_string(), info);
        }

        debug!(
            "Opened keystore {} with {} certificates",
            dir.display(),
            certificates.len()
        );
        Ok(Self { dir, certificates })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl KeyStore for PemDirectoryKeyStore {
    fn aliases(&self) -> Vec<String> {
        self.certificates.keys().cloned().collect()
    }

    fn certificate(&self, alias: &str) -> TransformResult<CertificateInfo> {
        self.certificates
            .get(alias)
            .cloned()
            .ok_or_else(|| TransformError::KeyStore(format!("no certificate for alias {alias}")))
    }

    fn private_key(&self, alias: &str, password: &[u8]) -> TransformResult<MasterKeyPair> {
        let path = self.dir.join(format!("{alias}.{KEY_EXTENSION}"));
        let pem = Zeroizing::new(std::fs::read_to_string(&path).map_err(|e| {
            TransformError::KeyStore(format!("no private key for alias {alias}: {e}"))
        })?);
        MasterKeyPair::from_encrypted_pkcs8_pem(&pem, password)
            .map_err(|e| TransformError::KeyStore(format!("cannot unlock alias {alias}: {e}")))
    }
}

struct MemoryEntry {
    certificate: CertificateInfo,
    pair: MasterKeyPair,
    password: Zeroizing<Vec<u8>>,
}

/// In-memory keystore, mainly for tests and embedding.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: BTreeMap<String, MemoryEntry>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key pair whose certificate has no Subject Key Identifier.
    pub fn insert(&mut self, alias: impl Into<String>, pair: MasterKeyPair, password: &[u8]) {
        let certificate = CertificateInfo::new(pair.public().clone(), None);
        self.insert_with_certificate(alias, certificate, pair, password);
    }

    pub fn insert_with_certificate(
        &mut self,
        alias: impl Into<String>,
        certificate: CertificateInfo,
        pair: MasterKeyPair,
        password: &[u8],
    ) {
        self.entries.insert(
            alias.into(),
            MemoryEntry {
                certificate,
                pair,
                password: Zeroizing::new(password.to_vec()),
            },
        );
    }
}

impl KeyStore for MemoryKeyStore {
    fn aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn certificate(&self, alias: &str) -> TransformResult<CertificateInfo> {
        self.entries
            .get(alias)
            .map(|e| e.certificate.clone())
            .ok_or_else(|| TransformError::KeyStore(format!("no certificate for alias {alias}")))
    }

    fn private_key(&self, alias: &str, password: &[u8]) -> TransformResult<MasterKeyPair> {
        let entry = self
            .entries
            .get(alias)
            .ok_or_else(|| TransformError::KeyStore(format!("no private key for alias {alias}")))?;
        if entry.password.as_slice() != password {
            return Err(TransformError::KeyStore(format!(
                "cannot unlock alias {alias}: wrong password"
            )));
        }
        Ok(entry.pair.clone())
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("aliases", &self.aliases())
            .finish()
    }
}
