//! Explicit handle to the cryptographic backend.
//!
//! Factories receive a `CryptoProvider` instead of consulting process-wide
//! state. It decides which content ciphers are available and is the only
//! source of key and IV material.

use crate::cipher::{CipherSpec, ObjectKey, Transformation};
use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use rand::rngs::OsRng;

#[derive(Clone, Debug)]
pub struct CryptoProvider {
    name: &'static str,
    transformations: Vec<Transformation>,
}

impl CryptoProvider {
    /// The RustCrypto backend with the operating system RNG.
    pub fn rust_crypto() -> Self {
        Self {
            name: "rustcrypto",
            transformations: vec![Transformation::AesCbcPkcs5],
        }
    }

    /// A provider limited to `transformations`. Mostly useful in tests.
    pub fn with_transformations(name: &'static str, transformations: Vec<Transformation>) -> Self {
        Self {
            name,
            transformations,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn supports(&self, spec: &CipherSpec) -> bool {
        self.transformations.contains(&spec.transformation())
    }

    /// Fails with `UnsupportedCipher` if this provider cannot run `spec`.
    pub fn ensure_supported(&self, spec: &CipherSpec) -> CryptoResult<()> {
        if self.supports(spec) {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedCipher(format!(
                "{} not available from provider {}",
                spec.name(),
                self.name
            )))
        }
    }

    pub fn generate_key(&self, spec: &CipherSpec) -> CryptoResult<ObjectKey> {
        self.ensure_supported(spec)?;
        Ok(ObjectKey::generate(spec, &mut OsRng))
    }

    pub fn generate_iv(&self, spec: &CipherSpec) -> Vec<u8> {
        let mut iv = vec![0u8; spec.iv_len()];
        OsRng.fill_bytes(&mut iv);
        iv
    }
}

impl Default for CryptoProvider {
    fn default() -> Self {
        Self::rust_crypto()
    }
}
