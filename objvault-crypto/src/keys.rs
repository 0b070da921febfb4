//! RSA master key pairs and their fingerprints.
//!
//! A fingerprint is the lower-case hex SHA-1 of the PKCS#1 `RSAPublicKey`
//! DER encoding (`SEQUENCE { INTEGER n, INTEGER e }`). Stored objects name
//! the master key that wrapped them by this value, so the encoding must stay
//! byte-for-byte stable.

use crate::error::{CryptoError, CryptoResult};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::fmt;

/// DER-encodes an RSA public key as a PKCS#1 `RSAPublicKey`.
pub fn public_key_der(key: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::InvalidKey(format!("public key DER encoding failed: {e}")))
}

/// Computes the hex fingerprint of an RSA public key.
pub fn fingerprint(key: &RsaPublicKey) -> CryptoResult<String> {
    let der = public_key_der(key)?;
    Ok(hex::encode(Sha1::digest(&der)))
}

/// RSA key pair used to wrap and unwrap object keys and to sign metadata.
#[derive(Clone)]
pub struct MasterKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl MasterKeyPair {
    pub fn new(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Generates a new key pair from the operating system RNG.
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| CryptoError::InvalidKey(format!("RSA key generation failed: {e}")))?;
        Ok(Self::new(private))
    }

    /// Loads an unencrypted PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> CryptoResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid PKCS#8 private key: {e}")))?;
        Ok(Self::new(private))
    }

    /// Loads a password-protected (PBES2) PKCS#8 PEM private key.
    pub fn from_encrypted_pkcs8_pem(pem: &str, password: &[u8]) -> CryptoResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password).map_err(|e| {
            CryptoError::InvalidKey(format!("cannot open encrypted private key: {e}"))
        })?;
        Ok(Self::new(private))
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Modulus length in bits.
    pub fn key_size_bits(&self) -> usize {
        self.public.n().bits()
    }

    pub fn fingerprint(&self) -> CryptoResult<String> {
        fingerprint(&self.public)
    }
}

impl fmt::Debug for MasterKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyPair")
            .field("bits", &self.key_size_bits())
            .finish_non_exhaustive()
    }
}
