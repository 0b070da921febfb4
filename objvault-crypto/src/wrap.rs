//! RSA wrapping of per-object keys.

use crate::cipher::{ObjectKey, Transformation};
use crate::codec::{decode_url_safe, encode_url_safe};
use crate::error::{CryptoError, CryptoResult};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fmt;
use std::str::FromStr;

/// Algorithm used to wrap an object key with a master key.
///
/// Objects written before the wrap algorithm was recorded in metadata carry
/// no value; those use [`KeyWrapAlgorithm::default`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KeyWrapAlgorithm {
    #[default]
    RsaPkcs1,
}

impl KeyWrapAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyWrapAlgorithm::RsaPkcs1 => "RSA/ECB/PKCS1Padding",
        }
    }
}

impl FromStr for KeyWrapAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        if s.trim().eq_ignore_ascii_case("RSA/ECB/PKCS1Padding") {
            Ok(KeyWrapAlgorithm::RsaPkcs1)
        } else {
            Err(CryptoError::UnsupportedKeyWrap(s.to_string()))
        }
    }
}

impl fmt::Display for KeyWrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wraps `key` under `public` and returns the base64url ciphertext.
pub fn wrap_key(
    key: &ObjectKey,
    public: &RsaPublicKey,
    algorithm: KeyWrapAlgorithm,
) -> CryptoResult<String> {
    let wrapped = match algorithm {
        KeyWrapAlgorithm::RsaPkcs1 => public
            .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("key wrap failed: {e}")))?,
    };
    Ok(encode_url_safe(&wrapped))
}

/// Reverses [`wrap_key`]. The unwrapped key must have a length
/// `transformation` accepts; a wrong master key surfaces as
/// [`CryptoError::Decryption`].
pub fn unwrap_key(
    encoded: &str,
    algorithm: KeyWrapAlgorithm,
    transformation: Transformation,
    private: &RsaPrivateKey,
) -> CryptoResult<ObjectKey> {
    let wrapped = decode_url_safe(encoded)?;
    let raw = match algorithm {
        KeyWrapAlgorithm::RsaPkcs1 => private
            .decrypt(Pkcs1v15Encrypt, &wrapped)
            .map_err(|e| CryptoError::Decryption(format!("key unwrap failed: {e}")))?,
    };
    ObjectKey::for_transformation(raw, transformation)
}
