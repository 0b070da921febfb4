//! Tamper-evident signatures over encryption metadata.
//!
//! Only fields whose key starts with [`SIGNED_FIELD_PREFIX`] are covered.
//! Each is rendered as `key:value\n` with the key lower-cased, and the lines
//! are concatenated in key order. The signature is SHA256withRSA (PKCS#1 v1.5)
//! over that string.

use crate::codec::{decode_url_safe, encode_url_safe};
use crate::error::{CryptoError, CryptoResult};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Prefix of every metadata field covered by the signature.
pub const SIGNED_FIELD_PREFIX: &str = "x-emc-enc-";

/// Metadata field holding the signature itself. Never signed.
pub const SIGNATURE_FIELD: &str = "x-emc-enc-metadata-signature";

/// Renders the canonical string that gets signed.
pub fn canonical_metadata<'a, I>(metadata: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let fields: BTreeMap<String, &str> = metadata
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .filter(|(k, _)| k.starts_with(SIGNED_FIELD_PREFIX) && k != SIGNATURE_FIELD)
        .collect();

    fields
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect()
}

/// Signs the canonical form of `metadata` and returns the base64url signature.
pub fn sign_metadata<'a, I>(metadata: I, private: &RsaPrivateKey) -> CryptoResult<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let hashed = Sha256::digest(canonical_metadata(metadata).as_bytes());
    let signature = private
        .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
        .map_err(|e| CryptoError::Signature(format!("signing failed: {e}")))?;
    Ok(encode_url_safe(&signature))
}

/// Checks `signature` against the canonical form of `metadata`.
pub fn verify_metadata_signature<'a, I>(
    metadata: I,
    signature: &str,
    public: &RsaPublicKey,
) -> CryptoResult<()>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let signature = decode_url_safe(signature)?;
    let hashed = Sha256::digest(canonical_metadata(metadata).as_bytes());
    public
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature)
        .map_err(|_| CryptoError::Signature("metadata signature does not verify".to_string()))
}
