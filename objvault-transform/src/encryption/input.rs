//! Decryption of stored objects.

use crate::config::VerificationPolicy;
use crate::encryption::keys::KeySnapshot;
use crate::error::{TransformError, TransformResult};
use crate::factory::Source;
use crate::metadata::{self, Metadata, ModeTag, optional_size, require};
use objvault_crypto::codec::decode_url_safe;
use objvault_crypto::{
    BLOCK_SIZE, ChecksumReader, CipherSpec, DecipherReader, KeyWrapAlgorithm, Transformation,
    unwrap_key, verify_metadata_signature,
};
use tracing::debug;

/// Builds a plaintext reader over `source`, an object encrypted as `tag`.
///
/// Under [`VerificationPolicy::Strict`] the signature is checked with the
/// recorded key before any other field is used, and the plaintext SHA-1 and
/// size are checked when the stream reaches EOF.
pub(crate) fn decrypting_reader<'a>(
    snapshot: &KeySnapshot,
    policy: VerificationPolicy,
    tag: &ModeTag,
    source: Source<'a>,
    meta: &Metadata,
) -> TransformResult<Source<'a>> {
    let transformation: Transformation = tag.config().parse()?;
    let key_id = require(meta, metadata::ENC_KEY_ID)?;
    let pair = snapshot
        .get(key_id)
        .ok_or_else(|| TransformError::UnknownKey(key_id.to_string()))?;

    if policy == VerificationPolicy::Strict {
        let signature = require(meta, metadata::ENC_SIGNATURE)?;
        verify_metadata_signature(meta, signature, pair.public())
            .map_err(|e| TransformError::SignatureInvalid(e.to_string()))?;
    }

    let key_wrap = key_wrap_algorithm(meta)?;
    let iv = decode_url_safe(require(meta, metadata::ENC_IV)?)
        .map_err(|e| TransformError::malformed(metadata::ENC_IV, e.to_string()))?;
    if iv.len() != BLOCK_SIZE {
        return Err(TransformError::malformed(
            metadata::ENC_IV,
            format!("expected {BLOCK_SIZE} bytes, got {}", iv.len()),
        ));
    }

    let key = unwrap_key(
        require(meta, metadata::ENC_OBJECT_KEY)?,
        key_wrap,
        transformation,
        pair.private(),
    )?;
    let spec = CipherSpec::for_key(tag.config(), &key)?;
    let plaintext = DecipherReader::new(source, &spec, &key, &iv)?;
    debug!("Decrypting object with key {key_id} ({policy:?})");

    match policy {
        VerificationPolicy::Strict => {
            let sha1 = require(meta, metadata::ENC_UNENCRYPTED_SHA1)?.to_string();
            let size = optional_size(meta, metadata::ENC_UNENCRYPTED_SIZE)?
                .ok_or_else(|| TransformError::MissingMetadata(metadata::ENC_UNENCRYPTED_SIZE.into()))?;
            Ok(Box::new(ChecksumReader::new(plaintext, Some(sha1), Some(size))))
        }
        VerificationPolicy::Lax => Ok(Box::new(plaintext)),
    }
}

/// Wrap algorithm recorded for an object; objects written before it was
/// recorded use the default.
pub(crate) fn key_wrap_algorithm(meta: &Metadata) -> TransformResult<KeyWrapAlgorithm> {
    match meta.get(metadata::ENC_KEY_WRAP) {
        Some(v) => Ok(v.parse()?),
        None => Ok(KeyWrapAlgorithm::default()),
    }
}
