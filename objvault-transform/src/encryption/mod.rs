//! Envelope encryption transform (`ENC`).
//!
//! Every object gets a fresh AES key, wrapped with the current RSA master
//! key and stored in metadata next to a signature over the encryption
//! fields. Rotating the master key only re-wraps object keys ([`rekey`]);
//! ciphertext is never rewritten.
//!
//! [`rekey`]: EncryptionFactory::rekey

mod input;
pub mod keys;
mod output;

pub use keys::{BareKeySource, KeySnapshot, KeyStoreKeySource, MasterKeySource};
pub use output::{EncryptionOutputTransform, EncryptionPullTransform};

use crate::config::{EncryptionConfig, VerificationPolicy};
use crate::error::{TransformError, TransformResult};
use crate::factory::{OutputTransform, PullTransform, Sink, Source, TransformFactory};
use crate::metadata::{self, Metadata, ModeTag, require};
use objvault_crypto::{
    CipherSpec, CryptoProvider, KeyWrapAlgorithm, Transformation, sign_metadata, unwrap_key,
    verify_metadata_signature, wrap_key,
};
use output::EnvelopeHeader;
use std::sync::Arc;
use tracing::debug;

/// Class tag of the encryption transform.
pub const CLASS_TAG: &str = "ENC";

/// Outcome of [`EncryptionFactory::rekey`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RekeyOutcome {
    /// Updated metadata; the stored content is unchanged.
    Rekeyed(Metadata),
    /// The object is already wrapped under the current master key.
    AlreadyCurrent,
}

pub struct EncryptionFactory {
    keys: Arc<dyn MasterKeySource>,
    spec: CipherSpec,
    priority: i32,
    verification: VerificationPolicy,
    key_wrap: KeyWrapAlgorithm,
    provider: CryptoProvider,
}

impl EncryptionFactory {
    /// Fails with `Configuration` if the cipher is unknown or `provider`
    /// cannot run it.
    pub fn new(
        keys: Arc<dyn MasterKeySource>,
        config: &EncryptionConfig,
        provider: CryptoProvider,
    ) -> TransformResult<Self> {
        let spec = config.cipher_spec()?;
        provider
            .ensure_supported(&spec)
            .map_err(|e| TransformError::Configuration(e.to_string()))?;
        debug!(
            "Encryption factory: {} {}-bit, priority {}, {:?} verification, provider {}",
            spec.name(),
            spec.key_size_bits(),
            config.priority,
            config.verification,
            provider.name()
        );
        Ok(Self {
            keys,
            spec,
            priority: config.priority,
            verification: config.verification,
            key_wrap: KeyWrapAlgorithm::default(),
            provider,
        })
    }

    pub fn cipher_spec(&self) -> &CipherSpec {
        &self.spec
    }

    pub fn verification(&self) -> VerificationPolicy {
        self.verification
    }

    pub fn key_source(&self) -> &Arc<dyn MasterKeySource> {
        &self.keys
    }

    /// Fingerprint of the key new objects are encrypted under.
    pub fn current_key_id(&self) -> String {
        self.keys.current_key_id()
    }

    fn header(&self) -> TransformResult<(EnvelopeHeader, objvault_crypto::ObjectKey)> {
        EnvelopeHeader::generate(self.keys.snapshot(), &self.spec, &self.provider, self.key_wrap)
    }

    /// Typed push-mode encoder, for callers that want `digest()` and
    /// `byte_count()` without going through a chain.
    pub fn output_transform<'a>(&self, sink: Sink<'a>) -> TransformResult<EncryptionOutputTransform<'a>> {
        let (header, key) = self.header()?;
        EncryptionOutputTransform::new(sink, header, &self.spec, &key)
    }

    /// Typed pull-mode encoder.
    pub fn pull_transform<'a>(&self, source: Source<'a>) -> TransformResult<EncryptionPullTransform<'a>> {
        let (header, key) = self.header()?;
        EncryptionPullTransform::new(source, header, &self.spec, &key)
    }

    /// Re-wraps an object's key under the current master key.
    ///
    /// Only the key id, wrapped key, wrap algorithm and signature change.
    /// Under strict verification the existing signature must hold first.
    pub fn rekey(&self, meta: &Metadata) -> TransformResult<RekeyOutcome> {
        let snapshot = self.keys.snapshot();
        let old_id = require(meta, metadata::ENC_KEY_ID)?;
        if old_id == snapshot.current_id() {
            debug!("Object already wrapped under {old_id}, skipping rekey");
            return Ok(RekeyOutcome::AlreadyCurrent);
        }
        let old_pair = snapshot
            .get(old_id)
            .ok_or_else(|| TransformError::UnknownKey(old_id.to_string()))?;

        if self.verification == VerificationPolicy::Strict {
            let signature = require(meta, metadata::ENC_SIGNATURE)?;
            verify_metadata_signature(meta, signature, old_pair.public())
                .map_err(|e| TransformError::SignatureInvalid(e.to_string()))?;
        }

        let transformation = encryption_tag(meta)?
            .map(|tag| tag.config().parse::<Transformation>())
            .transpose()?
            .unwrap_or(self.spec.transformation());
        let object_key = unwrap_key(
            require(meta, metadata::ENC_OBJECT_KEY)?,
            input::key_wrap_algorithm(meta)?,
            transformation,
            old_pair.private(),
        )?;

        let current = snapshot.current();
        let mut updated = meta.clone();
        updated.remove(metadata::ENC_SIGNATURE);
        updated.insert(
            metadata::ENC_OBJECT_KEY.into(),
            wrap_key(&object_key, current.public(), self.key_wrap)?,
        );
        updated.insert(metadata::ENC_KEY_ID.into(), snapshot.current_id().to_string());
        updated.insert(metadata::ENC_KEY_WRAP.into(), self.key_wrap.to_string());
        let signature = sign_metadata(&updated, current.private())?;
        updated.insert(metadata::ENC_SIGNATURE.into(), signature);

        debug!("Rekeyed object from {old_id} to {}", snapshot.current_id());
        Ok(RekeyOutcome::Rekeyed(updated))
    }
}

/// The `ENC` tag of an object's mode list, if any.
fn encryption_tag(meta: &Metadata) -> TransformResult<Option<ModeTag>> {
    let Some(list) = meta.get(metadata::TRANSFORM_MODE) else {
        return Ok(None);
    };
    Ok(ModeTag::parse_list(list)?
        .into_iter()
        .find(|tag| tag.class() == CLASS_TAG))
}

impl TransformFactory for EncryptionFactory {
    fn class_tag(&self) -> &str {
        CLASS_TAG
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn mode_tag(&self) -> ModeTag {
        ModeTag::new(CLASS_TAG, self.spec.name())
    }

    fn wrap_sink<'a>(
        &self,
        sink: Sink<'a>,
        _metadata: &Metadata,
    ) -> TransformResult<Box<dyn OutputTransform + 'a>> {
        Ok(Box::new(self.output_transform(sink)?))
    }

    fn wrap_source<'a>(
        &self,
        source: Source<'a>,
        _metadata: &Metadata,
    ) -> TransformResult<Box<dyn PullTransform + 'a>> {
        Ok(Box::new(self.pull_transform(source)?))
    }

    /// Accepts `ENC` tags with a cipher the provider runs, for objects whose
    /// key id is one of this factory's decryption keys.
    fn can_decode(&self, tag: &ModeTag, meta: &Metadata) -> bool {
        if tag.class() != CLASS_TAG {
            return false;
        }
        let Ok(transformation) = tag.config().parse::<Transformation>() else {
            return false;
        };
        if self.spec.transformation() != transformation {
            return false;
        }
        meta.get(metadata::ENC_KEY_ID)
            .is_some_and(|id| self.keys.snapshot().contains(id))
    }

    fn input_transform<'a>(
        &self,
        tag: &ModeTag,
        source: Source<'a>,
        meta: &Metadata,
    ) -> TransformResult<Source<'a>> {
        input::decrypting_reader(&self.keys.snapshot(), self.verification, tag, source, meta)
    }
}

impl std::fmt::Debug for EncryptionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionFactory")
            .field("spec", &self.spec)
            .field("priority", &self.priority)
            .field("verification", &self.verification)
            .field("current_key", &self.keys.current_key_id())
            .finish_non_exhaustive()
    }
}
