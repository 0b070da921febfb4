//! Transform pipeline configuration.

use crate::error::{TransformError, TransformResult};
use objvault_crypto::CipherSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How much of the stored encryption metadata is checked on decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Verify the metadata signature before using any field, then the
    /// plaintext SHA-1 and size at end of stream.
    #[default]
    Strict,
    /// Trust metadata as stored. Objects whose signed fields were altered
    /// still decode if the key material happens to work.
    Lax,
}

/// Top-level configuration, usually loaded from TOML.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub encryption: EncryptionConfig,
    pub compression: CompressionConfig,
    pub keystore: KeyStoreConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Content cipher as `algorithm/mode/padding`.
    pub cipher: String,

    /// Object key size in bits.
    pub key_size_bits: usize,

    pub priority: i32,

    pub verification: VerificationPolicy,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            cipher: "AES/CBC/PKCS5Padding".to_string(),
            key_size_bits: 128,
            priority: 500,
            verification: VerificationPolicy::Strict,
        }
    }
}

impl EncryptionConfig {
    pub fn cipher_spec(&self) -> TransformResult<CipherSpec> {
        CipherSpec::new(&self.cipher, self.key_size_bits)
            .map_err(|e| TransformError::Configuration(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,

    /// Deflate level, 0 (store) to 9 (best).
    pub level: u32,

    pub priority: i32,

    /// Record the SHA-1 of the uncompressed input.
    pub compute_digest: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 5,
            priority: 1000,
            compute_digest: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Directory of `<alias>.crt` / `<alias>.key` pairs.
    pub path: Option<PathBuf>,

    /// Alias used to encrypt new objects.
    pub current_alias: Option<String>,
}

impl TransformConfig {
    pub fn from_toml_str(s: &str) -> TransformResult<Self> {
        let config: TransformConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> TransformResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TransformError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> TransformResult<()> {
        self.encryption.cipher_spec()?;
        if self.compression.level > 9 {
            return Err(TransformError::Configuration(format!(
                "compression level {} outside 0-9",
                self.compression.level
            )));
        }
        if self.keystore.current_alias.is_some() && self.keystore.path.is_none() {
            return Err(TransformError::Configuration(
                "keystore.current_alias set without keystore.path".to_string(),
            ));
        }
        Ok(())
    }
}
