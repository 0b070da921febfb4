//! Object metadata and transform mode tags.
//!
//! Every transformed object carries a flat string map. The field
//! [`TRANSFORM_MODE`] lists the applied stages as `CLASS:config` tags joined
//! with `|`, in the order they were applied to the plaintext.

use crate::error::{TransformError, TransformResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flat, ordered object metadata.
pub type Metadata = BTreeMap<String, String>;

pub const TRANSFORM_MODE: &str = "x-emc-transform-mode";

pub const ENC_OBJECT_KEY: &str = "x-emc-enc-object-key";
pub const ENC_KEY_ID: &str = "x-emc-enc-key-id";
pub const ENC_KEY_WRAP: &str = "x-emc-enc-key-wrap";
pub const ENC_IV: &str = "x-emc-enc-iv";
pub const ENC_UNENCRYPTED_SHA1: &str = "x-emc-enc-unencrypted-sha1";
pub const ENC_UNENCRYPTED_SIZE: &str = "x-emc-enc-unencrypted-size";
pub const ENC_SIGNATURE: &str = objvault_crypto::SIGNATURE_FIELD;

pub const COMP_UNCOMPRESSED_SIZE: &str = "x-emc-comp-uncompressed-size";
pub const COMP_COMPRESSED_SIZE: &str = "x-emc-comp-compressed-size";
pub const COMP_RATIO: &str = "x-emc-comp-ratio";
pub const COMP_UNCOMPRESSED_SHA1: &str = "x-emc-comp-uncompressed-sha1";

const TAG_SEPARATOR: char = '|';

/// Prefixes of the per-stage fields transforms write.
const STAGE_FIELD_PREFIXES: [&str; 2] = ["x-emc-enc-", "x-emc-comp-"];

/// One stage of a transform pipeline, rendered as `CLASS:config`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModeTag {
    class: String,
    config: String,
}

impl ModeTag {
    pub fn new(class: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            config: config.into(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn config(&self) -> &str {
        &self.config
    }

    /// Parses a `|`-joined tag list, keeping the stored order.
    pub fn parse_list(list: &str) -> TransformResult<Vec<ModeTag>> {
        list.split(TAG_SEPARATOR).map(str::parse).collect()
    }

    pub fn join(tags: &[ModeTag]) -> String {
        tags.iter()
            .map(ModeTag::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl FromStr for ModeTag {
    type Err = TransformError;

    fn from_str(s: &str) -> TransformResult<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((class, config)) if !class.is_empty() && !config.is_empty() => {
                Ok(ModeTag::new(class, config))
            }
            _ => Err(TransformError::UnknownModeTag(s.to_string())),
        }
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.config)
    }
}

/// Returns a required field or `MissingMetadata`.
pub fn require<'a>(metadata: &'a Metadata, field: &str) -> TransformResult<&'a str> {
    metadata
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| TransformError::MissingMetadata(field.to_string()))
}

/// Parses an optional decimal size field.
pub fn optional_size(metadata: &Metadata, field: &str) -> TransformResult<Option<u64>> {
    metadata
        .get(field)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| TransformError::malformed(field, e.to_string()))
        })
        .transpose()
}

/// True for the mode field and every per-stage field.
pub fn is_transform_field(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == TRANSFORM_MODE || STAGE_FIELD_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Copy of `metadata` without any transform fields.
pub fn strip_transform_fields(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(k, _)| !is_transform_field(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
