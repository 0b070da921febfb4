//! Transform pipeline error types.

use objvault_crypto::CryptoError;
use std::io;
use thiserror::Error;

/// Result type for transform operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors raised while building, running or reversing a transform chain.
///
/// None of these are retried. A cryptographic failure never falls back to
/// returning the stored bytes as plaintext.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unknown transform mode tag: {0}")]
    UnknownModeTag(String),

    #[error("no registered transform can decode {0}")]
    NoDecoder(String),

    #[error("no master key with fingerprint {0}")]
    UnknownKey(String),

    #[error("missing metadata field {0}")]
    MissingMetadata(String),

    #[error("malformed metadata field {field}: {reason}")]
    MalformedMetadata { field: String, reason: String },

    #[error("metadata signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("range reads are not supported on transformed objects ({0})")]
    RangeUnsupported(String),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("{what} mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("keystore error: {0}")]
    KeyStore(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(io::Error),
}

impl TransformError {
    pub(crate) fn malformed(field: &str, reason: impl Into<String>) -> Self {
        TransformError::MalformedMetadata {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// True for tampering or corruption detected while reading back content.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            TransformError::IntegrityMismatch { .. }
                | TransformError::SignatureInvalid(_)
                | TransformError::CorruptStream(_)
                | TransformError::Crypto(CryptoError::Decryption(_))
        )
    }
}

impl From<CryptoError> for TransformError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::IntegrityMismatch {
                what,
                expected,
                actual,
            } => TransformError::IntegrityMismatch {
                what,
                expected,
                actual,
            },
            CryptoError::IllegalState(msg) => TransformError::IllegalState(msg),
            CryptoError::Io(e) => TransformError::from(e),
            other => TransformError::Crypto(other),
        }
    }
}

// Stages only speak `io::Error`; typed errors ride inside `InvalidData`.
impl From<TransformError> for io::Error {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<io::Error> for TransformError {
    fn from(err: io::Error) -> Self {
        let wraps_typed = err
            .get_ref()
            .is_some_and(|inner| inner.is::<TransformError>() || inner.is::<CryptoError>());
        if !wraps_typed {
            return TransformError::Io(err);
        }
        let Some(inner) = err.into_inner() else {
            return TransformError::IllegalState("lost wrapped error");
        };
        match inner.downcast::<TransformError>() {
            Ok(typed) => *typed,
            Err(inner) => match inner.downcast::<CryptoError>() {
                Ok(typed) => TransformError::from(*typed),
                Err(_) => TransformError::IllegalState("lost wrapped error"),
            },
        }
    }
}
