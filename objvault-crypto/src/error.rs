//! Crypto error types.

use std::io;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in key handling and stream encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid key length: expected one of {allowed:?} bytes, got {actual}")]
    UnsupportedKeyLength {
        allowed: &'static [usize],
        actual: usize,
    },

    #[error("invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("unsupported cipher transform: {0}")]
    UnsupportedCipher(String),

    #[error("unsupported key wrap algorithm: {0}")]
    UnsupportedKeyWrap(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("{what} mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error(transparent)]
    Io(io::Error),
}

impl CryptoError {
    /// Returns true if this error signals tampering or corruption rather than
    /// a transport fault.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CryptoError::IntegrityMismatch { .. })
    }
}

// Stream wrappers can only report `io::Error`. Typed errors travel inside an
// `InvalidData` error and are recovered on the way back out.
impl From<CryptoError> for io::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<io::Error> for CryptoError {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<CryptoError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(typed) = inner.downcast::<CryptoError>() {
                    return *typed;
                }
            }
            return CryptoError::IllegalState("lost wrapped crypto error");
        }
        CryptoError::Io(err)
    }
}
