//! Cryptographic primitives for objvault's transform pipeline.
//!
//! Provides the pieces an envelope-encryption stage is assembled from:
//! - RSA master key pairs and their stable fingerprints
//! - RSA wrapping of per-object AES keys
//! - Canonical metadata signing and verification
//! - Streaming AES/CBC encryption and decryption over `std::io`
//! - Counting, digesting and checksum-verifying stream wrappers
//!
//! # Architecture
//!
//! Object content is encrypted with a fresh **object key** (AES) generated for
//! every upload. The object key is wrapped with the current **master key**
//! (RSA) and stored next to the content in metadata. Rotating the master key
//! only re-wraps object keys; content is never re-encrypted.

pub mod checksum;
pub mod cipher;
pub mod codec;
mod error;
pub mod keys;
pub mod provider;
pub mod signing;
pub mod stream;
pub mod wrap;

pub use checksum::ChecksumReader;
pub use cipher::{BLOCK_SIZE, CipherSpec, ObjectKey, Transformation};
pub use error::{CryptoError, CryptoResult};
pub use keys::{MasterKeyPair, fingerprint, public_key_der};
pub use provider::CryptoProvider;
pub use signing::{
    SIGNATURE_FIELD, SIGNED_FIELD_PREFIX, canonical_metadata, sign_metadata,
    verify_metadata_signature,
};
pub use stream::{CipherReader, CipherWriter, CountingReader, CountingWriter, DecipherReader};
pub use stream::{DigestReader, DigestWriter};
pub use wrap::{KeyWrapAlgorithm, unwrap_key, wrap_key};

pub use rsa::{RsaPrivateKey, RsaPublicKey};
