//! Composable content transforms for objvault.
//!
//! Objects are encoded by a chain of transforms on the way into storage and
//! decoded on the way out:
//! - Envelope encryption (`ENC`): per-object AES keys wrapped under rotating
//!   RSA master keys, with a signature over the encryption metadata
//! - Deflate compression (`COMP`)
//! - Rekey: re-wrap object keys after a rotation without touching content
//!
//! # Architecture
//!
//! Each transform class is a [`TransformFactory`] held in a
//! [`TransformRegistry`] ordered by priority. A [`TransformChain`] runs every
//! factory when encoding and records the applied tags in the object's
//! metadata (`x-emc-transform-mode`). Decoding reverses that list and asks
//! the registry for a decoder per tag; an object nothing can decode is an
//! error, never returned as stored.

pub mod chain;
pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod factory;
pub mod keystore;
pub mod metadata;
pub mod rekey;
pub mod store;

pub use chain::{ChainOutput, ChainPull, TransformChain};
pub use compression::CompressionFactory;
pub use config::{CompressionConfig, EncryptionConfig, KeyStoreConfig, TransformConfig, VerificationPolicy};
pub use encryption::{
    BareKeySource, EncryptionFactory, KeySnapshot, KeyStoreKeySource, MasterKeySource,
    RekeyOutcome,
};
pub use error::{TransformError, TransformResult};
pub use factory::{
    EncodeResult, OutputTransform, PullTransform, Sink, Source, TransformFactory,
    TransformRegistry,
};
pub use keystore::{CertificateInfo, KeyStore, MemoryKeyStore, PemDirectoryKeyStore};
pub use metadata::{Metadata, ModeTag};
pub use rekey::{RekeySummary, rekey_all};
pub use store::{MemoryObjectStore, ObjectStore, TransformingStore};
