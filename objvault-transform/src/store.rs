//! Object storage with transforms applied on the way in and out.
//!
//! [`ObjectStore`] is the minimal surface a backend has to offer. The
//! [`TransformingStore`] wrapper encodes bodies on `put`, decodes them on
//! `get`, and rekeys objects by rewriting metadata only.

use crate::chain::TransformChain;
use crate::encryption::RekeyOutcome;
use crate::error::{TransformError, TransformResult};
use crate::metadata::Metadata;
use std::collections::BTreeMap;
use std::io::Read;
use std::ops::Range;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// A flat key → (body, metadata) store.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, body: Vec<u8>, metadata: Metadata) -> TransformResult<()>;

    fn get(&self, key: &str) -> TransformResult<(Vec<u8>, Metadata)>;

    fn head(&self, key: &str) -> TransformResult<Metadata>;

    /// Replaces an object's metadata, leaving the body untouched.
    fn update_metadata(&self, key: &str, metadata: Metadata) -> TransformResult<()>;

    /// Keys starting with `prefix`, in ascending order.
    fn list(&self, prefix: &str) -> TransformResult<Vec<String>>;
}

#[derive(Clone, Debug)]
struct StoredObject {
    body: Arc<Vec<u8>>,
    metadata: Metadata,
}

/// In-memory [`ObjectStore`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, body: Vec<u8>, metadata: Metadata) -> TransformResult<()> {
        self.write().insert(
            key.to_string(),
            StoredObject {
                body: Arc::new(body),
                metadata,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> TransformResult<(Vec<u8>, Metadata)> {
        let objects = self.read();
        let object = objects
            .get(key)
            .ok_or_else(|| TransformError::NotFound(key.to_string()))?;
        Ok((object.body.as_ref().clone(), object.metadata.clone()))
    }

    fn head(&self, key: &str) -> TransformResult<Metadata> {
        self.read()
            .get(key)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| TransformError::NotFound(key.to_string()))
    }

    fn update_metadata(&self, key: &str, metadata: Metadata) -> TransformResult<()> {
        let mut objects = self.write();
        let object = objects
            .get_mut(key)
            .ok_or_else(|| TransformError::NotFound(key.to_string()))?;
        object.metadata = metadata;
        Ok(())
    }

    fn list(&self, prefix: &str) -> TransformResult<Vec<String>> {
        Ok(self
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Wraps a backend so every body goes through a [`TransformChain`].
#[derive(Debug)]
pub struct TransformingStore<S> {
    inner: S,
    chain: TransformChain,
}

impl<S: ObjectStore> TransformingStore<S> {
    pub fn new(inner: S, chain: TransformChain) -> Self {
        Self { inner, chain }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    /// Encodes `plaintext` and stores it. Returns the stored metadata.
    pub fn put(&self, key: &str, plaintext: impl Read, metadata: &Metadata) -> TransformResult<Metadata> {
        let (body, stored) = self.chain.encode(plaintext, metadata)?;
        debug!("Storing {key}: {} encoded bytes", body.len());
        self.inner.put(key, body, stored.clone())?;
        Ok(stored)
    }

    /// Fetches and decodes an object. The returned metadata has the
    /// transform fields removed.
    pub fn get(&self, key: &str) -> TransformResult<(Vec<u8>, Metadata)> {
        let (body, metadata) = self.inner.get(key)?;
        let (mut reader, user_metadata) = self.chain.decode(std::io::Cursor::new(body), &metadata)?;
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext)?;
        Ok((plaintext, user_metadata))
    }

    /// Byte range of an untransformed object.
    pub fn get_range(&self, key: &str, range: Range<u64>) -> TransformResult<Vec<u8>> {
        let (body, metadata) = self.inner.get(key)?;
        let (mut reader, _) = self
            .chain
            .decode_range(std::io::Cursor::new(body), &metadata, range)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Stored metadata, transform fields included.
    pub fn head(&self, key: &str) -> TransformResult<Metadata> {
        self.inner.head(key)
    }

    /// Re-wraps an object's key under the current master key. The body is
    /// never read or rewritten.
    pub fn rekey(&self, key: &str) -> TransformResult<RekeyOutcome> {
        let metadata = self.inner.head(key)?;
        self.rekey_with(key, &metadata)
    }

    pub(crate) fn rekey_with(&self, key: &str, metadata: &Metadata) -> TransformResult<RekeyOutcome> {
        let encryption = self.chain.encryption().ok_or_else(|| {
            TransformError::Configuration("no encryption transform registered".to_string())
        })?;
        let outcome = encryption.rekey(metadata)?;
        if let RekeyOutcome::Rekeyed(updated) = &outcome {
            self.inner.update_metadata(key, updated.clone())?;
            debug!("Rekeyed {key}");
        }
        Ok(outcome)
    }
}
