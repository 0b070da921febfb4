//! Transform classes and the per-object stream wrappers they build.
//!
//! A [`TransformFactory`] describes one transform class (`ENC`, `COMP`, ...).
//! For every object it builds an encoder, in push mode ([`OutputTransform`],
//! the caller writes plaintext) or pull mode ([`PullTransform`], the caller
//! reads encoded bytes). Both report the same [`EncodeResult`] once closed.
//! Decoding is a plain `Read` adapter.

use crate::error::{TransformError, TransformResult};
use crate::metadata::{Metadata, ModeTag};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// Downstream writer handed to a push-mode stage.
pub type Sink<'a> = Box<dyn Write + Send + 'a>;

/// Upstream reader handed to a pull-mode stage or a decoder.
pub type Source<'a> = Box<dyn Read + Send + 'a>;

/// What an encoder reports once it has been closed.
pub trait EncodeResult {
    /// The tag (or `|`-joined tag list) describing what was applied.
    fn transform_mode(&self) -> String;

    /// Metadata to persist with the object. `IllegalState` before close.
    fn encoded_metadata(&self) -> TransformResult<Metadata>;
}

/// Push-mode encoder: plaintext in through `Write`, encoded bytes out to the
/// sink it was built over.
pub trait OutputTransform: Write + EncodeResult + Send {
    /// Flushes trailing bytes to the sink and finalizes metadata. The sink
    /// itself is flushed but stays open.
    fn close(&mut self) -> TransformResult<()>;

    fn is_closed(&self) -> bool;
}

/// Pull-mode encoder: encoded bytes out through `Read`, plaintext pulled
/// from the source it was built over.
pub trait PullTransform: Read + EncodeResult + Send {
    /// Finalizes metadata. `IllegalState` unless the source was drained.
    fn close(&mut self) -> TransformResult<()>;

    fn is_closed(&self) -> bool;
}

/// One registered transform class.
pub trait TransformFactory: Send + Sync {
    /// Class part of the mode tag, e.g. `ENC`.
    fn class_tag(&self) -> &str;

    /// Higher priorities see the plaintext first when encoding.
    fn priority(&self) -> i32;

    /// Full tag this factory writes for new objects.
    fn mode_tag(&self) -> ModeTag;

    fn wrap_sink<'a>(
        &self,
        sink: Sink<'a>,
        metadata: &Metadata,
    ) -> TransformResult<Box<dyn OutputTransform + 'a>>;

    fn wrap_source<'a>(
        &self,
        source: Source<'a>,
        metadata: &Metadata,
    ) -> TransformResult<Box<dyn PullTransform + 'a>>;

    /// Whether this factory can reverse `tag` for an object with `metadata`.
    fn can_decode(&self, tag: &ModeTag, metadata: &Metadata) -> bool;

    fn input_transform<'a>(
        &self,
        tag: &ModeTag,
        source: Source<'a>,
        metadata: &Metadata,
    ) -> TransformResult<Source<'a>>;
}

/// Ordered set of transform factories, highest priority first. Equal
/// priorities keep registration order.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    factories: Vec<Arc<dyn TransformFactory>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn TransformFactory>) {
        let at = self
            .factories
            .iter()
            .position(|f| f.priority() < factory.priority())
            .unwrap_or(self.factories.len());
        self.factories.insert(at, factory);
    }

    pub fn with(mut self, factory: Arc<dyn TransformFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn TransformFactory>> {
        self.factories.iter()
    }

    /// First factory, in priority order, willing to decode `tag`.
    pub fn find_decoder(&self, tag: &ModeTag, metadata: &Metadata) -> Option<&Arc<dyn TransformFactory>> {
        self.factories.iter().find(|f| f.can_decode(tag, metadata))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|x| (x.mode_tag().to_string(), x.priority())))
            .finish()
    }
}

/// Shared handle to a push-mode stage, so the chain can close it after the
/// stage in front of it has flushed into it.
pub(crate) struct OutputLink<'a>(Arc<Mutex<Box<dyn OutputTransform + 'a>>>);

impl<'a> OutputLink<'a> {
    pub(crate) fn new(stage: Box<dyn OutputTransform + 'a>) -> Self {
        Self(Arc::new(Mutex::new(stage)))
    }

    pub(crate) fn with_stage<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn OutputTransform + 'a>) -> TransformResult<T>,
    ) -> TransformResult<T> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| TransformError::IllegalState("transform stage poisoned"))?;
        f(&mut *guard)
    }
}

impl Clone for OutputLink<'_> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Write for OutputLink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.with_stage(|s| Ok(s.write(buf)?))?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.with_stage(|s| Ok(s.flush()?))?)
    }
}

/// Shared handle to a pull-mode stage.
pub(crate) struct PullLink<'a>(Arc<Mutex<Box<dyn PullTransform + 'a>>>);

impl<'a> PullLink<'a> {
    pub(crate) fn new(stage: Box<dyn PullTransform + 'a>) -> Self {
        Self(Arc::new(Mutex::new(stage)))
    }

    pub(crate) fn with_stage<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn PullTransform + 'a>) -> TransformResult<T>,
    ) -> TransformResult<T> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| TransformError::IllegalState("transform stage poisoned"))?;
        f(&mut *guard)
    }
}

impl Clone for PullLink<'_> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Read for PullLink<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.with_stage(|s| Ok(s.read(buf)?))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal factory used to exercise ordering without real stages.
    struct NamedFactory {
        class: &'static str,
        priority: i32,
    }

    impl TransformFactory for NamedFactory {
        fn class_tag(&self) -> &str {
            self.class
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn mode_tag(&self) -> ModeTag {
            ModeTag::new(self.class, "1")
        }

        fn wrap_sink<'a>(
            &self,
            _sink: Sink<'a>,
            _metadata: &Metadata,
        ) -> TransformResult<Box<dyn OutputTransform + 'a>> {
            Err(TransformError::IllegalState("not an encoder"))
        }

        fn wrap_source<'a>(
            &self,
            _source: Source<'a>,
            _metadata: &Metadata,
        ) -> TransformResult<Box<dyn PullTransform + 'a>> {
            Err(TransformError::IllegalState("not an encoder"))
        }

        fn can_decode(&self, tag: &ModeTag, _metadata: &Metadata) -> bool {
            tag.class() == self.class
        }

        fn input_transform<'a>(
            &self,
            _tag: &ModeTag,
            source: Source<'a>,
            _metadata: &Metadata,
        ) -> TransformResult<Source<'a>> {
            Ok(source)
        }
    }

    fn named(class: &'static str, priority: i32) -> Arc<dyn TransformFactory> {
        Arc::new(NamedFactory { class, priority })
    }

    #[test]
    fn registry_orders_by_descending_priority() {
        let registry = TransformRegistry::new()
            .with(named("ENC", 500))
            .with(named("COMP", 1000))
            .with(named("LOW", 10));

        let order: Vec<&str> = registry.iter().map(|f| f.class_tag()).collect();
        assert_eq!(order, ["COMP", "ENC", "LOW"]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let registry = TransformRegistry::new()
            .with(named("A", 100))
            .with(named("B", 100))
            .with(named("C", 100));

        let order: Vec<&str> = registry.iter().map(|f| f.class_tag()).collect();
        assert_eq!(order, ["A", "B", "C"]);
    }

    #[test]
    fn find_decoder_probes_in_order() {
        let registry = TransformRegistry::new()
            .with(named("ENC", 500))
            .with(named("COMP", 1000));

        let tag = ModeTag::new("ENC", "x");
        let found = registry.find_decoder(&tag, &Metadata::new()).unwrap();
        assert_eq!(found.class_tag(), "ENC");
        assert!(registry.find_decoder(&ModeTag::new("ZIP", "x"), &Metadata::new()).is_none());
    }
}
