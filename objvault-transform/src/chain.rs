//! Multi-stage encode and decode.
//!
//! Encoding runs every registered factory, highest priority first, so with
//! the defaults plaintext is compressed and then encrypted. The applied tags
//! are stored in [`TRANSFORM_MODE`] in that order; decoding walks them
//! backwards and asks the registry for a decoder per tag.

use crate::compression::CompressionFactory;
use crate::config::TransformConfig;
use crate::encryption::{EncryptionFactory, MasterKeySource};
use crate::error::{TransformError, TransformResult};
use crate::factory::{
    EncodeResult, OutputLink, OutputTransform, PullLink, PullTransform, Sink, Source,
    TransformFactory, TransformRegistry,
};
use crate::metadata::{Metadata, ModeTag, TRANSFORM_MODE, strip_transform_fields};
use objvault_crypto::CryptoProvider;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Ordered set of transforms applied to every object.
#[derive(Clone, Debug, Default)]
pub struct TransformChain {
    registry: TransformRegistry,
    encryption: Option<Arc<EncryptionFactory>>,
}

impl TransformChain {
    pub fn new(registry: TransformRegistry) -> Self {
        Self {
            registry,
            encryption: None,
        }
    }

    /// Builds the encryption stage, plus compression when enabled.
    pub fn from_config(
        config: &TransformConfig,
        keys: Arc<dyn MasterKeySource>,
        provider: CryptoProvider,
    ) -> TransformResult<Self> {
        config.validate()?;
        let encryption = EncryptionFactory::new(keys, &config.encryption, provider)?;
        let mut chain = Self::default().with_encryption(Arc::new(encryption));
        if config.compression.enabled {
            chain = chain.with_factory(Arc::new(CompressionFactory::new(&config.compression)?));
        }
        debug!("Transform chain from config: {:?}", chain.registry);
        Ok(chain)
    }

    pub fn with_factory(mut self, factory: Arc<dyn TransformFactory>) -> Self {
        self.registry.register(factory);
        self
    }

    /// Registers `factory` and keeps it as the chain's rekey handler.
    pub fn with_encryption(mut self, factory: Arc<EncryptionFactory>) -> Self {
        self.registry.register(factory.clone());
        self.encryption = Some(factory);
        self
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn encryption(&self) -> Option<&Arc<EncryptionFactory>> {
        self.encryption.as_ref()
    }

    /// Push-mode encoder writing the encoded object to `sink`.
    pub fn encode_sink<'a>(&self, sink: Sink<'a>, metadata: &Metadata) -> TransformResult<ChainOutput<'a>> {
        // Built from the sink outwards: the lowest priority stage sits next
        // to the sink.
        let mut next = sink;
        let mut stages = Vec::with_capacity(self.registry.len());
        for factory in self.registry.iter().rev() {
            let link = OutputLink::new(factory.wrap_sink(next, metadata)?);
            next = Box::new(link.clone());
            stages.push(link);
        }
        stages.reverse();

        Ok(ChainOutput {
            head: next,
            stages,
            base: strip_transform_fields(metadata),
            mode: self.mode(),
            closed: false,
            metadata: Err("chain metadata accessed before close"),
        })
    }

    /// Pull-mode encoder reading plaintext from `source`.
    pub fn encode_source<'a>(
        &self,
        source: Source<'a>,
        metadata: &Metadata,
    ) -> TransformResult<ChainPull<'a>> {
        let mut next = source;
        let mut stages = Vec::with_capacity(self.registry.len());
        for factory in self.registry.iter() {
            let link = PullLink::new(factory.wrap_source(next, metadata)?);
            next = Box::new(link.clone());
            stages.push(link);
        }

        Ok(ChainPull {
            tail: next,
            stages,
            base: strip_transform_fields(metadata),
            mode: self.mode(),
            closed: false,
            metadata: Err("chain metadata accessed before close"),
        })
    }

    /// Encodes all of `plaintext` into memory.
    pub fn encode(&self, mut plaintext: impl Read, metadata: &Metadata) -> TransformResult<(Vec<u8>, Metadata)> {
        let mut encoded = Vec::new();
        let meta = {
            let mut output = self.encode_sink(Box::new(&mut encoded), metadata)?;
            let copied = io::copy(&mut plaintext, &mut output);
            let closed = output.close();
            copied?;
            closed?;
            output.encoded_metadata()?
        };
        debug!(
            "Encoded object: {} bytes, mode {}",
            encoded.len(),
            meta.get(TRANSFORM_MODE).map_or("none", String::as_str)
        );
        Ok((encoded, meta))
    }

    /// Reader producing the original plaintext of a stored object, and the
    /// object's metadata without transform fields.
    ///
    /// Objects without a transform mode pass through unchanged. Fails with
    /// `NoDecoder` if any tag has no willing factory.
    pub fn decode<'a>(
        &self,
        encoded: impl Read + Send + 'a,
        metadata: &Metadata,
    ) -> TransformResult<(Source<'a>, Metadata)> {
        let mut reader: Source<'a> = Box::new(encoded);
        let Some(mode) = metadata.get(TRANSFORM_MODE) else {
            return Ok((reader, metadata.clone()));
        };

        let tags = ModeTag::parse_list(mode)?;
        for tag in tags.iter().rev() {
            let factory = self
                .registry
                .find_decoder(tag, metadata)
                .ok_or_else(|| TransformError::NoDecoder(tag.to_string()))?;
            reader = factory.input_transform(tag, reader, metadata)?;
        }
        debug!("Decoding object with mode {mode}");
        Ok((reader, strip_transform_fields(metadata)))
    }

    /// Like [`decode`](Self::decode) for a byte range of the plaintext.
    /// Only untransformed objects can be ranged.
    pub fn decode_range<'a>(
        &self,
        encoded: impl Read + Send + 'a,
        metadata: &Metadata,
        range: Range<u64>,
    ) -> TransformResult<(Source<'a>, Metadata)> {
        if let Some(mode) = metadata.get(TRANSFORM_MODE) {
            return Err(TransformError::RangeUnsupported(mode.clone()));
        }
        let mut reader = encoded;
        io::copy(&mut (&mut reader).take(range.start), &mut io::sink())?;
        let len = range.end.saturating_sub(range.start);
        Ok((Box::new(reader.take(len)), metadata.clone()))
    }

    fn mode(&self) -> String {
        let tags: Vec<ModeTag> = self.registry.iter().map(|f| f.mode_tag()).collect();
        ModeTag::join(&tags)
    }
}

/// Merged metadata of closed stages, in the order they were applied.
fn merge_stages(
    base: &Metadata,
    mode: &str,
    results: impl IntoIterator<Item = Metadata>,
) -> Metadata {
    let mut merged = base.clone();
    let mut staged = false;
    for meta in results {
        merged.extend(meta);
        staged = true;
    }
    if staged {
        merged.insert(TRANSFORM_MODE.to_string(), mode.to_string());
    }
    merged
}

/// Push-mode encoder over every stage of a chain.
pub struct ChainOutput<'a> {
    /// The highest priority stage, or the sink itself for an empty chain.
    head: Sink<'a>,
    /// Highest priority first.
    stages: Vec<OutputLink<'a>>,
    base: Metadata,
    mode: String,
    closed: bool,
    metadata: Result<Metadata, &'static str>,
}

impl Write for ChainOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(TransformError::IllegalState("write after close").into());
        }
        self.head.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.head.flush()
    }
}

impl EncodeResult for ChainOutput<'_> {
    fn transform_mode(&self) -> String {
        self.mode.clone()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        self.metadata.clone().map_err(TransformError::IllegalState)
    }
}

impl OutputTransform for ChainOutput<'_> {
    /// Closes every stage, outermost first, so each one flushes its tail
    /// into a stage that is still open. A failing stage does not stop the
    /// rest from being closed; the first error is returned.
    fn close(&mut self) -> TransformResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.metadata = Err("chain close failed");

        let mut results = Vec::with_capacity(self.stages.len());
        let mut first_error = None;
        for stage in &self.stages {
            match stage.with_stage(|s| {
                s.close()?;
                s.encoded_metadata()
            }) {
                Ok(meta) => results.push(meta),
                Err(e) => {
                    debug!("Closing chain stage failed: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if self.stages.is_empty() {
            self.head.flush()?;
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.metadata = Ok(merge_stages(&self.base, &self.mode, results));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Pull-mode encoder over every stage of a chain.
pub struct ChainPull<'a> {
    /// The lowest priority stage, or the source itself for an empty chain.
    tail: Source<'a>,
    /// Highest priority first.
    stages: Vec<PullLink<'a>>,
    base: Metadata,
    mode: String,
    closed: bool,
    metadata: Result<Metadata, &'static str>,
}

impl Read for ChainPull<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(TransformError::IllegalState("read after close").into());
        }
        self.tail.read(buf)
    }
}

impl EncodeResult for ChainPull<'_> {
    fn transform_mode(&self) -> String {
        self.mode.clone()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        self.metadata.clone().map_err(TransformError::IllegalState)
    }
}

impl PullTransform for ChainPull<'_> {
    fn close(&mut self) -> TransformResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for stage in &self.stages {
            if let Err(e) = stage.with_stage(|s| s.close()) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            self.metadata = Err("chain close failed");
            return Err(e);
        }

        let results: TransformResult<Vec<Metadata>> = self
            .stages
            .iter()
            .map(|stage| stage.with_stage(|s| s.encoded_metadata()))
            .collect();
        self.metadata = match results {
            Ok(results) => Ok(merge_stages(&self.base, &self.mode, results)),
            Err(e) => {
                debug!("Chain pull stream closed without usable metadata: {e}");
                Err("stream closed before the source was exhausted")
            }
        };
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
