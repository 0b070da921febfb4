//! Deflate compression transform (`COMP:Deflate/<level>`).
//!
//! Content is zlib-wrapped deflate. The stage records the uncompressed and
//! compressed sizes, the space saved as a percentage, and optionally the
//! SHA-1 of the uncompressed input, which is checked again on decode.

use crate::config::CompressionConfig;
use crate::error::{TransformError, TransformResult};
use crate::factory::{EncodeResult, OutputTransform, PullTransform, Sink, Source, TransformFactory};
use crate::metadata::{self, Metadata, ModeTag, optional_size};
use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::read::ZlibEncoder as ZlibReadEncoder;
use flate2::write::ZlibEncoder;
use objvault_crypto::{ChecksumReader, CountingReader, CountingWriter, DigestReader, DigestWriter};
use sha1::Sha1;
use std::io::{self, BufReader, Read, Write};
use tracing::debug;

/// Class tag of the compression transform.
pub const CLASS_TAG: &str = "COMP";

const ALGORITHM: &str = "Deflate";

#[derive(Clone, Debug)]
pub struct CompressionFactory {
    level: u32,
    priority: i32,
    compute_digest: bool,
}

impl CompressionFactory {
    pub fn new(config: &CompressionConfig) -> TransformResult<Self> {
        if config.level > 9 {
            return Err(TransformError::Configuration(format!(
                "compression level {} outside 0-9",
                config.level
            )));
        }
        Ok(Self {
            level: config.level,
            priority: config.priority,
            compute_digest: config.compute_digest,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

/// Parses the level out of a `Deflate/<level>` tag config.
fn parse_level(config: &str) -> Option<u32> {
    let (algorithm, level) = config.split_once('/')?;
    if !algorithm.eq_ignore_ascii_case(ALGORITHM) {
        return None;
    }
    level.parse().ok().filter(|l| *l <= 9)
}

/// Percentage of space saved, one decimal.
fn ratio(uncompressed: u64, compressed: u64) -> String {
    if uncompressed == 0 {
        return "0.0%".to_string();
    }
    let saved = 1.0 - compressed as f64 / uncompressed as f64;
    format!("{:.1}%", saved * 100.0)
}

fn stage_metadata(uncompressed: u64, compressed: u64, digest: Option<String>) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(metadata::COMP_UNCOMPRESSED_SIZE.into(), uncompressed.to_string());
    meta.insert(metadata::COMP_COMPRESSED_SIZE.into(), compressed.to_string());
    meta.insert(metadata::COMP_RATIO.into(), ratio(uncompressed, compressed));
    if let Some(digest) = digest {
        meta.insert(metadata::COMP_UNCOMPRESSED_SHA1.into(), digest);
    }
    meta
}

type PushStack<'a> = CountingWriter<DigestWriter<ZlibEncoder<CountingWriter<Sink<'a>>>, Sha1>>;

pub struct CompressionOutputTransform<'a> {
    tag: ModeTag,
    stack: Option<PushStack<'a>>,
    metadata: Option<Metadata>,
}

impl Write for CompressionOutputTransform<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stack.as_mut() {
            Some(stack) => stack.write(buf),
            None => Err(TransformError::IllegalState("write after close").into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stack.as_mut() {
            Some(stack) => stack.flush(),
            None => Ok(()),
        }
    }
}

impl EncodeResult for CompressionOutputTransform<'_> {
    fn transform_mode(&self) -> String {
        self.tag.to_string()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        self.metadata
            .clone()
            .ok_or(TransformError::IllegalState("compression metadata accessed before close"))
    }
}

impl OutputTransform for CompressionOutputTransform<'_> {
    fn close(&mut self) -> TransformResult<()> {
        let Some(stack) = self.stack.take() else {
            return Ok(());
        };
        let uncompressed = stack.count();
        let (encoder, digest) = stack.into_inner().into_parts();
        let mut compressed = encoder.finish()?;
        compressed.flush()?;

        let meta = stage_metadata(uncompressed, compressed.count(), digest);
        debug!(
            "Compressed {uncompressed} bytes to {} ({})",
            compressed.count(),
            meta[metadata::COMP_RATIO]
        );
        self.metadata = Some(meta);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stack.is_none()
    }
}

type PullStack<'a> = CountingReader<ZlibReadEncoder<DigestReader<CountingReader<Source<'a>>, Sha1>>>;

pub struct CompressionPullTransform<'a> {
    tag: ModeTag,
    stack: Option<PullStack<'a>>,
    exhausted: bool,
    metadata: Result<Metadata, &'static str>,
}

impl Read for CompressionPullTransform<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(stack) = self.stack.as_mut() else {
            return Err(TransformError::IllegalState("read after close").into());
        };
        let n = stack.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.exhausted = true;
        }
        Ok(n)
    }
}

impl EncodeResult for CompressionPullTransform<'_> {
    fn transform_mode(&self) -> String {
        self.tag.to_string()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        self.metadata.clone().map_err(TransformError::IllegalState)
    }
}

impl PullTransform for CompressionPullTransform<'_> {
    fn close(&mut self) -> TransformResult<()> {
        let Some(stack) = self.stack.take() else {
            return Ok(());
        };
        if !self.exhausted {
            debug!("Compression pull stream closed before the source was exhausted");
            self.metadata = Err("stream closed before the source was exhausted");
            return Ok(());
        }
        let compressed = stack.count();
        let (counting, digest) = stack.into_inner().into_inner().into_parts();
        self.metadata = Ok(stage_metadata(counting.count(), compressed, digest));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stack.is_none()
    }
}

/// Inflates a zlib stream, then reads whatever follows it to EOF.
///
/// The deflate decoder stops at the end of the zlib stream. Draining the
/// source lets the stages underneath run their end-of-stream checks, and
/// bytes after the stream are rejected.
struct InflateReader<'a> {
    decoder: ZlibDecoder<BufReader<ChecksumReader<Source<'a>>>>,
    done: bool,
}

impl<'a> InflateReader<'a> {
    fn new(source: Source<'a>, compressed_size: Option<u64>) -> Self {
        let counted = ChecksumReader::new(source, None, compressed_size);
        Self {
            decoder: ZlibDecoder::new(BufReader::new(counted)),
            done: false,
        }
    }

    fn drain(&mut self) -> TransformResult<()> {
        let trailing = io::copy(self.decoder.get_mut(), &mut io::sink())?;
        if trailing > 0 {
            return Err(TransformError::CorruptStream(format!(
                "{trailing} bytes after the end of the deflate stream"
            )));
        }
        Ok(())
    }
}

/// Deflate failures surface as untyped `InvalidInput`; anything typed came
/// from a stage underneath and passes through as is.
fn inflate_error(err: io::Error) -> io::Error {
    match TransformError::from(err) {
        TransformError::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
            ) =>
        {
            TransformError::CorruptStream(format!("deflate: {e}")).into()
        }
        other => other.into(),
    }
}

impl Read for InflateReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.decoder.read(buf).map_err(inflate_error)?;
        if n == 0 && !buf.is_empty() {
            self.drain()?;
            self.done = true;
        }
        Ok(n)
    }
}

impl TransformFactory for CompressionFactory {
    fn class_tag(&self) -> &str {
        CLASS_TAG
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn mode_tag(&self) -> ModeTag {
        ModeTag::new(CLASS_TAG, format!("{ALGORITHM}/{}", self.level))
    }

    fn wrap_sink<'a>(
        &self,
        sink: Sink<'a>,
        _metadata: &Metadata,
    ) -> TransformResult<Box<dyn OutputTransform + 'a>> {
        let encoder = ZlibEncoder::new(CountingWriter::new(sink), Compression::new(self.level));
        let digest = if self.compute_digest {
            DigestWriter::new(encoder)
        } else {
            DigestWriter::disabled(encoder)
        };
        Ok(Box::new(CompressionOutputTransform {
            tag: self.mode_tag(),
            stack: Some(CountingWriter::new(digest)),
            metadata: None,
        }))
    }

    fn wrap_source<'a>(
        &self,
        source: Source<'a>,
        _metadata: &Metadata,
    ) -> TransformResult<Box<dyn PullTransform + 'a>> {
        let counting = CountingReader::new(source);
        let digest = if self.compute_digest {
            DigestReader::new(counting)
        } else {
            DigestReader::disabled(counting)
        };
        let encoder = ZlibReadEncoder::new(digest, Compression::new(self.level));
        Ok(Box::new(CompressionPullTransform {
            tag: self.mode_tag(),
            stack: Some(CountingReader::new(encoder)),
            exhausted: false,
            metadata: Err("compression metadata accessed before close"),
        }))
    }

    fn can_decode(&self, tag: &ModeTag, _metadata: &Metadata) -> bool {
        tag.class() == CLASS_TAG && parse_level(tag.config()).is_some()
    }

    fn input_transform<'a>(
        &self,
        _tag: &ModeTag,
        source: Source<'a>,
        meta: &Metadata,
    ) -> TransformResult<Source<'a>> {
        let compressed_size = optional_size(meta, metadata::COMP_COMPRESSED_SIZE)?;
        let decoder = InflateReader::new(source, compressed_size);
        let sha1 = meta.get(metadata::COMP_UNCOMPRESSED_SHA1).cloned();
        let size = optional_size(meta, metadata::COMP_UNCOMPRESSED_SIZE)?;
        if sha1.is_none() && size.is_none() {
            return Ok(Box::new(decoder));
        }
        Ok(Box::new(ChecksumReader::new(decoder, sha1, size)))
    }
}
