//! Per-object encryption stages.
//!
//! Both modes stack the same three filters: a byte counter and a SHA-1
//! digest over the plaintext, then the cipher. The object key and IV are
//! generated when the stage is built; the wrapped key, digest, size and
//! signature become metadata when the stage is closed.

use crate::encryption::keys::KeySnapshot;
use crate::error::{TransformError, TransformResult};
use crate::factory::{EncodeResult, OutputTransform, PullTransform, Sink, Source};
use crate::metadata::{self, Metadata, ModeTag};
use objvault_crypto::codec::encode_url_safe;
use objvault_crypto::{
    CipherReader, CipherSpec, CipherWriter, CountingReader, CountingWriter, CryptoProvider,
    DigestReader, DigestWriter, KeyWrapAlgorithm, ObjectKey, sign_metadata, wrap_key,
};
use sha1::Sha1;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Everything about an encrypted object that is fixed before the first byte.
pub(crate) struct EnvelopeHeader {
    snapshot: Arc<KeySnapshot>,
    tag: ModeTag,
    key_wrap: KeyWrapAlgorithm,
    wrapped_key: String,
    iv: Vec<u8>,
}

impl EnvelopeHeader {
    /// Generates the object key and IV and wraps the key under the current
    /// master key of `snapshot`.
    pub(crate) fn generate(
        snapshot: Arc<KeySnapshot>,
        spec: &CipherSpec,
        provider: &CryptoProvider,
        key_wrap: KeyWrapAlgorithm,
    ) -> TransformResult<(Self, ObjectKey)> {
        let key = provider.generate_key(spec)?;
        let iv = provider.generate_iv(spec);
        let wrapped_key = wrap_key(&key, snapshot.current().public(), key_wrap)?;
        let header = Self {
            snapshot,
            tag: ModeTag::new(super::CLASS_TAG, spec.name()),
            key_wrap,
            wrapped_key,
            iv,
        };
        Ok((header, key))
    }

    fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Builds the signed metadata for a plaintext of `size` bytes.
    fn seal(&self, digest: &str, size: u64) -> TransformResult<Metadata> {
        let mut meta = Metadata::new();
        meta.insert(metadata::ENC_OBJECT_KEY.into(), self.wrapped_key.clone());
        meta.insert(metadata::ENC_KEY_ID.into(), self.snapshot.current_id().to_string());
        meta.insert(metadata::ENC_KEY_WRAP.into(), self.key_wrap.to_string());
        meta.insert(metadata::ENC_IV.into(), encode_url_safe(&self.iv));
        meta.insert(metadata::ENC_UNENCRYPTED_SHA1.into(), digest.to_string());
        meta.insert(metadata::ENC_UNENCRYPTED_SIZE.into(), size.to_string());

        let signature = sign_metadata(&meta, self.snapshot.current().private())?;
        meta.insert(metadata::ENC_SIGNATURE.into(), signature);
        Ok(meta)
    }
}

/// Result of a closed stage.
#[derive(Clone, Debug)]
struct Sealed {
    digest: String,
    byte_count: u64,
    metadata: Metadata,
}

enum StageState<S> {
    Open(S),
    Sealed(Sealed),
    /// Closed without a usable result (pull mode closed early, or a failed
    /// close).
    Abandoned(&'static str),
}

impl<S> StageState<S> {
    fn sealed(&self) -> TransformResult<&Sealed> {
        match self {
            StageState::Open(_) => Err(TransformError::IllegalState(
                "encryption metadata accessed before close",
            )),
            StageState::Sealed(sealed) => Ok(sealed),
            StageState::Abandoned(why) => Err(TransformError::IllegalState(*why)),
        }
    }

    fn is_closed(&self) -> bool {
        !matches!(self, StageState::Open(_))
    }
}

type PushStack<'a> = CountingWriter<DigestWriter<CipherWriter<Sink<'a>>, Sha1>>;

/// Push-mode encryption: write plaintext, ciphertext goes to the sink.
pub struct EncryptionOutputTransform<'a> {
    header: EnvelopeHeader,
    state: StageState<PushStack<'a>>,
}

impl<'a> EncryptionOutputTransform<'a> {
    pub(crate) fn new(
        sink: Sink<'a>,
        header: EnvelopeHeader,
        spec: &CipherSpec,
        key: &ObjectKey,
    ) -> TransformResult<Self> {
        let cipher = CipherWriter::new(sink, spec, key, header.iv())?;
        Ok(Self {
            header,
            state: StageState::Open(CountingWriter::new(DigestWriter::new(cipher))),
        })
    }

    /// Hex SHA-1 of the plaintext. Valid after close.
    pub fn digest(&self) -> TransformResult<&str> {
        Ok(&self.state.sealed()?.digest)
    }

    /// Plaintext byte count. Valid after close.
    pub fn byte_count(&self) -> TransformResult<u64> {
        Ok(self.state.sealed()?.byte_count)
    }

    fn finish(stack: PushStack<'a>, header: &EnvelopeHeader) -> TransformResult<Sealed> {
        let byte_count = stack.count();
        let (cipher, digest) = stack.into_inner().into_parts();
        let digest = digest.ok_or(TransformError::IllegalState("plaintext digest missing"))?;
        // Emits the padding block and flushes; the sink is released here.
        cipher.finish()?;
        let metadata = header.seal(&digest, byte_count)?;
        Ok(Sealed {
            digest,
            byte_count,
            metadata,
        })
    }
}

impl Write for EncryptionOutputTransform<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            StageState::Open(stack) => stack.write(buf),
            _ => Err(TransformError::IllegalState("write after close").into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            StageState::Open(stack) => stack.flush(),
            _ => Ok(()),
        }
    }
}

impl EncodeResult for EncryptionOutputTransform<'_> {
    fn transform_mode(&self) -> String {
        self.header.tag.to_string()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        Ok(self.state.sealed()?.metadata.clone())
    }
}

impl OutputTransform for EncryptionOutputTransform<'_> {
    fn close(&mut self) -> TransformResult<()> {
        let stack = match std::mem::replace(&mut self.state, StageState::Abandoned("close failed")) {
            StageState::Open(stack) => stack,
            closed => {
                self.state = closed;
                return Ok(());
            }
        };
        let sealed = Self::finish(stack, &self.header)?;
        debug!(
            "Encrypted {} bytes under key {}",
            sealed.byte_count,
            self.header.snapshot.current_id()
        );
        self.state = StageState::Sealed(sealed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

type PullStack<'a> = CipherReader<DigestReader<CountingReader<Source<'a>>, Sha1>>;

/// Pull-mode encryption: read ciphertext, plaintext is pulled from the
/// source on demand.
pub struct EncryptionPullTransform<'a> {
    header: EnvelopeHeader,
    state: StageState<PullStack<'a>>,
}

impl<'a> EncryptionPullTransform<'a> {
    pub(crate) fn new(
        source: Source<'a>,
        header: EnvelopeHeader,
        spec: &CipherSpec,
        key: &ObjectKey,
    ) -> TransformResult<Self> {
        let stack = CipherReader::new(
            DigestReader::new(CountingReader::new(source)),
            spec,
            key,
            header.iv(),
        )?;
        Ok(Self {
            header,
            state: StageState::Open(stack),
        })
    }

    pub fn digest(&self) -> TransformResult<&str> {
        Ok(&self.state.sealed()?.digest)
    }

    pub fn byte_count(&self) -> TransformResult<u64> {
        Ok(self.state.sealed()?.byte_count)
    }
}

impl Read for EncryptionPullTransform<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.state {
            StageState::Open(stack) => stack.read(buf),
            _ => Err(TransformError::IllegalState("read after close").into()),
        }
    }
}

impl EncodeResult for EncryptionPullTransform<'_> {
    fn transform_mode(&self) -> String {
        self.header.tag.to_string()
    }

    fn encoded_metadata(&self) -> TransformResult<Metadata> {
        Ok(self.state.sealed()?.metadata.clone())
    }
}

impl PullTransform for EncryptionPullTransform<'_> {
    fn close(&mut self) -> TransformResult<()> {
        let stack = match std::mem::replace(&mut self.state, StageState::Abandoned("close failed")) {
            StageState::Open(stack) => stack,
            closed => {
                self.state = closed;
                return Ok(());
            }
        };
        if !stack.is_finished() {
            debug!("Encryption pull stream closed before the source was exhausted");
            self.state = StageState::Abandoned("stream closed before the source was exhausted");
            return Ok(());
        }

        let (counting, digest) = stack.into_inner().into_parts();
        let byte_count = counting.count();
        let digest = digest.ok_or(TransformError::IllegalState("plaintext digest missing"))?;
        let metadata = self.header.seal(&digest, byte_count)?;
        debug!(
            "Encrypted {byte_count} bytes under key {} (pull)",
            self.header.snapshot.current_id()
        );
        self.state = StageState::Sealed(Sealed {
            digest,
            byte_count,
            metadata,
        });
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}
