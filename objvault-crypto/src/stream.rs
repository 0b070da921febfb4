//! `std::io` adapters that stages are assembled from.
//!
//! Push mode stacks writers: `CountingWriter<DigestWriter<CipherWriter<W>>>`
//! sees plaintext at the top and forwards ciphertext to `W`. Pull mode mirrors
//! this with readers over the plaintext source.

use crate::cipher::{BlockTransform, CipherSpec, DecryptCore, EncryptCore, ObjectKey};
use crate::error::{CryptoError, CryptoResult};
use sha1::{Digest, Sha1};
use std::io::{self, Read, Write};

const READ_CHUNK: usize = 8 * 1024;

/// Counts bytes written through to `inner`.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Counts bytes read from `inner`.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Hashes every byte written through to `inner`. A disabled writer passes
/// bytes through and reports no digest.
pub struct DigestWriter<W, D = Sha1> {
    inner: W,
    hasher: Option<D>,
}

impl<W: Write, D: Digest> DigestWriter<W, D> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Some(D::new()),
        }
    }

    pub fn disabled(inner: W) -> Self {
        Self {
            inner,
            hasher: None,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns the inner writer and the lower-case hex digest, if enabled.
    pub fn into_parts(self) -> (W, Option<String>) {
        let digest = self.hasher.map(|h| hex::encode(h.finalize()));
        (self.inner, digest)
    }
}

impl<W: Write, D: Digest> Write for DigestWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hashes every byte read from `inner`.
pub struct DigestReader<R, D = Sha1> {
    inner: R,
    hasher: Option<D>,
}

impl<R: Read, D: Digest> DigestReader<R, D> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Some(D::new()),
        }
    }

    pub fn disabled(inner: R) -> Self {
        Self {
            inner,
            hasher: None,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_parts(self) -> (R, Option<String>) {
        let digest = self.hasher.map(|h| hex::encode(h.finalize()));
        (self.inner, digest)
    }
}

impl<R: Read, D: Digest> Read for DigestReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Encrypts everything written to it and forwards ciphertext to `inner`.
///
/// The final padded block is only emitted by [`CipherWriter::finish`];
/// dropping the writer without finishing leaves truncated ciphertext behind.
pub struct CipherWriter<W> {
    inner: W,
    core: EncryptCore,
    out: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(inner: W, spec: &CipherSpec, key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        check_key(spec, key)?;
        Ok(Self {
            inner,
            core: EncryptCore::new(key, iv)?,
            out: Vec::with_capacity(READ_CHUNK),
        })
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Writes the padding block, flushes and returns the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.clear();
        self.core.finalize(&mut self.out)?;
        self.inner.write_all(&self.out)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.clear();
        self.core.update(buf, &mut self.out);
        self.inner.write_all(&self.out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct BlockReader<R, T> {
    inner: R,
    core: T,
    scratch: Box<[u8]>,
    out: Vec<u8>,
    pos: usize,
    finished: bool,
    failure: Option<String>,
}

impl<R: Read, T: BlockTransform> BlockReader<R, T> {
    fn new(inner: R, core: T) -> Self {
        Self {
            inner,
            core,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            out: Vec::with_capacity(READ_CHUNK + 32),
            pos: 0,
            finished: false,
            failure: None,
        }
    }
}

impl<R: Read, T: BlockTransform> Read for BlockReader<R, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.pos);
                buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if let Some(reason) = &self.failure {
                return Err(CryptoError::Decryption(reason.clone()).into());
            }
            if self.finished {
                return Ok(0);
            }
            self.out.clear();
            self.pos = 0;
            let n = self.inner.read(&mut self.scratch)?;
            if n == 0 {
                self.finished = true;
                if let Err(e) = self.core.finalize(&mut self.out) {
                    self.failure = Some(match &e {
                        CryptoError::Decryption(reason) => reason.clone(),
                        other => other.to_string(),
                    });
                    return Err(e.into());
                }
            } else {
                self.core.update(&self.scratch[..n], &mut self.out);
            }
        }
    }
}

/// Pulls plaintext from `inner` and yields ciphertext.
pub struct CipherReader<R> {
    inner: BlockReader<R, EncryptCore>,
}

impl<R: Read> CipherReader<R> {
    pub fn new(inner: R, spec: &CipherSpec, key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        check_key(spec, key)?;
        Ok(Self {
            inner: BlockReader::new(inner, EncryptCore::new(key, iv)?),
        })
    }

    /// True once the source hit EOF and every ciphertext byte was read.
    pub fn is_finished(&self) -> bool {
        self.inner.finished && self.inner.pos >= self.inner.out.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner.inner
    }

    pub fn into_inner(self) -> R {
        self.inner.inner
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Pulls ciphertext from `inner` and yields plaintext. Bad padding or a
/// truncated final block is reported at EOF as `InvalidData`.
pub struct DecipherReader<R> {
    inner: BlockReader<R, DecryptCore>,
}

impl<R: Read> DecipherReader<R> {
    pub fn new(inner: R, spec: &CipherSpec, key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        check_key(spec, key)?;
        Ok(Self {
            inner: BlockReader::new(inner, DecryptCore::new(key, iv)?),
        })
    }

    pub fn into_inner(self) -> R {
        self.inner.inner
    }
}

impl<R: Read> Read for DecipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

fn check_key(spec: &CipherSpec, key: &ObjectKey) -> CryptoResult<()> {
    if key.len() != spec.key_len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: spec.key_len(),
            actual: key.len(),
        });
    }
    Ok(())
}
