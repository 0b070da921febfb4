//! Plaintext verification at end of stream.

use crate::error::CryptoError;
use sha1::{Digest, Sha1};
use std::io::{self, Read};

/// Verifies the SHA-1 and length of everything read through it.
///
/// The check runs once, when `inner` reports EOF. A mismatch is returned
/// from that `read` call, and every later one, as `InvalidData` carrying
/// [`CryptoError::IntegrityMismatch`].
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Sha1,
    count: u64,
    expected_sha1: Option<String>,
    expected_size: Option<u64>,
    verified: bool,
    mismatch: Option<(&'static str, String, String)>,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R, expected_sha1: Option<String>, expected_size: Option<u64>) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            count: 0,
            expected_sha1: expected_sha1.map(|s| s.trim().to_ascii_lowercase()),
            expected_size,
            verified: false,
            mismatch: None,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    fn verify(&mut self) -> Result<(), CryptoError> {
        if !self.verified {
            self.mismatch = self.compare();
            self.verified = true;
        }
        match &self.mismatch {
            Some((what, expected, actual)) => Err(CryptoError::IntegrityMismatch {
                what: *what,
                expected: expected.clone(),
                actual: actual.clone(),
            }),
            None => Ok(()),
        }
    }

    fn compare(&mut self) -> Option<(&'static str, String, String)> {
        if let Some(expected) = self.expected_size {
            if expected != self.count {
                return Some(("size", expected.to_string(), self.count.to_string()));
            }
        }
        if let Some(expected) = &self.expected_sha1 {
            let actual = hex::encode(self.hasher.finalize_reset());
            if *expected != actual {
                return Some(("sha1", expected.clone(), actual));
            }
        }
        None
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.verify()?;
            }
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}
