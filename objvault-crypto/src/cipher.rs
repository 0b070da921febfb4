//! Symmetric cipher configuration and per-object keys.
//!
//! Content ciphers are named with `algorithm/mode/padding` transformation
//! strings. Only `AES/CBC/PKCS5Padding` is supported; PKCS#5 padding on a
//! 16-byte block is PKCS#7.

use crate::error::{CryptoError, CryptoResult};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::consts::U16;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES block size in bytes. Also the IV length.
pub const BLOCK_SIZE: usize = 16;

const AES_CBC_PKCS5: &str = "AES/CBC/PKCS5Padding";

const AES_KEY_LENGTHS: &[usize] = &[16, 24, 32];

type Block = GenericArray<u8, U16>;

/// Supported `algorithm/mode/padding` transformations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transformation {
    AesCbcPkcs5,
}

impl Transformation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::AesCbcPkcs5 => AES_CBC_PKCS5,
        }
    }

    /// Key lengths, in bytes, the cipher accepts.
    pub fn key_lengths(&self) -> &'static [usize] {
        match self {
            Transformation::AesCbcPkcs5 => AES_KEY_LENGTHS,
        }
    }
}

impl FromStr for Transformation {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [alg, mode, padding]
                if alg.eq_ignore_ascii_case("AES")
                    && mode.eq_ignore_ascii_case("CBC")
                    && padding.eq_ignore_ascii_case("PKCS5Padding") =>
            {
                Ok(Transformation::AesCbcPkcs5)
            }
            _ => Err(CryptoError::UnsupportedCipher(s.to_string())),
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content cipher transformation together with its key size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherSpec {
    transformation: Transformation,
    key_size_bits: usize,
}

impl CipherSpec {
    pub fn new(transformation: &str, key_size_bits: usize) -> CryptoResult<Self> {
        let transformation = transformation.parse()?;
        match key_size_bits {
            128 | 192 | 256 => Ok(Self {
                transformation,
                key_size_bits,
            }),
            other => Err(CryptoError::UnsupportedCipher(format!(
                "{transformation} with {other}-bit key"
            ))),
        }
    }

    /// Builds the spec matching an existing key, e.g. one just unwrapped.
    pub fn for_key(transformation: &str, key: &ObjectKey) -> CryptoResult<Self> {
        Self::new(transformation, key.len() * 8)
    }

    pub fn transformation(&self) -> Transformation {
        self.transformation
    }

    /// Canonical transformation name, as recorded in mode tags.
    pub fn name(&self) -> &'static str {
        self.transformation.as_str()
    }

    pub fn key_size_bits(&self) -> usize {
        self.key_size_bits
    }

    pub fn key_len(&self) -> usize {
        self.key_size_bits / 8
    }

    pub fn iv_len(&self) -> usize {
        BLOCK_SIZE
    }
}

impl Default for CipherSpec {
    fn default() -> Self {
        Self {
            transformation: Transformation::AesCbcPkcs5,
            key_size_bits: 128,
        }
    }
}

/// Per-object symmetric key. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ObjectKey {
    bytes: Vec<u8>,
}

impl ObjectKey {
    /// Generates a fresh key for `spec` from a cryptographically secure RNG.
    pub fn generate<R: RngCore + rand::CryptoRng>(spec: &CipherSpec, rng: &mut R) -> Self {
        let mut bytes = vec![0u8; spec.key_len()];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wraps raw key bytes; the length must be a valid AES key length.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        Self::for_transformation(bytes, Transformation::AesCbcPkcs5)
    }

    /// Wraps raw key bytes whose length `transformation` accepts.
    pub fn for_transformation(mut bytes: Vec<u8>, transformation: Transformation) -> CryptoResult<Self> {
        let allowed = transformation.key_lengths();
        if allowed.contains(&bytes.len()) {
            return Ok(Self { bytes });
        }
        let actual = bytes.len();
        bytes.zeroize();
        Err(CryptoError::UnsupportedKeyLength { allowed, actual })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({} bits, redacted)", self.bytes.len() * 8)
    }
}

enum BlockEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

impl BlockEncryptor {
    fn new(key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        let invalid = |_| CryptoError::InvalidIvLength {
            expected: BLOCK_SIZE,
            actual: iv.len(),
        };
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            24 => Self::Aes192(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            32 => Self::Aes256(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            actual => {
                return Err(CryptoError::UnsupportedKeyLength {
                    allowed: AES_KEY_LENGTHS,
                    actual,
                });
            }
        })
    }

    fn encrypt_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block_mut(block),
            Self::Aes192(c) => c.encrypt_block_mut(block),
            Self::Aes256(c) => c.encrypt_block_mut(block),
        }
    }
}

enum BlockDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl BlockDecryptor {
    fn new(key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        let invalid = |_| CryptoError::InvalidIvLength {
            expected: BLOCK_SIZE,
            actual: iv.len(),
        };
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            24 => Self::Aes192(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            32 => Self::Aes256(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid)?),
            actual => {
                return Err(CryptoError::UnsupportedKeyLength {
                    allowed: AES_KEY_LENGTHS,
                    actual,
                });
            }
        })
    }

    fn decrypt_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block_mut(block),
            Self::Aes192(c) => c.decrypt_block_mut(block),
            Self::Aes256(c) => c.decrypt_block_mut(block),
        }
    }
}

/// Incremental block transform shared by the reader and writer adapters.
pub(crate) trait BlockTransform: Send {
    /// Consumes `input`, appending every byte that can already be emitted.
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>);

    /// Emits the trailing bytes. Called exactly once, at end of input.
    fn finalize(&mut self, out: &mut Vec<u8>) -> CryptoResult<()>;
}

/// CBC encryption with PKCS#7 padding applied at finalize.
pub(crate) struct EncryptCore {
    cipher: BlockEncryptor,
    pending: Vec<u8>,
}

impl EncryptCore {
    pub(crate) fn new(key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        Ok(Self {
            cipher: BlockEncryptor::new(key, iv)?,
            pending: Vec::with_capacity(BLOCK_SIZE),
        })
    }
}

impl BlockTransform for EncryptCore {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let whole = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if whole == 0 {
            return;
        }
        let start = out.len();
        out.extend_from_slice(&self.pending[..whole]);
        for block in out[start..].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(block);
        }
        self.pending.drain(..whole);
    }

    fn finalize(&mut self, out: &mut Vec<u8>) -> CryptoResult<()> {
        let mut block = Block::default();
        block[..self.pending.len()].copy_from_slice(&self.pending);
        Pkcs7::pad(&mut block, self.pending.len());
        self.cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        self.pending.zeroize();
        Ok(())
    }
}

/// CBC decryption. The last complete block is held back until finalize so
/// its padding can be stripped.
pub(crate) struct DecryptCore {
    cipher: BlockDecryptor,
    pending: Vec<u8>,
}

impl DecryptCore {
    pub(crate) fn new(key: &ObjectKey, iv: &[u8]) -> CryptoResult<Self> {
        Ok(Self {
            cipher: BlockDecryptor::new(key, iv)?,
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
        })
    }
}

impl BlockTransform for DecryptCore {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let total = self.pending.len();
        if total <= BLOCK_SIZE {
            return;
        }
        let keep = match total % BLOCK_SIZE {
            0 => BLOCK_SIZE,
            rem => rem,
        };
        let ready = total - keep;
        let start = out.len();
        out.extend_from_slice(&self.pending[..ready]);
        for block in out[start..].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(block);
        }
        self.pending.drain(..ready);
    }

    fn finalize(&mut self, out: &mut Vec<u8>) -> CryptoResult<()> {
        if self.pending.len() != BLOCK_SIZE {
            return Err(CryptoError::Decryption(format!(
                "ciphertext is not a whole number of {BLOCK_SIZE}-byte blocks"
            )));
        }
        let mut block = Block::clone_from_slice(&self.pending);
        self.cipher.decrypt_block(&mut block);
        self.pending.clear();

        let result = match Pkcs7::unpad(&block) {
            Ok(plain) => {
                out.extend_from_slice(plain);
                Ok(())
            }
            Err(_) => Err(CryptoError::Decryption(
                "bad padding (wrong key or corrupted data)".to_string(),
            )),
        };
        block.as_mut_slice().zeroize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: u8, len: usize) -> ObjectKey {
        ObjectKey::from_bytes(vec![bytes; len]).unwrap()
    }

    #[test]
    fn parses_transformation_case_insensitively() {
        let t: Transformation = "aes/cbc/pkcs5padding".parse().unwrap();
        assert_eq!(t, Transformation::AesCbcPkcs5);
        assert_eq!(t.as_str(), "AES/CBC/PKCS5Padding");
    }

    #[test]
    fn rejects_unsupported_transformations() {
        for name in ["AES/GCM/NoPadding", "DES/CBC/PKCS5Padding", "AES/CBC", ""] {
            let err = name.parse::<Transformation>().unwrap_err();
            assert!(matches!(err, CryptoError::UnsupportedCipher(_)), "{name}");
        }
    }

    #[test]
    fn rejects_invalid_key_sizes() {
        assert!(CipherSpec::new(AES_CBC_PKCS5, 256).is_ok());
        assert!(matches!(
            CipherSpec::new(AES_CBC_PKCS5, 64),
            Err(CryptoError::UnsupportedCipher(_))
        ));
    }

    #[test]
    fn object_key_rejects_bad_lengths() {
        let err = ObjectKey::from_bytes(vec![1; 15]).unwrap_err();
        match err {
            CryptoError::UnsupportedKeyLength { allowed, actual } => {
                assert_eq!(allowed, [16, 24, 32]);
                assert_eq!(actual, 15);
            }
            other => panic!("expected UnsupportedKeyLength, got: {other:?}"),
        }
    }

    #[test]
    fn wrong_iv_length_names_the_iv() {
        let err = EncryptCore::new(&key(1, 24), &[0u8; 8]).err().unwrap();
        assert!(matches!(err, CryptoError::InvalidIvLength { expected: 16, actual: 8 }));
    }

    #[test]
    fn corrupted_padding_is_rejected() {
        let k = key(3, 16);
        let iv = [4u8; BLOCK_SIZE];
        let mut enc = EncryptCore::new(&k, &iv).unwrap();
        let mut out = Vec::new();
        enc.update(b"seventeen bytes!!", &mut out);
        enc.finalize(&mut out).unwrap();
        assert_eq!(out.len(), 32);
        // The last byte of the first block feeds the pad length of the second.
        out[15] ^= 0x80;

        let mut dec = DecryptCore::new(&k, &iv).unwrap();
        let mut plain = Vec::new();
        dec.update(&out, &mut plain);
        assert!(matches!(dec.finalize(&mut plain), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn object_key_debug_is_redacted() {
        let k = key(0x42, 16);
        assert_eq!(format!("{k:?}"), "ObjectKey(128 bits, redacted)");
    }

    #[test]
    fn matches_sp800_38a_cbc_vector() {
        // NIST SP 800-38A F.2.1, CBC-AES128.Encrypt, first block.
        let key = ObjectKey::from_bytes(hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap())
            .unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plain = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let mut core = EncryptCore::new(&key, &iv).unwrap();
        let mut out = Vec::new();
        core.update(&plain, &mut out);
        assert_eq!(hex::encode(&out), "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn block_aligned_input_gets_a_full_padding_block() {
        let k = key(7, 16);
        let iv = [9u8; BLOCK_SIZE];
        let mut enc = EncryptCore::new(&k, &iv).unwrap();
        let mut out = Vec::new();
        enc.update(&[0u8; 32], &mut out);
        enc.finalize(&mut out).unwrap();
        assert_eq!(out.len(), 48);

        let mut dec = DecryptCore::new(&k, &iv).unwrap();
        let mut plain = Vec::new();
        dec.update(&out, &mut plain);
        dec.finalize(&mut plain).unwrap();
        assert_eq!(plain, vec![0u8; 32]);
    }

    #[test]
    fn truncated_ciphertext_fails_at_finalize() {
        let k = key(7, 32);
        let iv = [1u8; BLOCK_SIZE];
        let mut dec = DecryptCore::new(&k, &iv).unwrap();
        let mut plain = Vec::new();
        dec.update(&[0u8; 20], &mut plain);
        let err = dec.finalize(&mut plain).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }
}
