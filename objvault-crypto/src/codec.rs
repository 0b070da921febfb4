//! URL-safe base64 used for every binary metadata value.
//!
//! Values are written with padding (`+` → `-`, `/` → `_`). Decoding accepts
//! padded and unpadded input since some object stores trim trailing `=`.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encodes bytes as padded URL-safe base64.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decodes URL-safe base64, with or without padding.
pub fn decode_url_safe(encoded: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Encoding(format!("invalid base64url value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_url_safe_alphabet() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet.
        assert_eq!(encode_url_safe(&[0xfb, 0xff]), "-_8=");
    }

    #[test]
    fn decodes_with_and_without_padding() {
        assert_eq!(decode_url_safe("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_url_safe("-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn rejects_standard_alphabet() {
        let err = decode_url_safe("+/8=").unwrap_err();
        assert!(matches!(err, CryptoError::Encoding(_)));
    }
}
