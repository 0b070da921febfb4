mod support;

use objvault_transform::metadata::{
    COMP_COMPRESSED_SIZE, COMP_RATIO, COMP_UNCOMPRESSED_SIZE, ENC_UNENCRYPTED_SIZE, TRANSFORM_MODE,
};
use objvault_transform::{
    CompressionConfig, CompressionFactory, EncodeResult, Metadata, OutputTransform, PullTransform,
    TransformChain, TransformError, TransformFactory,
};
use pretty_assertions::assert_eq;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use support::*;

#[test]
fn higher_priority_stage_sees_plaintext_first() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let order: Vec<&str> = chain.registry().iter().map(|f| f.class_tag()).collect();
    assert_eq!(order, ["COMP", "ENC"]);

    let plain = compressible(50_000);
    let (encoded, meta) = chain.encode(&plain[..], &Metadata::new()).unwrap();
    assert_eq!(meta[TRANSFORM_MODE], "COMP:Deflate/5|ENC:AES/CBC/PKCS5Padding");
    assert_eq!(meta[COMP_UNCOMPRESSED_SIZE], "50000");
    // Encryption ran over the compressed bytes.
    assert_eq!(meta[ENC_UNENCRYPTED_SIZE], meta[COMP_COMPRESSED_SIZE]);
    assert!(encoded.len() < plain.len() / 10);

    let (reader, _) = chain.decode(Cursor::new(encoded), &meta).unwrap();
    assert_eq!(read_all(reader), plain);
}

#[test]
fn registration_order_does_not_matter() {
    let keys = bare_keys(key_a(), vec![]);
    let chain = TransformChain::default()
        .with_factory(compression())
        .with_encryption(encryption(keys));
    let (_, meta) = chain.encode(&b"abc"[..], &Metadata::new()).unwrap();
    assert_eq!(meta[TRANSFORM_MODE], "COMP:Deflate/5|ENC:AES/CBC/PKCS5Padding");
}

#[test]
fn lower_priority_compression_runs_after_encryption() {
    let config = CompressionConfig {
        priority: 100,
        ..CompressionConfig::default()
    };
    let chain = encrypting_chain(bare_keys(key_a(), vec![]))
        .with_factory(Arc::new(CompressionFactory::new(&config).unwrap()));

    let plain = compressible(10_000);
    let (encoded, meta) = chain.encode(&plain[..], &Metadata::new()).unwrap();
    assert_eq!(meta[TRANSFORM_MODE], "ENC:AES/CBC/PKCS5Padding|COMP:Deflate/5");
    assert_eq!(meta[ENC_UNENCRYPTED_SIZE], "10000");

    let (reader, _) = chain.decode(Cursor::new(encoded), &meta).unwrap();
    assert_eq!(read_all(reader), plain);
}

#[test]
fn compression_records_sizes_and_ratio() {
    let chain = TransformChain::default().with_factory(compression());
    let plain = compressible(8_000);
    let (encoded, meta) = chain.encode(&plain[..], &Metadata::new()).unwrap();

    assert_eq!(meta[TRANSFORM_MODE], "COMP:Deflate/5");
    assert_eq!(meta[COMP_COMPRESSED_SIZE], encoded.len().to_string());
    assert!(meta[COMP_RATIO].ends_with('%'));
    assert_eq!(meta["x-emc-comp-uncompressed-sha1"], sha1_hex(&plain));
}

#[test]
fn pull_chain_round_trips() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let plain = compressible(30_000);

    let mut pull = chain.encode_source(Box::new(&plain[..]), &Metadata::new()).unwrap();
    assert_eq!(pull.transform_mode(), "COMP:Deflate/5|ENC:AES/CBC/PKCS5Padding");
    let mut encoded = Vec::new();
    pull.read_to_end(&mut encoded).unwrap();
    pull.close().unwrap();
    let meta = pull.encoded_metadata().unwrap();

    assert_eq!(meta[COMP_UNCOMPRESSED_SIZE], "30000");
    let (reader, _) = chain.decode(Cursor::new(encoded), &meta).unwrap();
    assert_eq!(read_all(reader), plain);
}

#[test]
fn pull_chain_closed_early_has_no_metadata() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let plain = compressible(100_000);
    let mut pull = chain.encode_source(Box::new(&plain[..]), &Metadata::new()).unwrap();
    let mut some = [0u8; 64];
    pull.read_exact(&mut some).unwrap();
    pull.close().unwrap();

    assert!(matches!(pull.encoded_metadata(), Err(TransformError::IllegalState(_))));
    match pull.read(&mut some) {
        Err(e) => assert!(matches!(TransformError::from(e), TransformError::IllegalState(_))),
        Ok(n) => panic!("expected IllegalState, read {n} bytes"),
    }
}

#[test]
fn chain_output_lifecycle() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let mut sink = Vec::new();
    let mut output = chain.encode_sink(Box::new(&mut sink), &Metadata::new()).unwrap();
    output.write_all(b"stream me").unwrap();
    assert!(matches!(output.encoded_metadata(), Err(TransformError::IllegalState(_))));

    output.close().unwrap();
    output.close().unwrap();
    assert!(output.is_closed());
    assert!(output.encoded_metadata().is_ok());
    assert!(output.write(b"more").is_err());
}

#[test]
fn stale_transform_fields_are_not_carried_over() {
    let chain = encrypting_chain(bare_keys(key_a(), vec![]));
    let input = Metadata::from([
        ("x-emc-comp-ratio".to_string(), "50.0%".to_string()),
        (TRANSFORM_MODE.to_string(), "COMP:Deflate/9".to_string()),
        ("owner".to_string(), "me".to_string()),
    ]);
    let (_, meta) = chain.encode(&b"fresh"[..], &input).unwrap();
    assert!(!meta.contains_key("x-emc-comp-ratio"));
    assert_eq!(meta[TRANSFORM_MODE], "ENC:AES/CBC/PKCS5Padding");
    assert_eq!(meta["owner"], "me");
}

#[test]
fn untransformed_objects_pass_through() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let meta = Metadata::from([("owner".to_string(), "me".to_string())]);
    let (reader, out_meta) = chain.decode(&b"raw bytes"[..], &meta).unwrap();
    assert_eq!(read_all(reader), b"raw bytes");
    assert_eq!(out_meta, meta);
}

#[test]
fn unknown_tag_fails_closed() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let meta = Metadata::from([(TRANSFORM_MODE.to_string(), "ZIP:LZMA/3".to_string())]);
    match chain.decode(&b"whatever"[..], &meta) {
        Err(TransformError::NoDecoder(tag)) => assert_eq!(tag, "ZIP:LZMA/3"),
        Err(other) => panic!("expected NoDecoder, got: {other:?}"),
        Ok(_) => panic!("expected NoDecoder, got a reader"),
    }
}

#[test]
fn unsupported_compression_level_fails_closed() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let meta = Metadata::from([(TRANSFORM_MODE.to_string(), "COMP:Deflate/12".to_string())]);
    assert!(matches!(
        chain.decode(&b""[..], &meta),
        Err(TransformError::NoDecoder(_))
    ));
}

#[test]
fn malformed_mode_is_rejected() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let meta = Metadata::from([(TRANSFORM_MODE.to_string(), "COMP|ENC".to_string())]);
    assert!(matches!(
        chain.decode(&b""[..], &meta),
        Err(TransformError::UnknownModeTag(_))
    ));
}

#[test]
fn ranges_only_on_untransformed_objects() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));

    let (reader, _) = chain
        .decode_range(&b"0123456789"[..], &Metadata::new(), 3..7)
        .unwrap();
    assert_eq!(read_all(reader), b"3456");

    let (encoded, meta) = chain.encode(&b"0123456789"[..], &Metadata::new()).unwrap();
    match chain.decode_range(Cursor::new(encoded), &meta, 3..7) {
        Err(TransformError::RangeUnsupported(mode)) => assert_eq!(mode, meta[TRANSFORM_MODE]),
        Err(other) => panic!("expected RangeUnsupported, got: {other:?}"),
        Ok(_) => panic!("expected RangeUnsupported, got a reader"),
    }
}

fn integrity_error(chain: &TransformChain, encoded: Vec<u8>, meta: &Metadata) -> TransformError {
    let (mut reader, _) = chain.decode(Cursor::new(encoded), meta).unwrap();
    match reader.read_to_end(&mut Vec::new()) {
        Err(e) => TransformError::from(e),
        Ok(n) => panic!("expected an integrity failure, decoded {n} bytes"),
    }
}

#[test]
fn strict_chain_rejects_appended_ciphertext() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let (mut encoded, meta) = chain.encode(&compressible(5_000)[..], &Metadata::new()).unwrap();
    encoded.extend_from_slice(&[0x5a; 48]);

    let err = integrity_error(&chain, encoded, &meta);
    assert!(err.is_integrity_failure(), "{err:?}");
}

#[test]
fn strict_chain_rejects_appended_ciphertext_without_compression_digest() {
    let config = CompressionConfig {
        compute_digest: false,
        ..CompressionConfig::default()
    };
    let chain = encrypting_chain(bare_keys(key_a(), vec![]))
        .with_factory(Arc::new(CompressionFactory::new(&config).unwrap()));
    let (mut encoded, meta) = chain.encode(&compressible(5_000)[..], &Metadata::new()).unwrap();
    assert!(!meta.contains_key("x-emc-comp-uncompressed-sha1"));
    encoded.extend_from_slice(&[0u8; 32]);

    let err = integrity_error(&chain, encoded, &meta);
    assert!(err.is_integrity_failure(), "{err:?}");
}

#[test]
fn strict_chain_rejects_truncated_ciphertext() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let (encoded, meta) = chain.encode(&compressible(5_000)[..], &Metadata::new()).unwrap();

    for cut in [5, 16] {
        let truncated = encoded[..encoded.len() - cut].to_vec();
        let err = integrity_error(&chain, truncated, &meta);
        assert!(err.is_integrity_failure(), "cut {cut}: {err:?}");
    }
}

#[test]
fn strict_chain_rejects_modified_ciphertext() {
    let chain = compressing_chain(bare_keys(key_a(), vec![]));
    let (encoded, meta) = chain.encode(&compressible(5_000)[..], &Metadata::new()).unwrap();

    for at in [0, encoded.len() / 2, encoded.len() - 1] {
        let mut tampered = encoded.clone();
        tampered[at] ^= 0x01;
        let err = integrity_error(&chain, tampered, &meta);
        assert!(err.is_integrity_failure(), "byte {at}: {err:?}");
    }
}
