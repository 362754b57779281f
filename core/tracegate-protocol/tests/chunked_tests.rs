use tracegate_crypto::KdfParams;
use tracegate_protocol::{
    decrypt_chunks, split_into_encrypted_chunks, ChunkOptions, ChunkedPayload, ProtocolError,
    PAD_BLOCK,
};
use tracegate_types::GateError;

fn options(chunk_size: usize) -> ChunkOptions {
    ChunkOptions {
        chunk_size,
        kdf: KdfParams { iterations: 8 },
        max_padding: PAD_BLOCK,
    }
}

fn kdf() -> KdfParams {
    KdfParams { iterations: 8 }
}

#[test]
fn roundtrip() {
    let plaintext = b"local x = 1\nreturn x".repeat(100);
    let sealed = split_into_encrypted_chunks(&plaintext, "pw", &options(512)).unwrap();
    assert!(sealed.chunks.len() > 1);
    assert_eq!(decrypt_chunks(&sealed, "pw", &kdf()).unwrap(), plaintext);
}

#[test]
fn roundtrip_empty() {
    let sealed = split_into_encrypted_chunks(b"", "pw", &options(512)).unwrap();
    assert_eq!(decrypt_chunks(&sealed, "pw", &kdf()).unwrap(), b"");
}

#[test]
fn padding_obscures_length() {
    let sealed = split_into_encrypted_chunks(b"tiny", "pw", &options(4096)).unwrap();
    assert!(sealed.padded_size() >= PAD_BLOCK);
    assert_eq!(sealed.padded_size() % PAD_BLOCK, 0);
}

#[test]
fn wrong_password_fails_signature() {
    let sealed = split_into_encrypted_chunks(b"payload", "pw", &options(64)).unwrap();
    assert!(matches!(
        decrypt_chunks(&sealed, "nope", &kdf()),
        Err(ProtocolError::IntegrityFailure(_))
    ));
}

#[test]
fn flipped_ciphertext_byte_fails_signature() {
    let mut sealed = split_into_encrypted_chunks(&[5u8; 1000], "pw", &options(256)).unwrap();
    sealed.chunks[1].ciphertext[3] ^= 0x40;
    let err = decrypt_chunks(&sealed, "pw", &kdf()).unwrap_err();
    assert_eq!(
        err,
        ProtocolError::IntegrityFailure("stream signature mismatch".to_string())
    );
}

#[test]
fn swapped_chunks_rejected() {
    let mut sealed = split_into_encrypted_chunks(&[1u8; 1000], "pw", &options(256)).unwrap();
    sealed.chunks.swap(0, 1);
    assert!(matches!(
        decrypt_chunks(&sealed, "pw", &kdf()),
        Err(ProtocolError::ChunkOutOfOrder { expected: 0, found: 1 })
    ));
}

#[test]
fn relabelled_chunks_fail_signature() {
    let mut sealed = split_into_encrypted_chunks(&[1u8; 1000], "pw", &options(256)).unwrap();
    sealed.chunks.swap(0, 1);
    sealed.chunks[0].index = 0;
    sealed.chunks[1].index = 1;
    assert!(matches!(
        decrypt_chunks(&sealed, "pw", &kdf()),
        Err(ProtocolError::IntegrityFailure(_))
    ));
}

#[test]
fn dropped_chunk_rejected() {
    let mut sealed = split_into_encrypted_chunks(&[1u8; 1000], "pw", &options(256)).unwrap();
    sealed.chunks.pop();
    assert!(decrypt_chunks(&sealed, "pw", &kdf()).is_err());
}

#[test]
fn empty_chunk_list_rejected() {
    let mut sealed = split_into_encrypted_chunks(b"x", "pw", &options(256)).unwrap();
    sealed.chunks.clear();
    assert_eq!(
        decrypt_chunks(&sealed, "pw", &kdf()),
        Err(ProtocolError::MissingFinalChunk)
    );
}

#[test]
fn json_transport_roundtrip() {
    let sealed = split_into_encrypted_chunks(b"over the wire", "pw", &options(128)).unwrap();
    let json = serde_json::to_string(&sealed).unwrap();
    assert!(json.contains("\"signature\""));
    let back: ChunkedPayload = serde_json::from_str(&json).unwrap();
    assert_eq!(decrypt_chunks(&back, "pw", &kdf()).unwrap(), b"over the wire");
}

#[test]
fn integrity_errors_map_to_taxonomy() {
    let err: GateError = ProtocolError::IntegrityFailure("x".into()).into();
    assert!(matches!(err, GateError::IntegrityFailure(_)));
    let err: GateError = ProtocolError::ChecksumMismatch { expected: 1, computed: 2 }.into();
    assert!(matches!(err, GateError::IntegrityFailure(_)));
}
