//! Property-based tests for both transports.

use proptest::prelude::*;
use tracegate_crypto::KdfParams;
use tracegate_protocol::{
    decrypt_chunks, split_into_encrypted_chunks, ChunkOptions, FrameKind, StreamCodec, XorCipher,
};

fn kind_strategy() -> impl Strategy<Value = FrameKind> {
    prop_oneof![
        Just(FrameKind::Script),
        Just(FrameKind::Layer),
        Just(FrameKind::Directive),
        Just(FrameKind::Heartbeat),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn binary_roundtrip(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..70_000),
        chunk_size in 1usize..8192,
    ) {
        let codec = StreamCodec::new().with_chunk_size(chunk_size).unwrap();
        let frame = codec.decode(&codec.encode(kind, &payload).unwrap()).unwrap();
        prop_assert_eq!(frame.kind, kind);
        prop_assert_eq!(frame.payload, payload);
    }

    #[test]
    fn obfuscated_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
        key in prop::collection::vec(any::<u8>(), 1..64),
        salt in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let codec = StreamCodec::new().with_cipher(XorCipher::new(key, salt).unwrap());
        let frame = codec.decode(&codec.encode(FrameKind::Script, &payload).unwrap()).unwrap();
        prop_assert_eq!(frame.payload, payload);
    }

    #[test]
    fn any_ciphertext_flip_is_caught_by_signature(
        payload in prop::collection::vec(any::<u8>(), 1..2048),
        pick in any::<prop::sample::Index>(),
        byte in any::<prop::sample::Index>(),
    ) {
        let options = ChunkOptions { chunk_size: 300, kdf: KdfParams { iterations: 4 }, max_padding: 0 };
        let mut sealed = split_into_encrypted_chunks(&payload, "password", &options).unwrap();
        let c = pick.index(sealed.chunks.len());
        let b = byte.index(sealed.chunks[c].ciphertext.len());
        sealed.chunks[c].ciphertext[b] ^= 0xFF;
        prop_assert!(decrypt_chunks(&sealed, "password", &options.kdf).is_err());
    }

    #[test]
    fn chunked_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..3000),
        password in "[a-zA-Z0-9]{1,32}",
    ) {
        let options = ChunkOptions { chunk_size: 512, kdf: KdfParams { iterations: 4 }, max_padding: 512 };
        let sealed = split_into_encrypted_chunks(&payload, &password, &options).unwrap();
        prop_assert_eq!(decrypt_chunks(&sealed, &password, &options.kdf).unwrap(), payload);
    }
}
