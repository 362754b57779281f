//! Wire formats for payload delivery.
//!
//! Two transports are supported:
//!
//! - **Binary stream** ([`StreamCodec`]): an 8-byte header, length-tagged
//!   chunks and an 8-byte checksum footer, optionally obfuscated with the
//!   positional [`XorCipher`]. Cheap to parse inside constrained executors.
//! - **Chunked AEAD** ([`split_into_encrypted_chunks`]): padded, per-chunk
//!   ChaCha20-Poly1305 with per-index PBKDF2 keys and a whole-stream HMAC.
//!
//! Both travel inside JSON bodies using the base64 helpers in
//! [`transport`].

mod binary;
mod chunked;
mod error;
pub mod transport;
mod xor;

pub use binary::{
    rolling_checksum, Frame, FrameKind, StreamCodec, CHUNK_HEADER_SIZE, DEFAULT_CHUNK_SIZE,
    FLAG_OBFUSCATED, FOOTER_SIZE, HEADER_SIZE, MAX_CHUNK_SIZE, PROTOCOL_VERSION,
};
pub use chunked::{
    decrypt_chunks, split_into_encrypted_chunks, ChunkOptions, ChunkedPayload, EncryptedChunk,
    CHUNKED_FORMAT_VERSION, DEFAULT_AEAD_CHUNK_SIZE, PAD_BLOCK,
};
pub use error::{ProtocolError, ProtocolResult};
pub use transport::{decode_transport, encode_transport};
pub use xor::{xor_transform, XorCipher};
