//! Authenticated chunked payload encryption.
//!
//! The plaintext is length-prefixed, padded with random filler to hide its
//! true size, split into chunks and sealed chunk by chunk with
//! ChaCha20-Poly1305 under per-index PBKDF2 keys. A whole-stream HMAC over
//! the per-chunk content hashes lets the receiver reject reordered,
//! dropped or modified chunks before attempting any decryption.

use crate::error::{ProtocolError, ProtocolResult};
use crate::transport::base64_bytes;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracegate_crypto::{
    auth_decrypt, auth_encrypt, derive_chunk_key, derive_key, hmac_sign_hex, hmac_verify_hex,
    sha256, CryptoError, KdfParams, Salt, SealedBox, NONCE_SIZE, TAG_SIZE,
};

/// Format version of [`ChunkedPayload`].
pub const CHUNKED_FORMAT_VERSION: u8 = 1;

/// Default plaintext bytes per chunk.
pub const DEFAULT_AEAD_CHUNK_SIZE: usize = 16 * 1024;

/// Padding granularity.
pub const PAD_BLOCK: usize = 256;

const LENGTH_PREFIX: usize = 4;
const SIGNATURE_CONTEXT: &str = "stream-signature";

/// Tuning for [`split_into_encrypted_chunks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
    /// Key derivation parameters.
    pub kdf: KdfParams,
    /// Upper bound on extra random filler beyond block alignment.
    pub max_padding: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_AEAD_CHUNK_SIZE,
            kdf: KdfParams::default(),
            max_padding: 4 * PAD_BLOCK,
        }
    }
}

/// One sealed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChunk {
    /// Position in the stream, starting at 0.
    pub index: u32,
    /// AEAD initialization vector.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// AEAD tag.
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
    /// Plaintext size of this chunk.
    pub size: u32,
}

impl EncryptedChunk {
    fn content_hash(&self) -> [u8; 32] {
        let mut buf =
            Vec::with_capacity(8 + self.iv.len() + self.ciphertext.len() + self.tag.len());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&self.ciphertext);
        buf.extend_from_slice(&self.tag);
        sha256(&buf)
    }

    fn sealed(&self) -> ProtocolResult<SealedBox> {
        let iv: [u8; NONCE_SIZE] = self.iv.as_slice().try_into().map_err(|_| {
            ProtocolError::IntegrityFailure(format!("chunk {} has a malformed iv", self.index))
        })?;
        let tag: [u8; TAG_SIZE] = self.tag.as_slice().try_into().map_err(|_| {
            ProtocolError::IntegrityFailure(format!("chunk {} has a malformed tag", self.index))
        })?;
        Ok(SealedBox {
            iv,
            ciphertext: self.ciphertext.clone(),
            tag,
        })
    }
}

/// A payload sealed as an ordered set of chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedPayload {
    /// Format version.
    pub version: u8,
    /// Hex-encoded derivation salt.
    pub salt: String,
    /// Hex-encoded HMAC over the chunk content hashes.
    pub signature: String,
    /// Chunks in stream order.
    pub chunks: Vec<EncryptedChunk>,
}

impl ChunkedPayload {
    /// Total padded plaintext size across all chunks.
    #[must_use]
    pub fn padded_size(&self) -> usize {
        self.chunks.iter().map(|c| c.size as usize).sum()
    }
}

/// Pads, splits and seals `plaintext` under `password`.
pub fn split_into_encrypted_chunks(
    plaintext: &[u8],
    password: &str,
    options: &ChunkOptions,
) -> ProtocolResult<ChunkedPayload> {
    if options.chunk_size == 0 {
        return Err(ProtocolError::InvalidChunkSize(0));
    }
    let true_len = u32::try_from(plaintext.len())
        .map_err(|_| ProtocolError::PayloadTooLarge(plaintext.len()))?;

    let padded = pad(plaintext, true_len, options.max_padding);
    let salt = Salt::random();

    let mut chunks = Vec::with_capacity(padded.len().div_ceil(options.chunk_size));
    for (i, piece) in padded.chunks(options.chunk_size).enumerate() {
        let index = u32::try_from(i).map_err(|_| ProtocolError::PayloadTooLarge(plaintext.len()))?;
        let key = derive_chunk_key(password, &salt, index, &options.kdf)?;
        let sealed = auth_encrypt(&key, piece)?;
        chunks.push(EncryptedChunk {
            index,
            iv: sealed.iv.to_vec(),
            ciphertext: sealed.ciphertext,
            tag: sealed.tag.to_vec(),
            size: piece.len() as u32,
        });
    }

    let signature = stream_signature(&chunks, password, &salt, &options.kdf)?;

    Ok(ChunkedPayload {
        version: CHUNKED_FORMAT_VERSION,
        salt: salt.to_hex(),
        signature,
        chunks,
    })
}

/// Verifies and decrypts a [`ChunkedPayload`].
///
/// The stream signature is checked before any chunk is decrypted, and the
/// plaintext is only returned once every chunk has authenticated.
pub fn decrypt_chunks(
    payload: &ChunkedPayload,
    password: &str,
    kdf: &KdfParams,
) -> ProtocolResult<Vec<u8>> {
    if payload.version != CHUNKED_FORMAT_VERSION {
        return Err(ProtocolError::UnsupportedVersion(u16::from(payload.version)));
    }
    if payload.chunks.is_empty() {
        return Err(ProtocolError::MissingFinalChunk);
    }
    for (expected, chunk) in payload.chunks.iter().enumerate() {
        if chunk.index as usize != expected {
            return Err(ProtocolError::ChunkOutOfOrder {
                expected: expected as u32,
                found: chunk.index,
            });
        }
    }

    let salt = Salt::from_hex(&payload.salt)
        .map_err(|e| ProtocolError::Encoding(format!("salt: {e}")))?;

    let sig_key = derive_key(password, &salt, SIGNATURE_CONTEXT, kdf)?;
    let hashes = concat_hashes(&payload.chunks);
    hmac_verify_hex(&hashes, sig_key.as_bytes(), &payload.signature).map_err(|_| {
        ProtocolError::IntegrityFailure("stream signature mismatch".to_string())
    })?;

    let mut padded = Vec::with_capacity(payload.padded_size());
    for chunk in &payload.chunks {
        let key = derive_chunk_key(password, &salt, chunk.index, kdf)?;
        let plain = auth_decrypt(&key, &chunk.sealed()?).map_err(|e| match e {
            CryptoError::DecryptionFailed => {
                ProtocolError::IntegrityFailure(format!("chunk {} failed authentication", chunk.index))
            }
            other => ProtocolError::Crypto(other),
        })?;
        if plain.len() != chunk.size as usize {
            return Err(ProtocolError::LengthMismatch {
                announced: chunk.size,
                found: plain.len() as u32,
            });
        }
        padded.extend_from_slice(&plain);
    }

    unpad(&padded)
}

fn stream_signature(
    chunks: &[EncryptedChunk],
    password: &str,
    salt: &Salt,
    kdf: &KdfParams,
) -> ProtocolResult<String> {
    let sig_key = derive_key(password, salt, SIGNATURE_CONTEXT, kdf)?;
    Ok(hmac_sign_hex(&concat_hashes(chunks), sig_key.as_bytes())?)
}

fn concat_hashes(chunks: &[EncryptedChunk]) -> Vec<u8> {
    chunks.iter().flat_map(EncryptedChunk::content_hash).collect()
}

fn pad(plaintext: &[u8], true_len: u32, max_padding: usize) -> Vec<u8> {
    let framed = LENGTH_PREFIX + plaintext.len();
    let aligned = framed.div_ceil(PAD_BLOCK).max(1) * PAD_BLOCK;
    let extra_blocks = max_padding / PAD_BLOCK;
    let mut rng = rand::thread_rng();
    let target = aligned + PAD_BLOCK * rng.gen_range(0..=extra_blocks);

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&true_len.to_be_bytes());
    out.extend_from_slice(plaintext);
    let mut filler = vec![0u8; target - framed];
    rng.fill_bytes(&mut filler);
    out.extend_from_slice(&filler);
    out
}

fn unpad(padded: &[u8]) -> ProtocolResult<Vec<u8>> {
    let prefix: [u8; LENGTH_PREFIX] = padded
        .get(..LENGTH_PREFIX)
        .and_then(|p| p.try_into().ok())
        .ok_or(ProtocolError::Truncated("length prefix"))?;
    let len = u32::from_be_bytes(prefix) as usize;
    padded
        .get(LENGTH_PREFIX..LENGTH_PREFIX + len)
        .map(<[u8]>::to_vec)
        .ok_or(ProtocolError::LengthMismatch {
            announced: len as u32,
            found: (padded.len() - LENGTH_PREFIX) as u32,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_block_aligned_and_hides_length() {
        let padded = pad(b"abc", 3, 0);
        assert_eq!(padded.len(), PAD_BLOCK);
        assert_eq!(unpad(&padded).unwrap(), b"abc");
    }

    #[test]
    fn padding_adds_bounded_extra_blocks() {
        for _ in 0..20 {
            let padded = pad(&[1u8; 300], 300, 2 * PAD_BLOCK);
            assert!(padded.len() >= 2 * PAD_BLOCK && padded.len() <= 4 * PAD_BLOCK);
            assert_eq!(padded.len() % PAD_BLOCK, 0);
        }
    }

    #[test]
    fn unpad_rejects_oversized_prefix() {
        let mut padded = vec![0u8; PAD_BLOCK];
        padded[..4].copy_from_slice(&10_000u32.to_be_bytes());
        assert!(unpad(&padded).is_err());
    }
}
