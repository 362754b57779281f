//! Binary stream framing.
//!
//! ```text
//! header  : total_len u32 BE | version u16 BE | flags u16 BE
//! chunk*  : index u16 BE | size u16 BE (bit 15 = last) | bytes
//! footer  : checksum u32 BE | total_len u32 BE
//! ```
//!
//! The low byte of `flags` carries the [`FrameKind`]; bit 8 marks a body
//! transformed with [`XorCipher`]. The checksum is computed over the
//! plaintext, so it also catches a wrong de-obfuscation key.

use crate::error::{ProtocolError, ProtocolResult};
use crate::xor::XorCipher;

/// Size of the stream header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the stream footer in bytes.
pub const FOOTER_SIZE: usize = 8;

/// Size of each chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest chunk body representable in 15 bits.
pub const MAX_CHUNK_SIZE: usize = 0x7FFF;

/// Default chunk body size.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Flag bit: body is XOR-obfuscated.
pub const FLAG_OBFUSCATED: u16 = 0x0100;

const LAST_CHUNK: u16 = 0x8000;
const MAX_CHUNKS: usize = u16::MAX as usize + 1;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// A protected script payload.
    Script = 0x01,
    /// One loader pipeline layer.
    Layer = 0x02,
    /// A server directive (kick, ban, warning).
    Directive = 0x03,
    /// A heartbeat acknowledgement.
    Heartbeat = 0x04,
}

impl FrameKind {
    /// Decodes a kind from its wire byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Script),
            0x02 => Some(Self::Layer),
            0x03 => Some(Self::Directive),
            0x04 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Plaintext payload.
    pub payload: Vec<u8>,
}

/// Rolling polynomial checksum: `c = (c * 31 + byte) mod 2^31`.
///
/// End-to-end integrity only; it offers no protection against a
/// deliberate attacker.
#[must_use]
pub fn rolling_checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| {
        ((u64::from(acc) * 31 + u64::from(b)) & 0x7FFF_FFFF) as u32
    })
}

/// Encoder/decoder for the framed binary stream.
#[derive(Debug, Clone)]
pub struct StreamCodec {
    chunk_size: usize,
    cipher: Option<XorCipher>,
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cipher: None,
        }
    }
}

impl StreamCodec {
    /// Creates a codec with the default chunk size and no obfuscation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk body size (1..=[`MAX_CHUNK_SIZE`]).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> ProtocolResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(chunk_size));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Obfuscates encoded bodies and de-obfuscates flagged streams.
    #[must_use]
    pub fn with_cipher(mut self, cipher: XorCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Returns the configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Builds a framed stream carrying `payload`.
    pub fn encode(&self, kind: FrameKind, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        let total_len =
            u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
        if payload.len().div_ceil(self.chunk_size) > MAX_CHUNKS {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let mut flags = u16::from(kind as u8);
        let body = match &self.cipher {
            Some(cipher) => {
                flags |= FLAG_OBFUSCATED;
                cipher.apply(payload)
            }
            None => payload.to_vec(),
        };

        let chunk_count = body.len().div_ceil(self.chunk_size).max(1);
        let mut out = Vec::with_capacity(
            HEADER_SIZE + chunk_count * CHUNK_HEADER_SIZE + body.len() + FOOTER_SIZE,
        );

        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());

        if body.is_empty() {
            // Zero-length payloads still carry one terminating chunk.
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&LAST_CHUNK.to_be_bytes());
        } else {
            for (i, chunk) in body.chunks(self.chunk_size).enumerate() {
                let mut size = chunk.len() as u16;
                if i + 1 == chunk_count {
                    size |= LAST_CHUNK;
                }
                out.extend_from_slice(&(i as u16).to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
                out.extend_from_slice(chunk);
            }
        }

        out.extend_from_slice(&rolling_checksum(payload).to_be_bytes());
        out.extend_from_slice(&total_len.to_be_bytes());
        Ok(out)
    }

    /// Parses and verifies a framed stream. Any structural, length or
    /// checksum error rejects the whole stream.
    pub fn decode(&self, bytes: &[u8]) -> ProtocolResult<Frame> {
        let mut reader = Reader::new(bytes);

        let total_len = reader.read_u32().ok_or(ProtocolError::Truncated("header"))?;
        let version = reader.read_u16().ok_or(ProtocolError::Truncated("header"))?;
        let flags = reader.read_u16().ok_or(ProtocolError::Truncated("header"))?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind_byte = (flags & 0x00FF) as u8;
        let kind = FrameKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;

        let mut body = Vec::with_capacity((total_len as usize).min(bytes.len()));
        let mut expected_index: u32 = 0;
        loop {
            if reader.remaining() <= FOOTER_SIZE {
                return Err(ProtocolError::MissingFinalChunk);
            }
            let index = reader.read_u16().ok_or(ProtocolError::Truncated("chunk header"))?;
            let size_raw = reader.read_u16().ok_or(ProtocolError::Truncated("chunk header"))?;

            if u32::from(index) != expected_index {
                return Err(ProtocolError::ChunkOutOfOrder {
                    expected: expected_index,
                    found: u32::from(index),
                });
            }

            let size = usize::from(size_raw & !LAST_CHUNK);
            let chunk = reader.read_bytes(size).ok_or(ProtocolError::Truncated("chunk body"))?;
            body.extend_from_slice(chunk);

            if body.len() > total_len as usize {
                return Err(ProtocolError::LengthMismatch {
                    announced: total_len,
                    found: body.len() as u32,
                });
            }

            if size_raw & LAST_CHUNK != 0 {
                break;
            }
            expected_index += 1;
        }

        let checksum = reader.read_u32().ok_or(ProtocolError::Truncated("footer"))?;
        let confirmed_len = reader.read_u32().ok_or(ProtocolError::Truncated("footer"))?;
        if reader.remaining() != 0 {
            return Err(ProtocolError::TrailingData(reader.remaining()));
        }

        if confirmed_len != total_len {
            return Err(ProtocolError::LengthMismatch {
                announced: total_len,
                found: confirmed_len,
            });
        }
        if body.len() != total_len as usize {
            return Err(ProtocolError::LengthMismatch {
                announced: total_len,
                found: body.len() as u32,
            });
        }

        let payload = if flags & FLAG_OBFUSCATED != 0 {
            let cipher = self.cipher.as_ref().ok_or(ProtocolError::MissingKey)?;
            cipher.apply(&body)
        } else {
            body
        };

        let computed = rolling_checksum(&payload);
        if computed != checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: checksum,
                computed,
            });
        }

        Ok(Frame { kind, payload })
    }
}

/// Big-endian cursor over a byte slice.
struct Reader<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buffer[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
