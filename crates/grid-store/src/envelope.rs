//! Compression envelope for row segments.
//!
//! A stored segment is either a bare zlib byte string written before
//! envelopes existed, or an explicit `{format, data}` wrapper. Which codec
//! to use is decided only from that structure, never by sniffing the bytes.
//!
//! New writes always produce `{format: "lzma", data}` where `data` is an xz
//! container holding the little-endian float32 values.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::config::DEFAULT_LZMA_PRESET;
use crate::error::{GridStoreError, Result};

/// Codec tag carried by a wrapped segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeFormat {
    Lzma,
    Zlib,
    /// A tag written by something newer (or broken). Kept verbatim so the
    /// document round-trips, but it cannot be decoded.
    Other(String),
}

impl EnvelopeFormat {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "lzma" => Self::Lzma,
            "zlib" => Self::Zlib,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Lzma => "lzma",
            Self::Zlib => "zlib",
            Self::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for EnvelopeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One field's compressed values for one shard of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Pre-envelope bytes; always zlib.
    Legacy(Vec<u8>),
    /// Current form.
    Wrapped { format: EnvelopeFormat, data: Vec<u8> },
}

impl Segment {
    /// Rebuild a segment from its stored parts. A missing tag means the value
    /// was stored as a bare byte string.
    pub fn from_parts(format: Option<&str>, data: Vec<u8>) -> Self {
        match format {
            Some(tag) => Self::Wrapped {
                format: EnvelopeFormat::from_tag(tag),
                data,
            },
            None => Self::Legacy(data),
        }
    }

    /// Envelope tag, or `None` for a legacy segment.
    pub fn format_tag(&self) -> Option<&str> {
        match self {
            Self::Legacy(_) => None,
            Self::Wrapped { format, .. } => Some(format.as_str()),
        }
    }

    /// Compressed payload.
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Legacy(data) | Self::Wrapped { data, .. } => data,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Compress a row segment with the current codec.
pub fn encode(values: &[f32]) -> Result<Segment> {
    encode_with(&EnvelopeFormat::Lzma, DEFAULT_LZMA_PRESET, values)
}

/// Compress a row segment into an envelope of the given format.
///
/// `level` is the xz preset for LZMA and the deflate level for zlib; both
/// are clamped to 0-9.
pub fn encode_with(format: &EnvelopeFormat, level: u32, values: &[f32]) -> Result<Segment> {
    let raw = floats_to_bytes(values);
    let data = match format {
        EnvelopeFormat::Lzma => lzma_compress(&raw, level)?,
        EnvelopeFormat::Zlib => zlib_compress(&raw, level)?,
        EnvelopeFormat::Other(tag) => return Err(GridStoreError::UnknownEnvelope(tag.clone())),
    };

    Ok(Segment::Wrapped {
        format: format.clone(),
        data,
    })
}

/// Produce a bare zlib segment as written before envelopes existed.
pub fn encode_legacy(values: &[f32]) -> Result<Segment> {
    let raw = floats_to_bytes(values);
    Ok(Segment::Legacy(zlib_compress(&raw, 6)?))
}

/// Decompress a segment back into float32 values.
pub fn decode(segment: &Segment) -> Result<Vec<f32>> {
    let raw = match segment {
        Segment::Wrapped {
            format: EnvelopeFormat::Lzma,
            data,
        } => lzma_decompress(data)?,
        Segment::Wrapped {
            format: EnvelopeFormat::Zlib,
            data,
        } => zlib_decompress(data)?,
        Segment::Wrapped {
            format: EnvelopeFormat::Other(tag),
            ..
        } => return Err(GridStoreError::UnknownEnvelope(tag.clone())),
        Segment::Legacy(data) => zlib_decompress(data)?,
    };

    bytes_to_floats(&raw)
}

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(values.len() * 4);
    for v in values {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    raw
}

fn bytes_to_floats(raw: &[u8]) -> Result<Vec<f32>> {
    if raw.len() % 4 != 0 {
        return Err(GridStoreError::Decompression(format!(
            "payload of {} bytes is not a whole number of float32 values",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn lzma_compress(raw: &[u8], preset: u32) -> Result<Vec<u8>> {
    let mut encoder = XzEncoder::new(Vec::new(), preset.min(9));
    encoder
        .write_all(raw)
        .map_err(|e| GridStoreError::Compression(format!("lzma: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| GridStoreError::Compression(format!("lzma: {}", e)))
}

fn lzma_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    XzDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| GridStoreError::Decompression(format!("lzma: {}", e)))?;
    Ok(raw)
}

fn zlib_compress(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(raw)
        .map_err(|e| GridStoreError::Compression(format!("zlib: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| GridStoreError::Compression(format!("zlib: {}", e)))
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| GridStoreError::Decompression(format!("zlib: {}", e)))?;
    Ok(raw)
}
