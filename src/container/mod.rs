// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Container parsing for glTF models.
//!
//! Two shapes are accepted:
//!
//! - a textual `.gltf` document (first non-whitespace byte is `{`), parsed
//!   directly as JSON with no binary payload;
//! - a binary `.glb` container:
//!
//! ```text
//! offset 0   u32 magic "glTF"
//! offset 4   u32 version (2)
//! offset 8   u32 total length
//! offset 12  u32 chunk0 length, u32 chunk0 type (JSON), chunk0 bytes
//!            u32 chunk1 length, u32 chunk1 type (BIN),  chunk1 bytes   (optional)
//! ```
//!
//! All integers are little-endian. Every length is checked against the bytes
//! that remain before anything is decoded, and no partial document is
//! returned on failure.

pub mod document;

pub use document::{BufferDescriptor, BufferSource, ContainerDocument};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ParseError, ParseReason};

/// `glTF` read as a little-endian u32.
pub const GLB_MAGIC: u32 = u32::from_le_bytes(*b"glTF");

/// The only container version accepted.
pub const GLB_VERSION: u32 = 2;

pub const HEADER_LEN: usize = 12;
pub const CHUNK_HEADER_LEN: usize = 8;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Chunk type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Json,
    Bin,
}

impl ChunkKind {
    pub const JSON_TAG: u32 = u32::from_le_bytes(*b"JSON");
    pub const BIN_TAG: u32 = u32::from_le_bytes(*b"BIN\0");

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            Self::JSON_TAG => Some(Self::Json),
            Self::BIN_TAG => Some(Self::Bin),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            Self::Json => Self::JSON_TAG,
            Self::Bin => Self::BIN_TAG,
        }
    }
}

/// A typed, length-prefixed region of a binary container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Raw type tag; see [`ChunkKind::from_tag`].
    pub tag: u32,
    pub byte_length: u32,
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    pub fn kind(&self) -> Option<ChunkKind> {
        ChunkKind::from_tag(self.tag)
    }
}

/// The fixed 12-byte header of a binary container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlbHeader {
    pub magic: u32,
    pub version: u32,
    pub total_length: u32,
}

/// Which input shape a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// Binary `.glb`
    Glb,
    /// Textual `.gltf`
    Gltf,
}

impl ContainerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Gltf => "gltf",
        }
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedContainer {
    pub document: ContainerDocument,
    /// Raw BIN chunk payload, including any trailing alignment padding.
    pub binary: Option<Vec<u8>>,
    pub format: ContainerFormat,
    /// Bytes of the input covered by the header and the chunks read.
    pub bytes_consumed: usize,
}

/// Parse either container shape.
pub fn parse(bytes: &[u8]) -> Result<ParsedContainer, ParseError> {
    if looks_textual(bytes) {
        parse_text(bytes)
    } else {
        parse_binary(bytes)
    }
}

fn looks_textual(bytes: &[u8]) -> bool {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

/// Parse a textual glTF document.
pub fn parse_text(bytes: &[u8]) -> Result<ParsedContainer, ParseError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let json = decode_json(body)?;
    Ok(ParsedContainer {
        document: ContainerDocument::from_json(json, None)?,
        binary: None,
        format: ContainerFormat::Gltf,
        bytes_consumed: bytes.len(),
    })
}

/// Read and validate the 12-byte header.
///
/// Nothing past the header is inspected, so a bad magic or version fails
/// before any chunk is read.
pub fn read_header(bytes: &[u8]) -> Result<GlbHeader, ParseError> {
    if bytes.len() < 4 {
        return Err(ParseError::new(
            ParseReason::MalformedLength,
            format!("{} bytes is too short for a container header", bytes.len()),
        ));
    }
    let magic = read_u32(bytes, 0);
    if magic != GLB_MAGIC {
        return Err(ParseError::new(
            ParseReason::BadMagic,
            format!("expected magic 0x{:08X}, found 0x{:08X}", GLB_MAGIC, magic),
        ));
    }
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::new(
            ParseReason::MalformedLength,
            format!("header needs {} bytes, found {}", HEADER_LEN, bytes.len()),
        ));
    }
    let version = read_u32(bytes, 4);
    if version != GLB_VERSION {
        return Err(ParseError::new(
            ParseReason::UnsupportedVersion,
            format!("container version {} (only {} is supported)", version, GLB_VERSION),
        ));
    }
    let total_length = read_u32(bytes, 8);
    if (total_length as usize) < HEADER_LEN {
        return Err(ParseError::new(
            ParseReason::MalformedLength,
            format!("declared total length {} is smaller than the header", total_length),
        ));
    }
    if total_length as usize > bytes.len() {
        return Err(ParseError::new(
            ParseReason::LengthExceedsBuffer,
            format!(
                "declared total length {} exceeds the {} bytes available",
                total_length,
                bytes.len()
            ),
        ));
    }
    Ok(GlbHeader {
        magic,
        version,
        total_length,
    })
}

/// Read one chunk starting at `offset`, bounded by `end`.
///
/// Returns the chunk and the offset just past it.
pub fn read_chunk(bytes: &[u8], offset: usize, end: usize) -> Result<(Chunk<'_>, usize), ParseError> {
    let end = end.min(bytes.len());
    let remaining = end.saturating_sub(offset);
    if remaining < CHUNK_HEADER_LEN {
        return Err(ParseError::new(
            ParseReason::MalformedLength,
            format!("truncated chunk header at offset {} ({} bytes left)", offset, remaining),
        ));
    }
    let byte_length = read_u32(bytes, offset);
    let tag = read_u32(bytes, offset + 4);
    let start = offset + CHUNK_HEADER_LEN;
    if byte_length as usize > end - start {
        return Err(ParseError::new(
            ParseReason::LengthExceedsBuffer,
            format!(
                "chunk at offset {} declares {} bytes but only {} remain",
                offset,
                byte_length,
                end - start
            ),
        ));
    }
    let stop = start + byte_length as usize;
    Ok((
        Chunk {
            tag,
            byte_length,
            payload: &bytes[start..stop],
        },
        stop,
    ))
}

/// Parse a binary container.
pub fn parse_binary(bytes: &[u8]) -> Result<ParsedContainer, ParseError> {
    let header = read_header(bytes)?;
    let end = header.total_length as usize;

    if end == HEADER_LEN {
        return Err(ParseError::new(
            ParseReason::MissingJsonChunk,
            "container has no chunks",
        ));
    }

    let (json_chunk, mut offset) = read_chunk(bytes, HEADER_LEN, end)?;
    if json_chunk.kind() != Some(ChunkKind::Json) {
        return Err(ParseError::new(
            ParseReason::WrongFirstChunkType,
            format!("first chunk has type 0x{:08X}, expected JSON", json_chunk.tag),
        ));
    }

    let mut binary: Option<&[u8]> = None;
    if offset < end {
        let (chunk, next) = read_chunk(bytes, offset, end)?;
        if chunk.kind() != Some(ChunkKind::Bin) {
            return Err(ParseError::new(
                ParseReason::UnexpectedChunkType,
                format!("second chunk has type 0x{:08X}, expected BIN", chunk.tag),
            ));
        }
        binary = Some(chunk.payload);
        offset = next;
    }

    // Chunks past the BIN chunk are extension data this loader does not use;
    // they are length-checked and skipped.
    while offset < end {
        let (chunk, next) = read_chunk(bytes, offset, end)?;
        if chunk.kind().is_some() {
            return Err(ParseError::new(
                ParseReason::UnexpectedChunkType,
                format!("duplicate chunk of type 0x{:08X} at offset {}", chunk.tag, offset),
            ));
        }
        tracing::debug!(tag = chunk.tag, len = chunk.byte_length, "Skipping unknown chunk");
        offset = next;
    }

    let json = decode_json(json_chunk.payload)?;
    let document = ContainerDocument::from_json(json, binary.map(<[u8]>::len))?;

    // The chunk is padded to 4 bytes; the bound buffer's byteLength is the
    // real payload length.
    let binary = binary.map(|payload| {
        let declared = document
            .buffers
            .iter()
            .find(|b| b.source == BufferSource::BinaryChunk)
            .map(|b| b.byte_length);
        match declared {
            Some(len) if len <= payload.len() => payload[..len].to_vec(),
            _ => payload.to_vec(),
        }
    });

    Ok(ParsedContainer {
        document,
        binary,
        format: ContainerFormat::Glb,
        bytes_consumed: offset,
    })
}

fn decode_json(bytes: &[u8]) -> Result<serde_json::Value, ParseError> {
    // Some exporters pad the JSON chunk with NULs instead of spaces.
    let trimmed = match bytes.iter().rposition(|b| *b != 0) {
        Some(last) => &bytes[..=last],
        None => &bytes[..0],
    };
    let text = std::str::from_utf8(trimmed)
        .map_err(|e| ParseError::new(ParseReason::InvalidUtf8, e.to_string()))?;
    serde_json::from_str(text).map_err(|e| ParseError::new(ParseReason::InvalidJson, e.to_string()))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Errors from [`write_glb`].
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot serialize document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} is {len} bytes, larger than a container can hold")]
    TooLarge { what: &'static str, len: usize },
}

fn chunk_len(what: &'static str, len: usize) -> Result<u32, WriteError> {
    u32::try_from(len).map_err(|_| WriteError::TooLarge { what, len })
}

/// Serialize a document and optional payload as a binary container.
///
/// Chunks are padded to 4 bytes (JSON with spaces, BIN with zeros). A
/// synthetic buffer descriptor is normally left out since the parser
/// recreates it from the chunk; when the payload needs padding it is written
/// as an explicit `buffers` entry so its exact length survives.
pub fn write_glb(document: &ContainerDocument, binary: Option<&[u8]>) -> Result<Vec<u8>, WriteError> {
    let unaligned = binary.map(<[u8]>::len).filter(|len| len % 4 != 0);
    let json = match (unaligned, document.buffers.iter().any(|b| b.synthetic)) {
        (Some(len), true) => {
            let mut value = document.json.clone();
            if let Some(object) = value.as_object_mut() {
                object.insert("buffers".to_string(), serde_json::json!([{ "byteLength": len }]));
            }
            serde_json::to_vec(&value)?
        }
        _ => serde_json::to_vec(&document.json)?,
    };
    let json_len = padded_len(json.len());
    let bin_len = binary.map(|b| padded_len(b.len()));

    let total = HEADER_LEN
        + CHUNK_HEADER_LEN
        + json_len
        + bin_len.map(|l| CHUNK_HEADER_LEN + l).unwrap_or(0);
    let total_field = chunk_len("container", total)?;
    let json_field = chunk_len("JSON chunk", json_len)?;
    let bin_field = bin_len.map(|len| chunk_len("BIN chunk", len)).transpose()?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total_field.to_le_bytes());

    out.extend_from_slice(&json_field.to_le_bytes());
    out.extend_from_slice(&ChunkKind::JSON_TAG.to_le_bytes());
    out.extend_from_slice(&json);
    out.resize(out.len() + json_len - json.len(), b' ');

    if let (Some(bin), Some(len), Some(field)) = (binary, bin_len, bin_field) {
        out.extend_from_slice(&field.to_le_bytes());
        out.extend_from_slice(&ChunkKind::BIN_TAG.to_le_bytes());
        out.extend_from_slice(bin);
        out.resize(out.len() + len - bin.len(), 0);
    }

    Ok(out)
}
