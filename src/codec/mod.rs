// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pluggable decompression codecs.
//!
//! Three codec kinds exist, one per compression marker a glTF document can
//! carry:
//!
//! | Kind       | Marker                        | Applied to    |
//! |------------|-------------------------------|---------------|
//! | `geometry` | `KHR_draco_mesh_compression`  | primitives    |
//! | `texture`  | `KHR_texture_basisu`          | textures      |
//! | `meshopt`  | `EXT_meshopt_compression`     | buffer views  |
//!
//! A [`CodecFactory`] turns a `(kind, resource_path)` pair into a [`Codec`].
//! The [`BuiltinCodecFactory`] understands `builtin:lz4` and `builtin:raw`;
//! hosts with real decoders supply their own factory.

pub mod registry;

pub use registry::CodecRegistry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LoadError;

/// The three codec slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Geometry,
    Texture,
    MeshOpt,
}

impl CodecKind {
    pub const ALL: [CodecKind; 3] = [CodecKind::Geometry, CodecKind::Texture, CodecKind::MeshOpt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Texture => "texture",
            Self::MeshOpt => "meshopt",
        }
    }

    /// The glTF extension that marks a resource as needing this codec.
    pub fn extension_name(&self) -> &'static str {
        match self {
            Self::Geometry => "KHR_draco_mesh_compression",
            Self::Texture => "KHR_texture_basisu",
            Self::MeshOpt => "EXT_meshopt_compression",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A codec could not be constructed. Logged by the registry, never fatal.
#[derive(Debug, Clone, Error)]
#[error("failed to initialize {kind} codec from {resource_path}: {message}")]
pub struct CodecInitError {
    pub kind: CodecKind,
    pub resource_path: String,
    pub message: String,
}

/// A codec rejected its input.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// A decoder for one codec kind.
///
/// Instances are shared by every task of a worker and must not carry
/// per-call state.
pub trait Codec: Send + Sync + fmt::Debug {
    fn kind(&self) -> CodecKind;

    fn resource_path(&self) -> &str;

    /// Decode `input`. `expected_len` is the decoded size the document
    /// declares, when it declares one.
    fn decode(&self, input: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, CodecError>;
}

/// Constructs codecs for the registry.
pub trait CodecFactory: Send + Sync {
    fn create(&self, kind: CodecKind, resource_path: &str) -> Result<Arc<dyn Codec>, CodecInitError>;
}

/// Factory for the decoders that ship with the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCodecFactory;

impl CodecFactory for BuiltinCodecFactory {
    fn create(&self, kind: CodecKind, resource_path: &str) -> Result<Arc<dyn Codec>, CodecInitError> {
        let path = resource_path.to_string();
        match resource_path {
            "builtin:lz4" => Ok(Arc::new(Lz4Codec { kind, path })),
            "builtin:raw" => Ok(Arc::new(RawCodec { kind, path })),
            other => Err(CodecInitError {
                kind,
                resource_path: other.to_string(),
                message: "no built-in decoder at this path".to_string(),
            }),
        }
    }
}

/// Size-prepended LZ4 block decoder.
#[derive(Debug)]
struct Lz4Codec {
    kind: CodecKind,
    path: String,
}

impl Codec for Lz4Codec {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn resource_path(&self) -> &str {
        &self.path
    }

    fn decode(&self, input: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::decompress_size_prepended(input)
            .map_err(|e| CodecError(format!("lz4: {}", e)))?;
        check_len(out, expected_len)
    }
}

/// Identity decoder, for payloads stored uncompressed behind a marker.
#[derive(Debug)]
struct RawCodec {
    kind: CodecKind,
    path: String,
}

impl Codec for RawCodec {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn resource_path(&self) -> &str {
        &self.path
    }

    fn decode(&self, input: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, CodecError> {
        check_len(input.to_vec(), expected_len)
    }
}

fn check_len(out: Vec<u8>, expected_len: Option<usize>) -> Result<Vec<u8>, CodecError> {
    match expected_len {
        Some(len) if len != out.len() => Err(CodecError(format!(
            "decoded {} bytes, expected {}",
            out.len(),
            len
        ))),
        _ => Ok(out),
    }
}

/// The codecs available to one load, one optional slot per kind.
#[derive(Debug, Clone, Default)]
pub struct CodecSet {
    pub geometry: Option<Arc<dyn Codec>>,
    pub texture: Option<Arc<dyn Codec>>,
    pub mesh_opt: Option<Arc<dyn Codec>>,
}

impl CodecSet {
    pub fn get(&self, kind: CodecKind) -> Option<&Arc<dyn Codec>> {
        match kind {
            CodecKind::Geometry => self.geometry.as_ref(),
            CodecKind::Texture => self.texture.as_ref(),
            CodecKind::MeshOpt => self.mesh_opt.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: CodecKind) -> &mut Option<Arc<dyn Codec>> {
        match kind {
            CodecKind::Geometry => &mut self.geometry,
            CodecKind::Texture => &mut self.texture,
            CodecKind::MeshOpt => &mut self.mesh_opt,
        }
    }

    /// Fetch a codec that `resource` cannot be resolved without.
    pub fn require(&self, kind: CodecKind, resource: &str) -> Result<&dyn Codec, LoadError> {
        self.get(kind)
            .map(|c| &**c)
            .ok_or_else(|| LoadError::MissingCodec {
                kind,
                resource: resource.to_string(),
            })
    }

    /// Decode through the required codec, tagging failures with `resource`.
    pub fn decode(
        &self,
        kind: CodecKind,
        resource: &str,
        input: &[u8],
        expected_len: Option<usize>,
    ) -> Result<Vec<u8>, LoadError> {
        let codec = self.require(kind, resource)?;
        codec.decode(input, expected_len).map_err(|e| LoadError::Decode {
            kind,
            resource: resource.to_string(),
            message: e.0,
        })
    }

    pub fn available(&self) -> Vec<CodecKind> {
        CodecKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).is_some())
            .collect()
    }
}
