// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Buffer, buffer-view and accessor resolution.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use gltf::json;
use gltf::json::validation::{Error as ValidationError, Validate};
use serde_json::Value;

use super::extensions::{self, MeshOptCompression};
use super::scene::{AccessorData, ComponentType, Dimensions};
use crate::codec::{CodecKind, CodecSet};
use crate::container::ContainerDocument;
use crate::error::LoadError;

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

pub fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

/// Decode a base64 `data:` URI. Returns `None` for any other URI.
pub fn decode_data_uri(uri: &str) -> Option<Result<DataUri, LoadError>> {
    let rest = uri.strip_prefix("data:")?;
    let Some((header, payload)) = rest.split_once(',') else {
        return Some(Err(LoadError::invalid("data URI has no payload separator")));
    };
    let Some(mime) = header.strip_suffix(";base64") else {
        return Some(Err(LoadError::invalid("only base64 data URIs are supported")));
    };
    Some(
        STANDARD
            .decode(payload.trim())
            .map(|data| DataUri {
                mime_type: (!mime.is_empty()).then(|| mime.to_string()),
                data,
            })
            .map_err(|e| LoadError::invalid(format!("bad base64 in data URI: {}", e))),
    )
}

/// Byte limit for an accessor without a buffer view, which is zero-filled.
const MAX_UNBACKED_ACCESSOR_BYTES: usize = 256 << 20;

/// The document model plus the image list, which the assembler reads
/// directly so images with neither `uri` nor `bufferView` stay an error
/// instead of a panic.
pub(crate) struct DocumentModel {
    pub gltf: gltf::Document,
    pub images: Vec<json::Image>,
}

/// Deserialize and validate the glTF document.
///
/// Out-of-range indices and invalid enum values fail the load. Missing
/// optional data (such as POSITION bounds) and unsupported required
/// extensions do not: the codecs decide about the latter.
pub(crate) fn document_model(document: &ContainerDocument) -> Result<DocumentModel, LoadError> {
    let mut value = document.json.clone();
    if let (Some(synthetic), Some(object)) = (
        document.buffers.iter().find(|b| b.synthetic),
        value.as_object_mut(),
    ) {
        object.insert(
            "buffers".to_string(),
            serde_json::json!([{ "byteLength": synthetic.byte_length }]),
        );
    }

    let root: json::Root = serde_json::from_value(value)
        .map_err(|e| LoadError::invalid(format!("document structure: {}", e)))?;

    let mut problems = Vec::new();
    root.validate(
        &root,
        json::Path::new,
        &mut |path: &dyn Fn() -> json::Path, error: ValidationError| {
            if matches!(error, ValidationError::IndexOutOfBounds | ValidationError::Invalid) {
                problems.push(format!("{}: {}", path(), error));
            }
        },
    );
    if !problems.is_empty() {
        return Err(LoadError::invalid(problems.join("; ")));
    }

    let images = root.images.clone();
    Ok(DocumentModel {
        gltf: gltf::Document::from_json_without_validation(root),
        images,
    })
}

/// Resolves document references to bytes.
///
/// `buffers` is indexed like the document's buffer list; `None` marks a
/// buffer whose bytes are unavailable, which is only an error once
/// something reads from it.
pub(crate) struct Resolver<'a> {
    pub json: &'a Value,
    accessors: Vec<gltf::Accessor<'a>>,
    views: Vec<gltf::buffer::View<'a>>,
    buffers: Vec<Option<Vec<u8>>>,
    pub codecs: &'a CodecSet,
    pub codecs_used: BTreeSet<CodecKind>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        gltf: &'a gltf::Document,
        json: &'a Value,
        buffers: Vec<Option<Vec<u8>>>,
        codecs: &'a CodecSet,
    ) -> Self {
        Self {
            json,
            accessors: gltf.accessors().collect(),
            views: gltf.views().collect(),
            buffers,
            codecs,
            codecs_used: BTreeSet::new(),
        }
    }

    fn buffer(&self, index: usize) -> Result<&[u8], LoadError> {
        match self.buffers.get(index) {
            Some(Some(bytes)) => Ok(bytes),
            Some(None) => Err(LoadError::invalid(format!("buffers[{}] has no data", index))),
            None => Err(LoadError::invalid(format!("buffers[{}] does not exist", index))),
        }
    }

    fn slice(&self, buffer: usize, offset: usize, len: usize, what: &str) -> Result<&[u8], LoadError> {
        let bytes = self.buffer(buffer)?;
        offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .map(|end| &bytes[offset..end])
            .ok_or_else(|| {
                LoadError::invalid(format!(
                    "{} range {}+{} exceeds buffers[{}] ({} bytes)",
                    what,
                    offset,
                    len,
                    buffer,
                    bytes.len()
                ))
            })
    }

    /// Bytes of a buffer view, run through the mesh-opt codec when the view
    /// carries `EXT_meshopt_compression`.
    pub fn view(&mut self, index: usize) -> Result<Vec<u8>, LoadError> {
        let (buffer, offset, length) = self
            .views
            .get(index)
            .map(|v| (v.buffer().index(), v.offset(), v.length()))
            .ok_or_else(|| LoadError::invalid(format!("bufferViews[{}] does not exist", index)))?;
        let resource = format!("bufferViews[{}]", index);
        let pointer = format!("/bufferViews/{}", index);

        match extensions::lookup::<MeshOptCompression>(self.json, &pointer, CodecKind::MeshOpt)? {
            Some(ext) => {
                let compressed = self.slice(ext.buffer, ext.byte_offset, ext.byte_length, &resource)?;
                let expected = ext.count.checked_mul(ext.byte_stride).ok_or_else(|| {
                    LoadError::invalid(format!("{} declares an impossible decoded size", resource))
                })?;
                let decoded = self
                    .codecs
                    .decode(CodecKind::MeshOpt, &resource, compressed, Some(expected))?;
                self.codecs_used.insert(CodecKind::MeshOpt);
                Ok(decoded)
            }
            None => Ok(self.slice(buffer, offset, length, &resource)?.to_vec()),
        }
    }

    pub fn accessor_meta(&self, index: usize) -> Result<(gltf::Accessor<'a>, ComponentType, Dimensions), LoadError> {
        let accessor = self
            .accessors
            .get(index)
            .cloned()
            .ok_or_else(|| LoadError::invalid(format!("accessors[{}] does not exist", index)))?;
        if accessor.sparse().is_some() {
            return Err(LoadError::invalid(format!(
                "accessors[{}] is sparse, which is not supported",
                index
            )));
        }
        let component_type = ComponentType::from(accessor.data_type());
        let dimensions = Dimensions::from(accessor.dimensions());
        Ok((accessor, component_type, dimensions))
    }

    /// Packed byte size of an accessor. Fails instead of overflowing on
    /// hostile counts.
    fn packed_len(
        index: usize,
        accessor: &gltf::Accessor<'_>,
        component_type: ComponentType,
        dimensions: Dimensions,
    ) -> Result<usize, LoadError> {
        accessor
            .count()
            .checked_mul(component_type.size() * dimensions.components())
            .ok_or_else(|| {
                LoadError::invalid(format!(
                    "accessors[{}] count {} overflows its byte size",
                    index,
                    accessor.count()
                ))
            })
    }

    /// Accessor contents, tightly packed.
    pub fn accessor(&mut self, index: usize) -> Result<AccessorData, LoadError> {
        let (accessor, component_type, dimensions) = self.accessor_meta(index)?;
        let len = Self::packed_len(index, &accessor, component_type, dimensions)?;
        let element = component_type.size() * dimensions.components();

        let data = match accessor.view() {
            // No view: all zeros.
            None => {
                if len > MAX_UNBACKED_ACCESSOR_BYTES {
                    return Err(LoadError::invalid(format!(
                        "accessors[{}] has no bufferView and would zero-fill {} bytes",
                        index, len
                    )));
                }
                vec![0u8; len]
            }
            Some(view) => {
                let stride = view.stride().unwrap_or(element);
                let view_index = view.index();
                let bytes = self.view(view_index)?;
                gather(&bytes, accessor.offset(), stride, element, accessor.count()).ok_or_else(|| {
                    LoadError::invalid(format!(
                        "accessors[{}] does not fit in bufferViews[{}]",
                        index, view_index
                    ))
                })?
            }
        };

        Ok(AccessorData {
            component_type,
            dimensions,
            count: accessor.count(),
            normalized: accessor.normalized(),
            data,
        })
    }

    /// Wrap already-decoded bytes for an accessor, checking the length.
    pub fn accessor_from_bytes(&self, index: usize, data: Vec<u8>) -> Result<AccessorData, LoadError> {
        let (accessor, component_type, dimensions) = self.accessor_meta(index)?;
        let expected = Self::packed_len(index, &accessor, component_type, dimensions)?;
        if data.len() != expected {
            return Err(LoadError::invalid(format!(
                "accessors[{}] expects {} bytes, got {}",
                index,
                expected,
                data.len()
            )));
        }
        Ok(AccessorData {
            component_type,
            dimensions,
            count: accessor.count(),
            normalized: accessor.normalized(),
            data,
        })
    }

    /// Packed byte size an accessor occupies.
    pub fn accessor_size(&self, index: usize) -> Result<usize, LoadError> {
        let (accessor, component_type, dimensions) = self.accessor_meta(index)?;
        Self::packed_len(index, &accessor, component_type, dimensions)
    }
}

/// Copy `count` elements of `element` bytes, `stride` apart, starting at
/// `offset`. `None` when the range does not fit or the stride is too small.
fn gather(view: &[u8], offset: usize, stride: usize, element: usize, count: usize) -> Option<Vec<u8>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if stride < element {
        return None;
    }
    let end = offset.checked_add(stride.checked_mul(count - 1)?)?.checked_add(element)?;
    if end > view.len() {
        return None;
    }
    if stride == element {
        return Some(view[offset..end].to_vec());
    }
    let mut out = Vec::with_capacity(count * element);
    for i in 0..count {
        let start = offset + i * stride;
        out.extend_from_slice(&view[start..start + element]);
    }
    Some(out)
}
