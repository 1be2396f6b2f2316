// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The structured document extracted from a container.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseError, ParseReason};

/// Where a buffer's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uri", rename_all = "camelCase")]
pub enum BufferSource {
    /// The BIN chunk of the same container.
    BinaryChunk,
    /// A `data:` URI or a URL relative to the model.
    Uri(String),
    /// No URI and no BIN chunk to bind to.
    Missing,
}

/// One entry of the document's buffer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferDescriptor {
    pub source: BufferSource,
    pub byte_length: usize,
    pub name: Option<String>,
    /// Added by the parser for a BIN chunk the document did not declare.
    /// Synthetic descriptors are anonymous: no name, no URI.
    pub synthetic: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeclaredBuffer {
    uri: Option<String>,
    byte_length: usize,
    name: Option<String>,
}

/// The glTF JSON document plus its resolved buffer list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerDocument {
    pub json: Value,
    pub buffers: Vec<BufferDescriptor>,
}

impl ContainerDocument {
    /// Build the document from parsed JSON, binding the BIN chunk (if any).
    ///
    /// The first declared buffer without a URI is bound to the BIN chunk. When
    /// the document declares no buffers at all and a BIN chunk exists, one
    /// anonymous synthetic descriptor of the chunk's length is appended so the
    /// payload stays addressable as buffer 0.
    pub fn from_json(json: Value, binary_len: Option<usize>) -> Result<Self, ParseError> {
        if !json.is_object() {
            return Err(ParseError::new(
                ParseReason::InvalidJson,
                "document root must be a JSON object",
            ));
        }

        let declared: Vec<DeclaredBuffer> = match json.get("buffers") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ParseError::new(ParseReason::InvalidJson, format!("invalid buffers array: {}", e))
            })?,
            None => Vec::new(),
        };

        let mut bin_bound = false;
        let mut buffers: Vec<BufferDescriptor> = declared
            .into_iter()
            .map(|b| {
                let source = match b.uri {
                    Some(uri) => BufferSource::Uri(uri),
                    None if binary_len.is_some() && !bin_bound => {
                        bin_bound = true;
                        BufferSource::BinaryChunk
                    }
                    None => BufferSource::Missing,
                };
                BufferDescriptor {
                    source,
                    byte_length: b.byte_length,
                    name: b.name,
                    synthetic: false,
                }
            })
            .collect();

        if let (Some(len), true) = (binary_len, buffers.is_empty()) {
            buffers.push(BufferDescriptor {
                source: BufferSource::BinaryChunk,
                byte_length: len,
                name: None,
                synthetic: true,
            });
        }

        Ok(Self { json, buffers })
    }

    /// `asset.version` as declared, if present.
    pub fn asset_version(&self) -> Option<&str> {
        self.json.get("asset")?.get("version")?.as_str()
    }

    /// Names from `extensionsRequired`.
    pub fn required_extensions(&self) -> Vec<&str> {
        self.json
            .get("extensionsRequired")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synthetic_descriptor_for_undeclared_bin() {
        let doc = ContainerDocument::from_json(json!({ "asset": { "version": "2.0" } }), Some(64)).unwrap();
        assert_eq!(doc.buffers.len(), 1);
        assert_eq!(doc.buffers[0].source, BufferSource::BinaryChunk);
        assert_eq!(doc.buffers[0].byte_length, 64);
        assert!(doc.buffers[0].synthetic);
        assert!(doc.buffers[0].name.is_none());
        assert_eq!(doc.asset_version(), Some("2.0"));
    }

    #[test]
    fn test_first_uriless_buffer_binds_to_bin() {
        let doc = ContainerDocument::from_json(
            json!({
                "buffers": [
                    { "byteLength": 16 },
                    { "byteLength": 8, "uri": "extra.bin" },
                    { "byteLength": 4 }
                ]
            }),
            Some(16),
        )
        .unwrap();
        assert_eq!(doc.buffers[0].source, BufferSource::BinaryChunk);
        assert_eq!(doc.buffers[1].source, BufferSource::Uri("extra.bin".to_string()));
        assert_eq!(doc.buffers[2].source, BufferSource::Missing);
        assert!(doc.buffers.iter().all(|b| !b.synthetic));
    }

    #[test]
    fn test_no_bin_no_buffers() {
        let doc = ContainerDocument::from_json(json!({}), None).unwrap();
        assert!(doc.buffers.is_empty());
    }

    #[test]
    fn test_non_object_root_is_rejected() {
        let err = ContainerDocument::from_json(json!([1, 2]), None).unwrap_err();
        assert_eq!(err.reason, ParseReason::InvalidJson);
    }

    #[test]
    fn test_required_extensions() {
        let doc = ContainerDocument::from_json(
            json!({ "extensionsRequired": ["KHR_draco_mesh_compression"] }),
            None,
        )
        .unwrap();
        assert_eq!(doc.required_extensions(), vec!["KHR_draco_mesh_compression"]);
    }
}
