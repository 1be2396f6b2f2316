// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payloads of the compression extensions.
//!
//! The glTF document model does not carry these, so they are read from the
//! raw JSON at the resource's pointer.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::codec::CodecKind;
use crate::error::LoadError;

/// `KHR_draco_mesh_compression` on a primitive.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeometryCompression {
    pub buffer_view: usize,
    /// Attribute semantic to the id it has inside the compressed payload.
    #[serde(default)]
    pub attributes: BTreeMap<String, u32>,
}

/// `EXT_meshopt_compression` on a buffer view.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MeshOptCompression {
    pub buffer: usize,
    #[serde(default)]
    pub byte_offset: usize,
    pub byte_length: usize,
    pub byte_stride: usize,
    pub count: usize,
}

/// `KHR_texture_basisu` on a texture.
#[derive(Debug, Deserialize)]
pub(crate) struct TextureCompression {
    pub source: usize,
}

/// Read the `kind` extension object at `pointer` (a JSON pointer to the
/// extended resource). `Ok(None)` when the resource does not carry it.
pub(crate) fn lookup<T: DeserializeOwned>(
    json: &Value,
    pointer: &str,
    kind: CodecKind,
) -> Result<Option<T>, LoadError> {
    let Some(value) = json
        .pointer(pointer)
        .and_then(|resource| resource.get("extensions"))
        .and_then(|extensions| extensions.get(kind.extension_name()))
    else {
        return Ok(None);
    };
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|e| LoadError::invalid(format!("{} on {}: {}", kind.extension_name(), pointer, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_reads_extension_payload() {
        let json = json!({
            "meshes": [{ "primitives": [{
                "extensions": { "KHR_draco_mesh_compression": { "bufferView": 2, "attributes": { "POSITION": 0 } } }
            }] }]
        });
        let ext: GeometryCompression = lookup(&json, "/meshes/0/primitives/0", CodecKind::Geometry)
            .unwrap()
            .unwrap();
        assert_eq!(ext.buffer_view, 2);
        assert_eq!(ext.attributes["POSITION"], 0);

        let absent: Option<TextureCompression> = lookup(&json, "/textures/0", CodecKind::Texture).unwrap();
        assert!(absent.is_none());
    }

    #[test]
    fn test_malformed_payload_is_invalid_model() {
        let json = json!({ "textures": [{ "extensions": { "KHR_texture_basisu": { "source": "zero" } } }] });
        let err = lookup::<TextureCompression>(&json, "/textures/0", CodecKind::Texture).unwrap_err();
        assert_eq!(err.code(), "invalid-model");
    }
}
