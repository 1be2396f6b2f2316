// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Assembler
//!
//! Turns a parsed container into a [`ParsedModel`]: a scene fragment,
//! ordered animation clips and load metadata. Resources that carry a
//! compression marker are run through the matching codec from the task's
//! [`CodecSet`]; an empty slot fails the load with
//! [`LoadError::MissingCodec`] naming the resource.
//!
//! Geometry codec payloads hold each compressed attribute, in ascending
//! compressed-attribute id order, followed by the indices when the
//! primitive has them. Every part is tightly packed to its accessor's
//! `count * element size`.

pub(crate) mod extensions;
pub mod resolve;
pub mod scene;

pub use scene::{
    AccessorData, AnimationChannel, AnimationClip, ComponentType, Dimensions, Material, Mesh,
    Primitive, SceneFragment, SceneNode, SceneRoots, TextureData, VertexAttribute,
};

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use glam::Mat4;
use gltf::animation::{Interpolation, Property};
use gltf::json;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecKind, CodecSet};
use crate::container::{BufferSource, ContainerDocument, ContainerFormat};
use crate::download::resolve_uri;
use crate::error::LoadError;
use extensions::{GeometryCompression, TextureCompression};
use resolve::{decode_data_uri, Resolver};

/// Facts about a completed load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub url: String,
    pub load_time_ms: u64,
    pub format: ContainerFormat,
    /// Human-readable stage labels, in the order they ran.
    pub load_steps: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    pub codecs_used: Vec<CodecKind>,
}

/// The result of a successful load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedModel {
    pub scene: SceneFragment,
    pub animations: Vec<AnimationClip>,
    pub metadata: ModelMetadata,
}

/// Everything the assembler needs from the earlier stages.
#[derive(Debug)]
pub struct AssemblyInput {
    pub document: ContainerDocument,
    pub binary: Option<Vec<u8>>,
    /// Downloaded bytes for `Uri` buffers, keyed by buffer index.
    pub external_buffers: HashMap<usize, Vec<u8>>,
    pub url: String,
    pub format: ContainerFormat,
    pub started: Instant,
    pub steps: Vec<String>,
}

impl AssemblyInput {
    pub fn new(document: ContainerDocument, binary: Option<Vec<u8>>, url: &str, format: ContainerFormat) -> Self {
        Self {
            document,
            binary,
            external_buffers: HashMap::new(),
            url: url.to_string(),
            format,
            started: Instant::now(),
            steps: Vec::new(),
        }
    }
}

/// Codec kinds whose extension the document declares as used or required.
pub fn compression_kinds(document: &ContainerDocument) -> BTreeSet<CodecKind> {
    let declared: BTreeSet<&str> = ["extensionsUsed", "extensionsRequired"]
        .iter()
        .filter_map(|key| document.json.get(*key)?.as_array())
        .flatten()
        .filter_map(|v| v.as_str())
        .collect();
    CodecKind::ALL
        .into_iter()
        .filter(|k| declared.contains(k.extension_name()))
        .collect()
}

/// Indices of buffers that must be downloaded before assembly.
pub fn external_buffer_uris(document: &ContainerDocument) -> Vec<(usize, &str)> {
    document
        .buffers
        .iter()
        .enumerate()
        .filter_map(|(i, b)| match &b.source {
            BufferSource::Uri(uri) if !resolve::is_data_uri(uri) => Some((i, uri.as_str())),
            _ => None,
        })
        .collect()
}

/// Build the renderer-ready model.
pub fn assemble(input: AssemblyInput, codecs: &CodecSet) -> Result<ParsedModel, LoadError> {
    let AssemblyInput {
        document,
        mut binary,
        mut external_buffers,
        url,
        format,
        started,
        steps,
    } = input;

    let model = resolve::document_model(&document)?;
    let gltf = &model.gltf;

    let mut buffers = Vec::with_capacity(document.buffers.len());
    for (index, descriptor) in document.buffers.iter().enumerate() {
        let bytes = match &descriptor.source {
            BufferSource::BinaryChunk => binary.take(),
            BufferSource::Uri(uri) => match decode_data_uri(uri) {
                Some(decoded) => Some(decoded?.data),
                None => external_buffers.remove(&index),
            },
            BufferSource::Missing => None,
        };
        if let Some(bytes) = &bytes {
            if bytes.len() < descriptor.byte_length {
                return Err(LoadError::invalid(format!(
                    "buffers[{}] declares {} bytes but only {} are available",
                    index,
                    descriptor.byte_length,
                    bytes.len()
                )));
            }
        }
        buffers.push(bytes);
    }

    let mut resolver = Resolver::new(gltf, &document.json, buffers, codecs);

    let nodes: Vec<SceneNode> = gltf
        .nodes()
        .map(|node| SceneNode {
            name: node.name().map(String::from),
            mesh: node.mesh().map(|m| m.index()),
            children: node.children().map(|c| c.index()).collect(),
            transform: Mat4::from_cols_array_2d(&node.transform().matrix()),
        })
        .collect();

    let mut meshes = Vec::new();
    for mesh in gltf.meshes() {
        let mut primitives = Vec::new();
        for (prim_index, prim) in mesh.primitives().enumerate() {
            primitives.push(build_primitive(&mut resolver, mesh.index(), prim_index, &prim)?);
        }
        meshes.push(Mesh {
            name: mesh.name().map(String::from),
            primitives,
        });
    }

    let materials = gltf
        .materials()
        .map(|m| {
            let pbr = m.pbr_metallic_roughness();
            Material {
                name: m.name().map(String::from),
                base_color_factor: pbr.base_color_factor(),
                base_color_texture: pbr.base_color_texture().map(|info| info.texture().index()),
                metallic_factor: pbr.metallic_factor(),
                roughness_factor: pbr.roughness_factor(),
                double_sided: m.double_sided(),
            }
        })
        .collect();

    let mut textures = Vec::new();
    for texture in gltf.textures() {
        textures.push(build_texture(&mut resolver, &model.images, &texture, &url)?);
    }

    let scenes = gltf
        .scenes()
        .map(|s| SceneRoots {
            name: s.name().map(String::from),
            nodes: s.nodes().map(|n| n.index()).collect(),
        })
        .collect();

    let mut animations = Vec::new();
    for animation in gltf.animations() {
        animations.push(build_animation(&mut resolver, &animation)?);
    }

    let codecs_used: Vec<CodecKind> = resolver.codecs_used.iter().copied().collect();
    let scene = SceneFragment {
        default_scene: gltf.default_scene().map(|s| s.index()),
        scenes,
        nodes,
        meshes,
        materials,
        textures,
    };

    tracing::debug!(
        url = %url,
        nodes = scene.nodes.len(),
        meshes = scene.meshes.len(),
        animations = animations.len(),
        codecs = ?codecs_used,
        "Model assembled"
    );

    Ok(ParsedModel {
        scene,
        animations,
        metadata: ModelMetadata {
            url,
            load_time_ms: started.elapsed().as_millis() as u64,
            format,
            load_steps: steps,
            loaded_at: Utc::now(),
            codecs_used,
        },
    })
}

fn build_primitive(
    resolver: &mut Resolver<'_>,
    mesh_index: usize,
    prim_index: usize,
    prim: &gltf::Primitive<'_>,
) -> Result<Primitive, LoadError> {
    let resource = format!("meshes[{}].primitives[{}]", mesh_index, prim_index);
    let pointer = format!("/meshes/{}/primitives/{}", mesh_index, prim_index);
    let compression: Option<GeometryCompression> =
        extensions::lookup(resolver.json, &pointer, CodecKind::Geometry)?;

    let declared: Vec<(String, usize)> = prim
        .attributes()
        .map(|(semantic, accessor)| (semantic.to_string(), accessor.index()))
        .collect();
    let indices_accessor = prim.indices().map(|a| a.index());

    let mut decoded: HashMap<String, Vec<u8>> = HashMap::new();
    let mut decoded_indices = None;

    if let Some(ext) = &compression {
        resolver.codecs.require(CodecKind::Geometry, &resource)?;

        let mut order: Vec<(u32, &str)> = ext.attributes.iter().map(|(s, id)| (*id, s.as_str())).collect();
        order.sort_unstable();

        let mut parts = Vec::with_capacity(order.len() + 1);
        for (_, semantic) in &order {
            let accessor = declared
                .iter()
                .find(|(name, _)| name == semantic)
                .map(|(_, accessor)| *accessor)
                .ok_or_else(|| {
                    LoadError::invalid(format!("{} compresses {} but does not declare it", resource, semantic))
                })?;
            parts.push((Some(*semantic), accessor, resolver.accessor_size(accessor)?));
        }
        if let Some(indices) = indices_accessor {
            parts.push((None, indices, resolver.accessor_size(indices)?));
        }
        let expected = parts
            .iter()
            .try_fold(0usize, |total, (_, _, size)| total.checked_add(*size))
            .ok_or_else(|| LoadError::invalid(format!("{} decodes to an impossible size", resource)))?;

        let compressed = resolver.view(ext.buffer_view)?;
        let payload = resolver
            .codecs
            .decode(CodecKind::Geometry, &resource, &compressed, Some(expected))?;
        if payload.len() != expected {
            return Err(LoadError::Decode {
                kind: CodecKind::Geometry,
                resource,
                message: format!("decoded {} bytes, expected {}", payload.len(), expected),
            });
        }
        resolver.codecs_used.insert(CodecKind::Geometry);

        let mut offset = 0;
        for (semantic, _, size) in parts {
            let bytes = payload[offset..offset + size].to_vec();
            offset += size;
            match semantic {
                Some(semantic) => {
                    decoded.insert(semantic.to_string(), bytes);
                }
                None => decoded_indices = Some(bytes),
            }
        }
    }

    let mut attributes = Vec::with_capacity(declared.len());
    for (semantic, accessor) in declared {
        let data = match decoded.remove(&semantic) {
            Some(bytes) => resolver.accessor_from_bytes(accessor, bytes)?,
            None => resolver.accessor(accessor)?,
        };
        attributes.push(VertexAttribute { semantic, data });
    }

    let indices = match (indices_accessor, decoded_indices) {
        (Some(accessor), Some(bytes)) => Some(resolver.accessor_from_bytes(accessor, bytes)?),
        (Some(accessor), None) => Some(resolver.accessor(accessor)?),
        (None, _) => None,
    };

    Ok(Primitive {
        attributes,
        indices,
        material: prim.material().index(),
        mode: prim.mode().as_gl_enum(),
        decoded: compression.is_some(),
    })
}

/// Image bytes stored inside the model, with their mime type.
fn embedded_image(
    resolver: &mut Resolver<'_>,
    images: &[json::Image],
    index: usize,
) -> Result<Option<(Vec<u8>, Option<String>)>, LoadError> {
    let image = images
        .get(index)
        .ok_or_else(|| LoadError::invalid(format!("images[{}] does not exist", index)))?;
    let mime_type = image.mime_type.as_ref().map(|m| m.0.clone());

    if let Some(view) = image.buffer_view.as_ref() {
        return Ok(Some((resolver.view(view.value())?, mime_type)));
    }
    match image.uri.as_deref().and_then(decode_data_uri) {
        Some(decoded) => {
            let decoded = decoded?;
            Ok(Some((decoded.data, mime_type.or(decoded.mime_type))))
        }
        None => Ok(None),
    }
}

fn build_texture(
    resolver: &mut Resolver<'_>,
    images: &[json::Image],
    texture: &gltf::Texture<'_>,
    base_url: &str,
) -> Result<TextureData, LoadError> {
    let name = texture.name().map(String::from);
    let resource = format!("textures[{}]", texture.index());
    let pointer = format!("/textures/{}", texture.index());

    if let Some(ext) = extensions::lookup::<TextureCompression>(resolver.json, &pointer, CodecKind::Texture)? {
        resolver.codecs.require(CodecKind::Texture, &resource)?;
        let (bytes, mime_type) = embedded_image(resolver, images, ext.source)?.ok_or_else(|| {
            LoadError::invalid(format!("{} uses a compressed image that is not embedded", resource))
        })?;
        let data = resolver.codecs.decode(CodecKind::Texture, &resource, &bytes, None)?;
        resolver.codecs_used.insert(CodecKind::Texture);
        return Ok(TextureData {
            name,
            image: Some(ext.source),
            mime_type,
            data: Some(data),
            uri: None,
            transcoded: true,
        });
    }

    let source = texture.source().index();
    let (data, mime_type, uri) = match embedded_image(resolver, images, source)? {
        Some((bytes, mime)) => (Some(bytes), mime, None),
        None => {
            let image = &images[source];
            let uri = match image.uri.as_deref() {
                Some(uri) => resolve_uri(base_url, uri)?,
                None => {
                    return Err(LoadError::invalid(format!(
                        "images[{}] has neither uri nor bufferView",
                        source
                    )))
                }
            };
            (None, image.mime_type.as_ref().map(|m| m.0.clone()), Some(uri))
        }
    };

    Ok(TextureData {
        name,
        image: Some(source),
        mime_type,
        data,
        uri,
        transcoded: false,
    })
}

fn build_animation(
    resolver: &mut Resolver<'_>,
    animation: &gltf::Animation<'_>,
) -> Result<AnimationClip, LoadError> {
    let mut channels = Vec::new();
    let mut duration = 0.0f32;

    for (channel_index, channel) in animation.channels().enumerate() {
        let sampler = channel.sampler();
        let times = resolver.accessor(sampler.input().index())?.to_f32().ok_or_else(|| {
            LoadError::invalid(format!(
                "animations[{}].channels[{}] input must be float",
                animation.index(),
                channel_index
            ))
        })?;
        let values = resolver.accessor(sampler.output().index())?;

        let target = channel.target();
        let path = match target.property() {
            Property::Translation => "translation",
            Property::Rotation => "rotation",
            Property::Scale => "scale",
            Property::MorphTargetWeights => "weights",
        };
        let interpolation = match sampler.interpolation() {
            Interpolation::Linear => "LINEAR",
            Interpolation::Step => "STEP",
            Interpolation::CubicSpline => "CUBICSPLINE",
        };

        duration = times.iter().copied().fold(duration, f32::max);
        channels.push(AnimationChannel {
            node: Some(target.node().index()),
            path: path.to_string(),
            interpolation: interpolation.to_string(),
            times,
            values,
        });
    }

    Ok(AnimationClip {
        name: animation.name().map(String::from),
        channels,
        duration,
    })
}
