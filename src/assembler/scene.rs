// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Renderer-ready output of a completed load.
//!
//! Everything here is plain owned data. Vertex and index data is tightly
//! packed (strides removed) and keeps its original component type.

use glam::Mat4;
use gltf::accessor::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub fn size(&self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

impl From<DataType> for ComponentType {
    fn from(value: DataType) -> Self {
        match value {
            DataType::I8 => Self::I8,
            DataType::U8 => Self::U8,
            DataType::I16 => Self::I16,
            DataType::U16 => Self::U16,
            DataType::U32 => Self::U32,
            DataType::F32 => Self::F32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimensions {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl Dimensions {
    pub fn components(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }
}

impl From<gltf::accessor::Dimensions> for Dimensions {
    fn from(value: gltf::accessor::Dimensions) -> Self {
        use gltf::accessor::Dimensions as Gl;
        match value {
            Gl::Scalar => Self::Scalar,
            Gl::Vec2 => Self::Vec2,
            Gl::Vec3 => Self::Vec3,
            Gl::Vec4 => Self::Vec4,
            Gl::Mat2 => Self::Mat2,
            Gl::Mat3 => Self::Mat3,
            Gl::Mat4 => Self::Mat4,
        }
    }
}

/// Tightly packed accessor contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessorData {
    pub component_type: ComponentType,
    pub dimensions: Dimensions,
    pub count: usize,
    pub normalized: bool,
    pub data: Vec<u8>,
}

impl AccessorData {
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.dimensions.components()
    }

    /// Components as `f32`, when the data is float.
    pub fn to_f32(&self) -> Option<Vec<f32>> {
        if self.component_type != ComponentType::F32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Scalars widened to `u32`, when the data is an unsigned index type.
    pub fn to_indices(&self) -> Option<Vec<u32>> {
        if self.dimensions != Dimensions::Scalar {
            return None;
        }
        match self.component_type {
            ComponentType::U8 => Some(self.data.iter().map(|b| *b as u32).collect()),
            ComponentType::U16 => Some(
                self.data
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
                    .collect(),
            ),
            ComponentType::U32 => Some(
                self.data
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexAttribute {
    /// `POSITION`, `NORMAL`, `TEXCOORD_0`, ...
    pub semantic: String,
    pub data: AccessorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Primitive {
    pub attributes: Vec<VertexAttribute>,
    pub indices: Option<AccessorData>,
    pub material: Option<usize>,
    /// glTF topology constant; 4 (triangles) when omitted.
    pub mode: u32,
    /// Geometry came out of the geometry codec.
    pub decoded: bool,
}

impl Primitive {
    pub fn attribute(&self, semantic: &str) -> Option<&AccessorData> {
        self.attributes
            .iter()
            .find(|a| a.semantic == semantic)
            .map(|a| &a.data)
    }

    pub fn vertex_count(&self) -> usize {
        self.attribute("POSITION").map(|p| p.count).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    pub name: Option<String>,
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
    /// Local transform, from `matrix` or composed from TRS.
    pub transform: Mat4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRoots {
    pub name: Option<String>,
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<usize>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub double_sided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureData {
    pub name: Option<String>,
    pub image: Option<usize>,
    pub mime_type: Option<String>,
    /// Embedded (or transcoded) image bytes.
    pub data: Option<Vec<u8>>,
    /// Resolved location of an external image left for the renderer to fetch.
    pub uri: Option<String>,
    /// Bytes came out of the texture codec.
    pub transcoded: bool,
}

/// The assembled scene, handed to the scene-graph collaborator as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneFragment {
    pub default_scene: Option<usize>,
    pub scenes: Vec<SceneRoots>,
    pub nodes: Vec<SceneNode>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<TextureData>,
}

impl SceneFragment {
    /// Root nodes of the default scene (or the first scene).
    pub fn root_nodes(&self) -> &[usize] {
        self.default_scene
            .or(if self.scenes.is_empty() { None } else { Some(0) })
            .and_then(|i| self.scenes.get(i))
            .map(|s| s.nodes.as_slice())
            .unwrap_or(&[])
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes
            .iter()
            .flat_map(|m| &m.primitives)
            .map(Primitive::vertex_count)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationChannel {
    pub node: Option<usize>,
    /// `translation`, `rotation`, `scale` or `weights`.
    pub path: String,
    /// `LINEAR`, `STEP` or `CUBICSPLINE`.
    pub interpolation: String,
    pub times: Vec<f32>,
    pub values: AccessorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationClip {
    pub name: Option<String>,
    pub channels: Vec<AnimationChannel>,
    /// Last keyframe time across all channels, in seconds.
    pub duration: f32,
}
