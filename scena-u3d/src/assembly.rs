// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `assembly` module defines the descriptors handed to the rendering collaborator: the
//! per-file render descriptor (shader groups, texture images, interleaved geometry buffers) and
//! the per-view scene descriptor (view, light, and model parameters in world space).

use std::collections::BTreeMap;

use scena_core::errors::{unsupported_error, Result};
use scena_core::math::{Color3, Matrix4, Vector3};

use crate::scene::{LightResource, LightType, Pass, ViewAttributes, ViewNode, ViewResource};

/// Attribute masks of an interleaved geometry buffer. Each set bit group declares one vertex
/// component present in the buffer; the stride in floats is the popcount of the mask.
pub const BUFFER_POSITION_MASK: u32 = 0x7;
pub const BUFFER_NORMAL_MASK: u32 = 0x38;
pub const BUFFER_DIFFUSE_MASK: u32 = 0x3C0;
pub const BUFFER_SPECULAR_MASK: u32 = 0x3C00;
pub const BUFFER_TEXCOORD0_MASK: u32 = 0xC000;

/// The primitive topology of a geometry buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimitiveKind {
    Triangles,
    Points,
    Lines,
}

/// One interleaved vertex buffer, keyed by the shading id it was built for.
#[derive(Clone, Debug)]
pub struct GeometryElement {
    /// Bitmask of the vertex components present, in buffer order.
    pub attr_mask: u32,
    /// The number of vertices in the buffer.
    pub vertex_count: usize,
    /// Interleaved vertex data; `popcount(attr_mask)` floats per vertex.
    pub data: Vec<f32>,
}

impl GeometryElement {
    /// The stride of one vertex in floats.
    pub fn stride(&self) -> usize {
        self.attr_mask.count_ones() as usize
    }
}

/// The renderable geometry of one model resource: one element per shading id.
#[derive(Clone, Debug)]
pub struct GeometryBuffers {
    pub kind: PrimitiveKind,
    pub elements: Vec<GeometryElement>,
}

/// The undecoded image payload of a texture resource. Image decompression is the collaborator's
/// concern; the decoder hands over the bytes as declared.
#[derive(Clone, Debug)]
pub struct TextureBytes {
    pub width: u32,
    pub height: u32,
    /// The declared channel layout mask.
    pub channels: u8,
    /// The declared compression type (raw, JPEG, PNG, ...).
    pub compression: u8,
    pub data: Vec<u8>,
}

/// Material parameters of a shader group.
#[derive(Clone, Debug)]
pub struct MaterialParams {
    pub ambient: Color3,
    pub diffuse: Color3,
    pub specular: Color3,
    pub emissive: Color3,
    pub reflectivity: f32,
    pub opacity: f32,
}

/// Everything the shader generator needs for one lit texture shader.
#[derive(Clone, Debug)]
pub struct ShaderSpec {
    pub material: MaterialParams,
    /// Bitmask of enabled texture channels.
    pub channels: u32,
    /// Texture resource name per enabled channel.
    pub texture_names: [String; 8],
}

/// The decoder-to-renderer boundary: everything decoded from the file, keyed by name.
#[derive(Debug, Default)]
pub struct RenderDescriptor {
    pub shader_groups: BTreeMap<String, ShaderSpec>,
    pub textures: BTreeMap<String, TextureBytes>,
    pub render_groups: BTreeMap<String, GeometryBuffers>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians.
    Perspective { fovy: f32 },
    /// View-volume height in scene units.
    Orthographic { height: f32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FogParams {
    pub start: f32,
    pub end: f32,
    pub color: Color3,
}

/// World-space view parameters of the selected view node and pass.
#[derive(Clone, Debug)]
pub struct ViewParams {
    pub view_matrix: Matrix4,
    pub projection: Projection,
    pub near: f32,
    pub far: f32,
    pub fog: Option<FogParams>,
}

impl ViewParams {
    pub fn new(view: &ViewNode, pass: &Pass, transform: Matrix4) -> Result<ViewParams> {
        let projection = if view.attributes.contains(ViewAttributes::PROJECTION_ORTHO) {
            Projection::Orthographic { height: view.ortho_height }
        } else if view.attributes.contains(ViewAttributes::PROJECTION_ONE_POINT)
            || view.attributes.contains(ViewAttributes::PROJECTION_TWO_POINT)
        {
            return unsupported_error("u3d: one- and two-point projections are not supported");
        } else {
            Projection::Perspective { fovy: view.projection / 180.0 * std::f32::consts::PI }
        };

        let fog = if pass.render_attributes & ViewResource::FOG_ENABLED != 0 {
            Some(FogParams { start: pass.fog_near, end: pass.fog_far, color: pass.fog_color })
        } else {
            None
        };

        Ok(ViewParams {
            view_matrix: transform,
            projection,
            near: view.near_clipping,
            far: view.far_clipping.min(1e6),
            fog,
        })
    }
}

/// World-space parameters of one light node.
#[derive(Clone, Debug)]
pub struct LightParams {
    pub light_type: LightType,
    pub position: Vector3,
    pub direction: Vector3,
    pub color: Color3,
    pub att_constant: f32,
    pub att_linear: f32,
    pub att_quadratic: f32,
    pub spot_angle: f32,
    pub intensity: f32,
}

impl LightParams {
    pub fn new(light: &LightResource, transform: &Matrix4) -> LightParams {
        LightParams {
            light_type: light.light_type,
            position: transform.transform_point(Vector3::default()),
            direction: transform
                .normal_matrix()
                .transform_point(Vector3::new(0.0, 0.0, -1.0))
                .normalized(),
            color: light.color,
            att_constant: light.att_constant,
            att_linear: light.att_linear,
            att_quadratic: light.att_quadratic,
            spot_angle: light.spot_angle,
            intensity: light.intensity,
        }
    }
}

/// World-space parameters of one model node: the resource to draw and the shaders to draw its
/// elements with.
#[derive(Clone, Debug)]
pub struct ModelParams {
    pub resource_name: String,
    pub model_matrix: Matrix4,
    pub shader_names: Vec<String>,
}

/// A materialized scene: the selected view plus every light and model reachable from the pass's
/// root node.
#[derive(Clone, Debug)]
pub struct SceneDescriptor {
    pub view: ViewParams,
    pub lights: Vec<LightParams>,
    pub models: Vec<ModelParams>,
}
