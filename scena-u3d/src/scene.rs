// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `scene` module defines the declaration blocks of the scene graph: the node variants and
//! the light, view, material, and shader resources they reference by name.
//!
//! Nodes reference their parents and resources by name rather than by pointer. The name-indexed
//! registries own every entity, so traversal operates on (name, registry) pairs and no owning
//! cycles can form.

use bitflags::bitflags;
use log::warn;
use scena_core::errors::{limit_error, Result};
use scena_core::math::{Color3, Matrix4, Vector3};

use crate::bitstream::Bitstream;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ViewAttributes: u32 {
        const UNIT_SCREEN_POSITION = 0x0000_0001;
        const PROJECTION_ORTHO = 0x0000_0002;
        const PROJECTION_TWO_POINT = 0x0000_0004;
        const PROJECTION_ONE_POINT = 0x0000_0008;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LightAttributes: u32 {
        const ENABLED = 0x0000_0001;
        const SPECULAR = 0x0000_0002;
        const SPOT_DECAY = 0x0000_0004;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ShaderAttributes: u32 {
        const LIGHTING_ENABLED = 0x0000_0001;
        const ALPHA_TEST_ENABLED = 0x0000_0002;
        const USE_VERTEX_COLOR = 0x0000_0004;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MaterialAttributes: u32 {
        const AMBIENT = 0x0000_0001;
        const DIFFUSE = 0x0000_0002;
        const SPECULAR = 0x0000_0004;
        const EMISSIVE = 0x0000_0008;
        const REFLECTIVITY = 0x0000_0010;
        const OPACITY = 0x0000_0020;
    }
}

/// One parent edge of a node: the parent's name and the transform relative to it.
#[derive(Clone, Debug)]
pub struct Parent {
    pub name: String,
    pub transform: Matrix4,
}

fn read_parents(bs: &mut Bitstream) -> Result<Vec<Parent>> {
    let parent_count = bs.read_u32()?;
    if parent_count > 0x0001_0000 {
        return limit_error("u3d: node parent count exceeds the supported maximum");
    }
    let mut parents = Vec::with_capacity(parent_count as usize);
    for _ in 0..parent_count {
        parents.push(Parent { name: bs.read_string()?, transform: bs.read_matrix4()? });
    }
    Ok(parents)
}

/// A node of the scene graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub parents: Vec<Parent>,
    pub kind: NodeKind,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Group,
    Model(ModelNode),
    Light(LightNode),
    View(ViewNode),
}

impl Default for Node {
    fn default() -> Self {
        Node { parents: Vec::new(), kind: NodeKind::Group }
    }
}

impl Node {
    pub fn read_group(bs: &mut Bitstream) -> Result<Node> {
        Ok(Node { parents: read_parents(bs)?, kind: NodeKind::Group })
    }

    pub fn read_model(bs: &mut Bitstream) -> Result<Node> {
        let parents = read_parents(bs)?;
        let resource_name = bs.read_string()?;
        let visibility = bs.read_u32()?;
        Ok(Node {
            parents,
            kind: NodeKind::Model(ModelNode { resource_name, visibility, shading: None }),
        })
    }

    pub fn read_light(bs: &mut Bitstream) -> Result<Node> {
        let parents = read_parents(bs)?;
        let resource_name = bs.read_string()?;
        Ok(Node { parents, kind: NodeKind::Light(LightNode { resource_name }) })
    }

    pub fn read_view(bs: &mut Bitstream) -> Result<Node> {
        let parents = read_parents(bs)?;
        let resource_name = bs.read_string()?;
        let attributes = ViewAttributes::from_bits_truncate(bs.read_u32()?);
        let near_clipping = bs.read_f32()?;
        let far_clipping = bs.read_f32()?;

        let mut projection = 0.0;
        let mut ortho_height = 0.0;
        let mut proj_vector = Vector3::default();
        match attributes.bits() & 0x6 {
            // Three-point perspective projection.
            0 => projection = bs.read_f32()?,
            // Orthographic projection.
            2 => ortho_height = bs.read_f32()?,
            // One- and two-point perspective projections.
            _ => proj_vector = bs.read_vector3()?,
        }

        let port_w = bs.read_f32()?;
        let port_h = bs.read_f32()?;
        let port_x = bs.read_f32()?;
        let port_y = bs.read_f32()?;

        let backdrop_count = bs.read_u32()?;
        let mut backdrops = Vec::with_capacity(backdrop_count.min(64) as usize);
        for _ in 0..backdrop_count {
            backdrops.push(Backdrop::read(bs)?);
        }
        let overlay_count = bs.read_u32()?;
        let mut overlays = Vec::with_capacity(overlay_count.min(64) as usize);
        for _ in 0..overlay_count {
            overlays.push(Backdrop::read(bs)?);
        }

        Ok(Node {
            parents,
            kind: NodeKind::View(ViewNode {
                resource_name,
                attributes,
                near_clipping,
                far_clipping,
                projection,
                ortho_height,
                proj_vector,
                port_x,
                port_y,
                port_w,
                port_h,
                backdrops,
                overlays,
            }),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ModelNode {
    pub resource_name: String,
    pub visibility: u32,
    pub shading: Option<Shading>,
}

impl ModelNode {
    pub const FRONT_VISIBLE: u32 = 0x0000_0001;
    pub const BACK_VISIBLE: u32 = 0x0000_0002;
}

#[derive(Clone, Debug)]
pub struct LightNode {
    pub resource_name: String,
}

/// A backdrop or overlay layer of a view node.
#[derive(Clone, Debug)]
pub struct Backdrop {
    pub texture_name: String,
    pub blend: f32,
    pub location_x: f32,
    pub location_y: f32,
    pub reg_x: i32,
    pub reg_y: i32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Backdrop {
    fn read(bs: &mut Bitstream) -> Result<Backdrop> {
        Ok(Backdrop {
            texture_name: bs.read_string()?,
            blend: bs.read_f32()?,
            location_x: bs.read_f32()?,
            location_y: bs.read_f32()?,
            reg_x: bs.read_i32()?,
            reg_y: bs.read_i32()?,
            scale_x: bs.read_f32()?,
            scale_y: bs.read_f32()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ViewNode {
    pub resource_name: String,
    pub attributes: ViewAttributes,
    pub near_clipping: f32,
    pub far_clipping: f32,
    /// Vertical field of view in degrees, for the three-point perspective projection.
    pub projection: f32,
    pub ortho_height: f32,
    pub proj_vector: Vector3,
    pub port_x: f32,
    pub port_y: f32,
    pub port_w: f32,
    pub port_h: f32,
    pub backdrops: Vec<Backdrop>,
    pub overlays: Vec<Backdrop>,
}

/// A shading modifier: the list of shader names applied per render element of a model.
#[derive(Clone, Debug)]
pub struct Shading {
    pub chain_index: u32,
    pub attributes: u32,
    pub shader_names: Vec<String>,
}

impl Shading {
    pub const SHADING_MESH: u32 = 1;
    pub const SHADING_LINE: u32 = 2;
    pub const SHADING_POINT: u32 = 4;
    pub const SHADING_GLYPH: u32 = 8;

    pub fn read(bs: &mut Bitstream) -> Result<Shading> {
        let chain_index = bs.read_u32()?;
        let attributes = bs.read_u32()?;
        let list_count = bs.read_u32()?;
        let mut shader_names = Vec::with_capacity(list_count.min(64) as usize);
        for _ in 0..list_count {
            let shader_count = bs.read_u32()?;
            if shader_count != 1 {
                warn!("u3d: shaders with shader index greater than 1 are ignored");
            }
            shader_names.push(bs.read_string()?);
            for _ in 1..shader_count {
                bs.read_string()?;
            }
        }
        Ok(Shading { chain_index, attributes, shader_names })
    }
}

/// The kind of a light resource.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LightType {
    #[default]
    Ambient,
    Directional,
    Point,
    Spot,
}

impl LightType {
    fn from_u8(value: u8) -> LightType {
        match value {
            0 => LightType::Ambient,
            1 => LightType::Directional,
            2 => LightType::Point,
            3 => LightType::Spot,
            _ => {
                warn!("u3d: unknown light type {}, treating as ambient", value);
                LightType::Ambient
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct LightResource {
    pub attributes: LightAttributes,
    pub light_type: LightType,
    pub color: Color3,
    pub att_constant: f32,
    pub att_linear: f32,
    pub att_quadratic: f32,
    pub spot_angle: f32,
    pub intensity: f32,
}

impl Default for LightResource {
    fn default() -> Self {
        LightResource {
            attributes: LightAttributes::ENABLED,
            light_type: LightType::Ambient,
            color: Color3::new(0.75, 0.75, 0.75),
            att_constant: 0.0,
            att_linear: 0.0,
            att_quadratic: 0.0,
            spot_angle: 0.0,
            intensity: 0.0,
        }
    }
}

impl LightResource {
    pub fn read(bs: &mut Bitstream) -> Result<LightResource> {
        let attributes = LightAttributes::from_bits_truncate(bs.read_u32()?);
        let light_type = LightType::from_u8(bs.read_u8()?);
        let color = bs.read_color3()?;
        // Reserved.
        bs.read_f32()?;
        Ok(LightResource {
            attributes,
            light_type,
            color,
            att_constant: bs.read_f32()?,
            att_linear: bs.read_f32()?,
            att_quadratic: bs.read_f32()?,
            spot_angle: bs.read_f32()?,
            intensity: bs.read_f32()?,
        })
    }
}

/// One render pass of a view resource.
#[derive(Clone, Debug, Default)]
pub struct Pass {
    pub root_node_name: String,
    pub render_attributes: u32,
    pub fog_mode: u32,
    pub fog_color: Color3,
    pub fog_alpha: f32,
    pub fog_near: f32,
    pub fog_far: f32,
}

#[derive(Clone, Debug)]
pub struct ViewResource {
    pub passes: Vec<Pass>,
}

impl ViewResource {
    pub const FOG_ENABLED: u32 = 0x0000_0001;
    pub const FOG_EXPONENTIAL: u32 = 1;
    pub const FOG_EXPONENTIAL2: u32 = 2;

    pub fn read(bs: &mut Bitstream) -> Result<ViewResource> {
        let pass_count = bs.read_u32()?;
        if pass_count > 1 {
            warn!("u3d: multipass rendering requested, only the selected pass is assembled");
        }
        let mut passes = Vec::with_capacity(pass_count.min(16) as usize);
        for _ in 0..pass_count {
            passes.push(Pass {
                root_node_name: bs.read_string()?,
                render_attributes: bs.read_u32()?,
                fog_mode: bs.read_u32()?,
                fog_color: bs.read_color3()?,
                fog_alpha: bs.read_f32()?,
                fog_near: bs.read_f32()?,
                fog_far: bs.read_f32()?,
            });
        }
        Ok(ViewResource { passes })
    }
}

impl Default for ViewResource {
    fn default() -> Self {
        ViewResource { passes: vec![Pass::default()] }
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub attributes: MaterialAttributes,
    pub ambient: Color3,
    pub diffuse: Color3,
    pub specular: Color3,
    pub emissive: Color3,
    pub reflectivity: f32,
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            attributes: MaterialAttributes::all(),
            ambient: Color3::new(0.75, 0.75, 0.75),
            diffuse: Color3::default(),
            specular: Color3::default(),
            emissive: Color3::default(),
            reflectivity: 0.0,
            opacity: 1.0,
        }
    }
}

impl Material {
    pub fn read(bs: &mut Bitstream) -> Result<Material> {
        Ok(Material {
            attributes: MaterialAttributes::from_bits_truncate(bs.read_u32()?),
            ambient: bs.read_color3()?,
            diffuse: bs.read_color3()?,
            specular: bs.read_color3()?,
            emissive: bs.read_color3()?,
            reflectivity: bs.read_f32()?,
            opacity: bs.read_f32()?,
        })
    }
}

/// Per-channel texture application parameters of a lit texture shader.
#[derive(Clone, Debug, Default)]
pub struct TextureInfo {
    pub name: String,
    pub intensity: f32,
    pub blend_function: u8,
    pub blend_source: u8,
    pub blend_constant: f32,
    pub mode: u8,
    pub transform: Matrix4,
    pub wrap_transform: Matrix4,
    pub repeat: u8,
}

#[derive(Clone, Debug)]
pub struct LitTextureShader {
    pub attributes: ShaderAttributes,
    pub alpha_reference: f32,
    pub alpha_function: u32,
    pub blend_function: u32,
    pub render_pass_flags: u32,
    pub shader_channels: u32,
    pub alpha_texture_channels: u32,
    pub material_name: String,
    pub texinfos: [TextureInfo; 8],
}

impl Default for LitTextureShader {
    fn default() -> Self {
        LitTextureShader {
            attributes: ShaderAttributes::empty(),
            alpha_reference: 0.0,
            alpha_function: 0x0000_0617,
            blend_function: 0x0000_0606,
            render_pass_flags: 0x0000_0001,
            shader_channels: 0,
            alpha_texture_channels: 0,
            material_name: String::new(),
            texinfos: std::array::from_fn(|_| TextureInfo::default()),
        }
    }
}

impl LitTextureShader {
    pub fn read(bs: &mut Bitstream) -> Result<LitTextureShader> {
        let mut shader = LitTextureShader {
            attributes: ShaderAttributes::from_bits_truncate(bs.read_u32()?),
            alpha_reference: bs.read_f32()?,
            alpha_function: bs.read_u32()?,
            blend_function: bs.read_u32()?,
            render_pass_flags: bs.read_u32()?,
            shader_channels: bs.read_u32()?,
            alpha_texture_channels: bs.read_u32()?,
            material_name: bs.read_string()?,
            ..Default::default()
        };
        for i in 0..8 {
            if shader.shader_channels & (1 << i) != 0 {
                shader.texinfos[i] = TextureInfo {
                    name: bs.read_string()?,
                    intensity: bs.read_f32()?,
                    blend_function: bs.read_u8()?,
                    blend_source: bs.read_u8()?,
                    blend_constant: bs.read_f32()?,
                    mode: bs.read_u8()?,
                    transform: bs.read_matrix4()?,
                    wrap_transform: bs.read_matrix4()?,
                    repeat: bs.read_u8()?,
                };
            }
        }
        Ok(shader)
    }
}
