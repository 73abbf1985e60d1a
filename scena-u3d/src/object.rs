// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `object` module defines the declaration shared by all progressive model resources: the
//! maximum mesh description, quantization parameters, and skeleton read by the CLOD mesh, point
//! set, and line set generators.

use bitflags::bitflags;
use scena_core::errors::Result;
use scena_core::math::{Quaternion, Vector2, Vector3};

use crate::bitstream::Bitstream;

bitflags! {
    /// Attribute flags of a model resource declaration.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ObjectAttributes: u32 {
        /// The resource carries no normals.
        const EXCLUDE_NORMALS = 0x0000_0001;
    }
}

bitflags! {
    /// Attribute flags of a shading description.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ShadingAttributes: u32 {
        /// Faces of this shading carry per-vertex diffuse colors.
        const DIFFUSE = 0x0000_0001;
        /// Faces of this shading carry per-vertex specular colors.
        const SPECULAR = 0x0000_0002;
    }
}

/// Declares which vertex attributes and how many texture layers a face of one shading id uses.
/// Static after the declaration block.
#[derive(Clone, Debug, Default)]
pub struct ShadingDesc {
    pub attributes: ShadingAttributes,
    pub texlayer_count: u32,
    pub texcoord_dims: [u32; 8],
}

/// One bone of the skeleton description. Parsed and retained; skeletal animation itself is the
/// business of other modifier blocks.
#[derive(Clone, Debug, Default)]
pub struct Bone {
    pub name: String,
    pub parent_name: String,
    pub attributes: u32,
    pub length: f32,
    pub displacement: Vector3,
    pub orientation: Quaternion,
    pub link_count: u32,
    pub link_length: f32,
    pub start_joint_center: Vector2,
    pub start_joint_scale: Vector2,
    pub end_joint_center: Vector2,
    pub end_joint_scale: Vector2,
}

/// The maximum mesh description of a CLOD mesh, point set, or line set generator.
#[derive(Clone, Debug, Default)]
pub struct ObjectDesc {
    pub attributes: ObjectAttributes,
    pub face_count: u32,
    pub position_count: u32,
    pub normal_count: u32,
    pub diffuse_count: u32,
    pub specular_count: u32,
    pub texcoord_count: u32,
    pub shading_descs: Vec<ShadingDesc>,
    pub min_res: u32,
    pub max_res: u32,
    pub position_quality: u32,
    pub normal_quality: u32,
    pub texcoord_quality: u32,
    pub position_iq: f32,
    pub normal_iq: f32,
    pub texcoord_iq: f32,
    pub diffuse_iq: f32,
    pub specular_iq: f32,
    pub normal_crease: f32,
    pub normal_update: f32,
    pub normal_tolerance: f32,
    pub skeleton: Vec<Bone>,
}

impl ObjectDesc {
    /// Reads a model resource declaration. `clod_desc` selects the CLOD variant which carries the
    /// minimum and maximum resolution; point and line sets do not.
    pub fn read(bs: &mut Bitstream, clod_desc: bool) -> Result<ObjectDesc> {
        let mut desc = ObjectDesc::default();

        // Chain index is always zero.
        bs.read_u32()?;

        desc.attributes = ObjectAttributes::from_bits_truncate(bs.read_u32()?);
        desc.face_count = bs.read_u32()?;
        desc.position_count = bs.read_u32()?;
        desc.normal_count = bs.read_u32()?;
        desc.diffuse_count = bs.read_u32()?;
        desc.specular_count = bs.read_u32()?;
        desc.texcoord_count = bs.read_u32()?;

        let shading_count = bs.read_u32()?;
        for _ in 0..shading_count {
            let mut shading = ShadingDesc {
                attributes: ShadingAttributes::from_bits_truncate(bs.read_u32()?),
                texlayer_count: bs.read_u32()?,
                ..Default::default()
            };
            for j in 0..shading.texlayer_count as usize {
                let dim = bs.read_u32()?;
                if j < 8 {
                    shading.texcoord_dims[j] = dim;
                }
            }
            bs.read_u32()?;
            desc.shading_descs.push(shading);
        }

        if clod_desc {
            desc.min_res = bs.read_u32()?;
            desc.max_res = bs.read_u32()?;
        }

        desc.position_quality = bs.read_u32()?;
        desc.normal_quality = bs.read_u32()?;
        desc.texcoord_quality = bs.read_u32()?;

        desc.position_iq = bs.read_f32()?;
        desc.normal_iq = bs.read_f32()?;
        desc.texcoord_iq = bs.read_f32()?;
        desc.diffuse_iq = bs.read_f32()?;
        desc.specular_iq = bs.read_f32()?;

        desc.normal_crease = bs.read_f32()?;
        desc.normal_update = bs.read_f32()?;
        desc.normal_tolerance = bs.read_f32()?;

        let bone_count = bs.read_u32()?;
        for _ in 0..bone_count {
            let mut bone = Bone {
                name: bs.read_string()?,
                parent_name: bs.read_string()?,
                attributes: bs.read_u32()?,
                length: bs.read_f32()?,
                displacement: bs.read_vector3()?,
                orientation: bs.read_quaternion()?,
                ..Default::default()
            };
            if bone.attributes & 0x0000_0001 != 0 {
                bone.link_count = bs.read_u32()?;
                bone.link_length = bs.read_f32()?;
            }
            if bone.attributes & 0x0000_0002 != 0 {
                bone.start_joint_center = bs.read_vector2()?;
                bone.start_joint_scale = bs.read_vector2()?;
                bone.end_joint_center = bs.read_vector2()?;
                bone.end_joint_scale = bs.read_vector2()?;
            }
            // Skip past the rotation constraints.
            for _ in 0..6 {
                bs.read_f32()?;
            }
            desc.skeleton.push(bone);
        }

        Ok(desc)
    }

    /// Looks up a shading description by the id carried on a face, point, or line.
    pub fn shading(&self, shading_id: u32) -> Option<&ShadingDesc> {
        self.shading_descs.get(shading_id as usize)
    }
}
