// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mesh` module implements the continuous-LOD triangle mesh generator.
//!
//! A CLOD mesh is declared once, then built up by a base-mesh continuation and any number of
//! progressive continuations. Each progressive resolution step is one vertex split: an existing
//! vertex's one-ring is partitioned between the vertex and a newly appended one, new faces are
//! threaded into the ring, and per-corner attribute indices are rewritten. The sub-stages of a
//! step are strictly ordered; the coding contexts consulted at each sub-stage depend on mesh
//! state, so any reordering desynchronizes the arithmetic coder.

use log::warn;
use scena_core::errors::{decode_error, Result};
use scena_core::math::{Color4, Quaternion, TexCoord4, Vector3};
use smallvec::SmallVec;

use crate::assembly::{
    GeometryBuffers, GeometryElement, PrimitiveKind, BUFFER_DIFFUSE_MASK, BUFFER_NORMAL_MASK,
    BUFFER_POSITION_MASK, BUFFER_SPECULAR_MASK, BUFFER_TEXCOORD0_MASK,
};
use crate::bitstream::{Bitstream, Context};
use crate::object::{ObjectAttributes, ObjectDesc, ShadingAttributes};
use crate::util::{insert_unique_desc, sort_unique_desc};

/// Per-corner attribute indices into the mesh arrays.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Corner {
    pub position: u32,
    pub normal: u32,
    pub diffuse: u32,
    pub specular: u32,
    pub texcoord: [u32; 8],
}

/// One triangle: a shading id and three corners.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Face {
    pub shading_id: u32,
    pub corners: [Corner; 3],
}

impl Face {
    /// The corner at a given position index. Falls back to corner 0 when no corner matches.
    fn corner_at(&self, position: u32) -> &Corner {
        if self.corners[2].position == position {
            &self.corners[2]
        } else if self.corners[1].position == position {
            &self.corners[1]
        } else {
            &self.corners[0]
        }
    }

    fn corner_at_mut(&mut self, position: u32) -> &mut Corner {
        if self.corners[2].position == position {
            &mut self.corners[2]
        } else if self.corners[1].position == position {
            &mut self.corners[1]
        } else {
            &mut self.corners[0]
        }
    }
}

/// A face still being decoded during a resolution step. Corner 0 is the split position, corner 1
/// the new position, corner 2 the third position; the winding is fixed up on finalization.
#[derive(Clone, Copy, Debug, Default)]
struct NewFace {
    shading_id: u32,
    ornt: u8,
    corners: [Corner; 3],
}

/// Maps every position index to the faces incident to it.
///
/// Face lists are kept sorted in descending face-index order on insertion; local index reads
/// during a resolution update select entries relative to this order, so it is part of the wire
/// contract. `move_position` appends without re-sorting, exactly as the update protocol expects.
#[derive(Default)]
pub struct FaceIndexer {
    positions: Vec<SmallVec<[u32; 8]>>,
}

impl FaceIndexer {
    fn add_face(&mut self, index: u32, face: &Face) {
        for corner in &face.corners {
            let list = &mut self.positions[corner.position as usize];
            list.push(index);
            list.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    fn add_position(&mut self) {
        self.positions.push(SmallVec::new());
    }

    fn add_positions(&mut self, n: usize) {
        for _ in 0..n {
            self.positions.push(SmallVec::new());
        }
    }

    /// All positions referenced by faces incident to `position`, including `position` itself,
    /// descending and unique.
    fn list_inclusive_neighbors(&self, faces: &[Face], position: u32) -> Vec<u32> {
        let mut neighbors = Vec::new();
        for &fi in self.list(position) {
            for corner in &faces[fi as usize].corners {
                neighbors.push(corner.position);
            }
        }
        sort_unique_desc(&mut neighbors);
        neighbors
    }

    fn list(&self, position: u32) -> &[u32] {
        match self.positions.get(position as usize) {
            Some(list) => list,
            None => &[],
        }
    }

    fn list_faces(&self, position: u32) -> Vec<u32> {
        self.list(position).to_vec()
    }

    fn move_position(&mut self, face: u32, position: u32, new_position: u32) {
        self.positions[position as usize].retain(|&mut f| f != face);
        self.positions[new_position as usize].push(face);
    }

    /// The unique diffuse color indices in use at `position`, descending.
    fn list_diffuse_colors(&self, faces: &[Face], position: u32) -> Vec<u32> {
        let mut ret: Vec<u32> =
            self.list(position).iter().map(|&fi| faces[fi as usize].corner_at(position).diffuse).collect();
        sort_unique_desc(&mut ret);
        ret
    }

    /// The unique specular color indices in use at `position`, descending.
    fn list_specular_colors(&self, faces: &[Face], position: u32) -> Vec<u32> {
        let mut ret: Vec<u32> =
            self.list(position).iter().map(|&fi| faces[fi as usize].corner_at(position).specular).collect();
        sort_unique_desc(&mut ret);
        ret
    }

    /// The unique texture coordinate indices of one layer in use at `position`, descending. Only
    /// faces whose shading enables the layer contribute.
    fn list_texcoords(
        &self,
        faces: &[Face],
        desc: &ObjectDesc,
        position: u32,
        layer: u32,
    ) -> Vec<u32> {
        let mut ret = Vec::new();
        for &fi in self.list(position) {
            let face = &faces[fi as usize];
            let layers = desc.shading(face.shading_id).map_or(0, |s| s.texlayer_count);
            if layers > layer {
                ret.push(face.corner_at(position).texcoord[layer as usize]);
            }
        }
        sort_unique_desc(&mut ret);
        ret
    }

    /// Tests whether `face` has the directed edge `pos1 -> pos2` (+1), the reverse edge (-1), or
    /// neither (0), walking the winding around the triangle.
    fn check_edge(face: &Face, pos1: u32, pos2: u32) -> i32 {
        let c = &face.corners;
        if c[0].position == pos1 {
            if c[1].position == pos2 {
                1
            } else if c[2].position == pos2 {
                -1
            } else {
                0
            }
        } else if c[1].position == pos1 {
            if c[0].position == pos2 {
                -1
            } else if c[2].position == pos2 {
                1
            } else {
                0
            }
        } else if c[2].position == pos1 {
            if c[0].position == pos2 {
                1
            } else if c[1].position == pos2 {
                -1
            } else {
                0
            }
        } else {
            0
        }
    }
}

/// A continuous-LOD triangle mesh generator.
pub struct ClodMesh {
    desc: ObjectDesc,
    positions: Vec<Vector3>,
    normals: Vec<Vector3>,
    diffuse_colors: Vec<Color4>,
    specular_colors: Vec<Color4>,
    texcoords: Vec<TexCoord4>,
    faces: Vec<Face>,
    cur_res: u32,
    /// Per-corner-slot last-seen indices for duplication bits. Persist across update steps;
    /// starting from zero is part of the wire contract.
    last_corners: [Corner; 3],
    indexer: FaceIndexer,
}

impl Default for ClodMesh {
    fn default() -> Self {
        ClodMesh::new(ObjectDesc::default())
    }
}

impl ClodMesh {
    pub fn new(desc: ObjectDesc) -> Self {
        ClodMesh {
            desc,
            positions: Vec::new(),
            normals: Vec::new(),
            diffuse_colors: Vec::new(),
            specular_colors: Vec::new(),
            texcoords: Vec::new(),
            faces: Vec::new(),
            cur_res: 0,
            last_corners: [Corner::default(); 3],
            indexer: FaceIndexer::default(),
        }
    }

    pub fn read(bs: &mut Bitstream) -> Result<ClodMesh> {
        Ok(ClodMesh::new(ObjectDesc::read(bs, true)?))
    }

    pub fn desc(&self) -> &ObjectDesc {
        &self.desc
    }

    pub fn cur_res(&self) -> u32 {
        self.cur_res
    }

    pub fn positions(&self) -> &[Vector3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vector3] {
        &self.normals
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    /// The faces incident to a position, in indexer order.
    pub fn faces_at(&self, position: u32) -> Vec<u32> {
        self.indexer.list_faces(position)
    }

    fn shading_fields(&self, shading_id: u32) -> Result<(ShadingAttributes, u32)> {
        match self.desc.shading(shading_id) {
            Some(s) => Ok((s.attributes, s.texlayer_count)),
            None => decode_error("u3d: face references an undeclared shading id"),
        }
    }

    /// Builds the base mesh from a base-mesh continuation block. Valid once, and only when the
    /// block's position count equals the declared minimum resolution.
    pub fn create_base_mesh(&mut self, bs: &mut Bitstream) -> Result<()> {
        // Chain index is always zero.
        bs.read_u32()?;
        let face_count = bs.read_u32()?;
        let position_count = bs.read_u32()?;
        let normal_count = bs.read_u32()?;
        let diffuse_count = bs.read_u32()?;
        let specular_count = bs.read_u32()?;
        let texcoord_count = bs.read_u32()?;

        if self.cur_res > 0 {
            return decode_error("u3d: base mesh is already set up");
        }
        if self.desc.min_res != position_count {
            return decode_error("u3d: base mesh position count does not match the declaration");
        }

        for _ in 0..position_count {
            self.positions.push(bs.read_vector3()?);
        }
        self.indexer.add_positions(position_count as usize);
        for _ in 0..normal_count {
            self.normals.push(bs.read_vector3()?);
        }
        for _ in 0..diffuse_count {
            self.diffuse_colors.push(bs.read_color4()?);
        }
        for _ in 0..specular_count {
            self.specular_colors.push(bs.read_color4()?);
        }
        for _ in 0..texcoord_count {
            self.texcoords.push(bs.read_texcoord4()?);
        }

        for i in 0..face_count {
            let mut face = Face { shading_id: bs.read_compressed_u32(Context::Shading)?, ..Default::default() };
            let (shading_attrs, texlayers) = self.shading_fields(face.shading_id)?;
            for corner in face.corners.iter_mut() {
                corner.position = bs.read_static_u32(position_count)?;
                if !self.desc.attributes.contains(ObjectAttributes::EXCLUDE_NORMALS) {
                    corner.normal = bs.read_static_u32(normal_count)?;
                }
                if shading_attrs.contains(ShadingAttributes::DIFFUSE) {
                    corner.diffuse = bs.read_static_u32(diffuse_count)?;
                }
                if shading_attrs.contains(ShadingAttributes::SPECULAR) {
                    corner.specular = bs.read_static_u32(specular_count)?;
                }
                for k in 0..texlayers.min(8) as usize {
                    corner.texcoord[k] = bs.read_static_u32(texcoord_count)?;
                }
                if corner.position >= position_count {
                    return decode_error("u3d: base mesh corner references a position out of range");
                }
            }
            self.faces.push(face);
            self.indexer.add_face(i, &face);
        }

        self.cur_res = self.desc.min_res;
        Ok(())
    }

    /// Applies the progressive resolution updates `[start, end)` from a progressive-mesh
    /// continuation block. Each step appends exactly one position.
    pub fn update_resolution(&mut self, bs: &mut Bitstream) -> Result<()> {
        // Chain index is always zero.
        bs.read_u32()?;
        let start = bs.read_u32()?;
        let end = bs.read_u32()?;

        if self.cur_res != start {
            return decode_error("u3d: resolution update out of order");
        }

        for r in start..end {
            self.split_vertex(bs, r)?;
        }
        self.cur_res = end;
        Ok(())
    }

    /// Decodes one vertex split at resolution `r`.
    fn split_vertex(&mut self, bs: &mut Bitstream, r: u32) -> Result<()> {
        let split_position = if r == 0 {
            bs.read_compressed_u32(Context::Zero)?
        } else {
            bs.read_static_u32(r)?
        };

        // Average the attributes of the corners currently at the split position; the averages
        // seed the new attribute entries below. Collect the ring of surrounding positions.
        let mut diffuse_average = Color4::default();
        let mut specular_average = Color4::default();
        let mut texcoord_average = TexCoord4::default();
        let mut color_match_count = 0u32;
        let split_faces = self.indexer.list_faces(split_position);
        let mut local_positions: Vec<u32> = Vec::new();
        for &fi in &split_faces {
            let face = &self.faces[fi as usize];
            let corner = face.corner_at(split_position);
            let (shading_attrs, texlayers) = self.shading_fields(face.shading_id)?;
            if shading_attrs.contains(ShadingAttributes::DIFFUSE) {
                diffuse_average +=
                    self.diffuse_colors.get(corner.diffuse as usize).copied().unwrap_or_default();
            }
            if shading_attrs.contains(ShadingAttributes::SPECULAR) {
                specular_average +=
                    self.specular_colors.get(corner.specular as usize).copied().unwrap_or_default();
            }
            if texlayers > 0 {
                texcoord_average +=
                    self.texcoords.get(corner.texcoord[0] as usize).copied().unwrap_or_default();
            }
            color_match_count += 1;
            for corner in &face.corners {
                if corner.position != split_position {
                    local_positions.push(corner.position);
                }
            }
        }
        sort_unique_desc(&mut local_positions);
        if color_match_count > 0 {
            diffuse_average /= color_match_count as f32;
            specular_average /= color_match_count as f32;
            texcoord_average /= color_match_count as f32;
        }

        // New attribute entries, coded as deltas against the averages.
        let new_diffuse_count = bs.read_compressed_u16(Context::DiffuseCount)?;
        let mut new_diffuse_colors = vec![diffuse_average; new_diffuse_count as usize];
        for j in 0..new_diffuse_count as usize {
            let sign = bs.read_compressed_u8(Context::DiffuseColorSign)?;
            let red = bs.read_compressed_u32(Context::ColorDiffR)?;
            let green = bs.read_compressed_u32(Context::ColorDiffG)?;
            let blue = bs.read_compressed_u32(Context::ColorDiffB)?;
            let alpha = bs.read_compressed_u32(Context::ColorDiffA)?;
            new_diffuse_colors[j] +=
                Color4::dequantize(sign, red, green, blue, alpha, self.desc.diffuse_iq);
        }

        let new_specular_count = bs.read_compressed_u16(Context::SpecularCount)?;
        let mut new_specular_colors = vec![specular_average; new_specular_count as usize];
        // The encoder emits one specular delta per *diffuse* entry. This matches the authority
        // that produced the bitstreams and is the wire contract; deltas without a matching entry
        // are read and dropped.
        for j in 0..new_diffuse_count as usize {
            let sign = bs.read_compressed_u8(Context::SpecularColorSign)?;
            let red = bs.read_compressed_u32(Context::ColorDiffR)?;
            let green = bs.read_compressed_u32(Context::ColorDiffG)?;
            let blue = bs.read_compressed_u32(Context::ColorDiffB)?;
            let alpha = bs.read_compressed_u32(Context::ColorDiffA)?;
            let delta =
                Color4::dequantize(sign, red, green, blue, alpha, self.desc.specular_iq);
            if let Some(color) = new_specular_colors.get_mut(j) {
                *color += delta;
            }
        }

        let new_texcoord_count = bs.read_compressed_u16(Context::TexCoordCount)?;
        let mut new_texcoords = vec![texcoord_average; new_texcoord_count as usize];
        for j in 0..new_texcoord_count as usize {
            let sign = bs.read_compressed_u8(Context::TexCoordSign)?;
            let u = bs.read_compressed_u32(Context::TexCDiffU)?;
            let v = bs.read_compressed_u32(Context::TexCDiffV)?;
            let s = bs.read_compressed_u32(Context::TexCDiffS)?;
            let t = bs.read_compressed_u32(Context::TexCDiffT)?;
            new_texcoords[j] += TexCoord4::dequantize(sign, u, v, s, t, self.desc.texcoord_iq);
        }

        // New faces. Corner 0 is the split position and corner 1 the new position; the third
        // position is either an index into the ring or a global position index. Each decoded
        // third position joins the ring so later faces of this step can reference it locally.
        let new_face_count = bs.read_compressed_u32(Context::FaceCnt)?;
        if new_face_count > 0 && split_position as usize > self.positions.len() {
            return decode_error("u3d: split position index out of range");
        }
        let mut new_faces = vec![NewFace::default(); new_face_count as usize];
        for face in new_faces.iter_mut() {
            face.corners[0].position = split_position;
            face.corners[1].position = self.positions.len() as u32;
            face.shading_id = bs.read_compressed_u32(Context::Shading)?;
            face.ornt = bs.read_compressed_u8(Context::FaceOrnt)?;
            let third_pos_type = bs.read_compressed_u8(Context::ThirdPosType)?;
            let third = if third_pos_type == 1 {
                let local = bs.read_compressed_u32(Context::LocalThirdPos)?;
                match local_positions.get(local as usize) {
                    Some(&p) => p,
                    None => return decode_error("u3d: local third position index out of range"),
                }
            } else {
                bs.read_static_u32(r)?
            };
            if third as usize > self.positions.len() {
                return decode_error("u3d: third position index out of range");
            }
            face.corners[2].position = third;
            insert_unique_desc(&mut local_positions, third);
        }
        self.indexer.add_position();

        let mut split_faces = split_faces;
        split_faces.sort_unstable_by(|a, b| b.cmp(a));

        // The attribute index pools at the split position, captured before any face moves.
        let mut split_diffuse_colors: Vec<u32> = Vec::new();
        let mut split_specular_colors: Vec<u32> = Vec::new();
        let mut split_texcoords: [Vec<u32>; 8] = Default::default();
        for &fi in &split_faces {
            let face = &self.faces[fi as usize];
            let corner = face.corner_at(split_position);
            split_diffuse_colors.push(corner.diffuse);
            split_specular_colors.push(corner.specular);
            let (_, texlayers) = self.shading_fields(face.shading_id)?;
            for l in 0..texlayers.min(8) as usize {
                split_texcoords[l].push(corner.texcoord[l]);
            }
        }
        sort_unique_desc(&mut split_diffuse_colors);
        sort_unique_desc(&mut split_specular_colors);
        for list in split_texcoords.iter_mut() {
            sort_unique_desc(list);
        }

        // Stay-or-move classification of the faces currently in the ring. The context is chosen
        // predictively from the new faces' edges and from the choices made so far.
        let mut move_faces: Vec<u32> = Vec::new();
        let mut moved_positions: Vec<u32> = Vec::new();
        let mut stayed_positions: Vec<u32> = Vec::new();
        for &fi in &split_faces {
            let face = &self.faces[fi as usize];
            let mut context = Context::StayMove0;
            for nf in &new_faces {
                let flag = FaceIndexer::check_edge(face, split_position, nf.corners[2].position);
                if flag > 0 {
                    context = if nf.ornt == 1 { Context::StayMove1 } else { Context::StayMove2 };
                    break;
                } else if flag < 0 {
                    context = if nf.ornt == 1 { Context::StayMove2 } else { Context::StayMove1 };
                    break;
                }
            }
            if context == Context::StayMove0
                && face.corners.iter().any(|c| moved_positions.contains(&c.position))
            {
                context = Context::StayMove3;
            }
            if context == Context::StayMove0
                && face.corners.iter().any(|c| stayed_positions.contains(&c.position))
            {
                context = Context::StayMove4;
            }
            let staymove = bs.read_compressed_u8(context)?;
            if staymove == 1 {
                move_faces.push(fi);
                for corner in &face.corners {
                    if corner.position != split_position {
                        moved_positions.push(corner.position);
                    }
                }
            } else {
                for corner in &face.corners {
                    if corner.position != split_position {
                        stayed_positions.push(corner.position);
                    }
                }
            }
        }

        // Rewrite the attribute indices of each moving face, then retarget its split corner to
        // the new position. The local index pools are recomputed per face so earlier moves in
        // this step are reflected.
        for &fi in &move_faces {
            let (shading_attrs, texlayers) =
                self.shading_fields(self.faces[fi as usize].shading_id)?;
            if shading_attrs.contains(ShadingAttributes::DIFFUSE) {
                let keep_change = bs.read_compressed_u8(Context::DiffuseKeepChange)?;
                if keep_change == 0x1 {
                    let change_type = bs.read_compressed_u8(Context::DiffuseChangeType)?;
                    let new_index = if change_type == 0x1 {
                        self.diffuse_colors.len() as u32
                            + bs.read_compressed_u32(Context::DiffuseChangeIndexNew)?
                    } else if change_type == 0x2 {
                        let local = bs.read_compressed_u32(Context::DiffuseChangeIndexLocal)?;
                        let pool = self.indexer.list_diffuse_colors(&self.faces, split_position);
                        match pool.get(local as usize) {
                            Some(&idx) => idx,
                            None => return decode_error("u3d: local diffuse index out of range"),
                        }
                    } else {
                        bs.read_compressed_u32(Context::DiffuseChangeIndexGlobal)?
                    };
                    self.faces[fi as usize].corner_at_mut(split_position).diffuse = new_index;
                }
            }
            if shading_attrs.contains(ShadingAttributes::SPECULAR) {
                let keep_change = bs.read_compressed_u8(Context::SpecularKeepChange)?;
                if keep_change == 0x1 {
                    let change_type = bs.read_compressed_u8(Context::SpecularChangeType)?;
                    let new_index = if change_type == 0x1 {
                        self.specular_colors.len() as u32
                            + bs.read_compressed_u32(Context::SpecularChangeIndexNew)?
                    } else if change_type == 0x2 {
                        let local = bs.read_compressed_u32(Context::SpecularChangeIndexLocal)?;
                        let pool = self.indexer.list_specular_colors(&self.faces, split_position);
                        match pool.get(local as usize) {
                            Some(&idx) => idx,
                            None => return decode_error("u3d: local specular index out of range"),
                        }
                    } else {
                        bs.read_compressed_u32(Context::SpecularChangeIndexGlobal)?
                    };
                    self.faces[fi as usize].corner_at_mut(split_position).specular = new_index;
                }
            }
            for k in 0..texlayers.min(8) {
                let keep_change = bs.read_compressed_u8(Context::TexCKeepChange)?;
                if keep_change == 0x1 {
                    let change_type = bs.read_compressed_u8(Context::TexCChangeType)?;
                    let new_index = if change_type == 0x1 {
                        self.texcoords.len() as u32
                            + bs.read_compressed_u32(Context::TexCChangeIndexNew)?
                    } else if change_type == 0x2 {
                        let local = bs.read_compressed_u32(Context::TexCChangeIndexLocal)?;
                        let pool =
                            self.indexer.list_texcoords(&self.faces, &self.desc, split_position, k);
                        match pool.get(local as usize) {
                            Some(&idx) => idx,
                            None => return decode_error("u3d: local texcoord index out of range"),
                        }
                    } else {
                        bs.read_compressed_u32(Context::TexCChangeIndexGlobal)?
                    };
                    self.faces[fi as usize].corner_at_mut(split_position).texcoord[k as usize] =
                        new_index;
                }
            }
            let new_position = self.positions.len() as u32;
            self.faces[fi as usize].corner_at_mut(split_position).position = new_position;
            self.indexer.move_position(fi, split_position, new_position);
        }

        // Append the new attribute entries only now, so "new index" references decoded above
        // resolve to their final offsets.
        self.diffuse_colors.extend(new_diffuse_colors);
        self.specular_colors.extend(new_specular_colors);
        self.texcoords.extend(new_texcoords);

        // Resolve the corner attribute indices of the new faces and thread them into the mesh.
        for j in 0..new_face_count as usize {
            let third_position = new_faces[j].corners[2].position;
            let third_faces = self.indexer.list_faces(third_position);
            let mut third_diffuse_colors: Vec<u32> = Vec::new();
            let mut third_specular_colors: Vec<u32> = Vec::new();
            let mut third_texcoords: [Vec<u32>; 8] = Default::default();
            for &fi in &third_faces {
                let face = &self.faces[fi as usize];
                let corner = face.corner_at(third_position);
                third_diffuse_colors.push(corner.diffuse);
                third_specular_colors.push(corner.specular);
                let (_, texlayers) = self.shading_fields(face.shading_id)?;
                for m in 0..texlayers.min(8) as usize {
                    third_texcoords[m].push(corner.texcoord[m]);
                }
            }
            sort_unique_desc(&mut third_diffuse_colors);
            sort_unique_desc(&mut third_specular_colors);
            for list in third_texcoords.iter_mut() {
                sort_unique_desc(list);
            }

            let (shading_attrs, texlayers) = self.shading_fields(new_faces[j].shading_id)?;

            if shading_attrs.contains(ShadingAttributes::DIFFUSE) {
                let dup_flag = bs.read_compressed_u8(Context::ColorDup)?;
                for k in 0..3 {
                    if dup_flag & (1 << k) == 0 {
                        let index_type = bs.read_compressed_u8(Context::ColorIndexType)?;
                        new_faces[j].corners[k].diffuse = if index_type == 2 {
                            let local = bs.read_compressed_u32(Context::ColorIndexLocal)? as usize;
                            let pool =
                                if k < 2 { &split_diffuse_colors } else { &third_diffuse_colors };
                            match pool.get(local) {
                                Some(&idx) => idx,
                                None => {
                                    return decode_error("u3d: local diffuse index out of range")
                                }
                            }
                        } else {
                            bs.read_compressed_u32(Context::ColorIndexGlobal)?
                        };
                    } else {
                        new_faces[j].corners[k].diffuse = self.last_corners[k].diffuse;
                    }
                    self.last_corners[k].diffuse = new_faces[j].corners[k].diffuse;
                    if k == 0 {
                        insert_unique_desc(&mut split_diffuse_colors, new_faces[j].corners[0].diffuse);
                    }
                }
            }
            if shading_attrs.contains(ShadingAttributes::SPECULAR) {
                let dup_flag = bs.read_compressed_u8(Context::ColorDup)?;
                for k in 0..3 {
                    if dup_flag & (1 << k) == 0 {
                        let index_type = bs.read_compressed_u8(Context::ColorIndexType)?;
                        new_faces[j].corners[k].specular = if index_type == 2 {
                            let local = bs.read_compressed_u32(Context::ColorIndexLocal)? as usize;
                            let pool =
                                if k < 2 { &split_specular_colors } else { &third_specular_colors };
                            match pool.get(local) {
                                Some(&idx) => idx,
                                None => {
                                    return decode_error("u3d: local specular index out of range")
                                }
                            }
                        } else {
                            bs.read_compressed_u32(Context::ColorIndexGlobal)?
                        };
                    } else {
                        new_faces[j].corners[k].specular = self.last_corners[k].specular;
                    }
                    self.last_corners[k].specular = new_faces[j].corners[k].specular;
                    if k == 0 {
                        insert_unique_desc(
                            &mut split_specular_colors,
                            new_faces[j].corners[0].specular,
                        );
                    }
                }
            }
            for k in 0..texlayers.min(8) as usize {
                let dup_flag = bs.read_compressed_u8(Context::TexCDup)?;
                for l in 0..3 {
                    if dup_flag & (1 << l) == 0 {
                        let index_type = bs.read_compressed_u8(Context::TexCIndexType)?;
                        new_faces[j].corners[l].texcoord[k] = if index_type == 2 {
                            let local =
                                bs.read_compressed_u32(Context::TextureIndexLocal)? as usize;
                            let pool =
                                if l < 2 { &split_texcoords[k] } else { &third_texcoords[k] };
                            match pool.get(local) {
                                Some(&idx) => idx,
                                None => {
                                    return decode_error("u3d: local texcoord index out of range")
                                }
                            }
                        } else {
                            bs.read_compressed_u32(Context::TextureIndexGlobal)?
                        };
                    } else {
                        // The last-seen register holds texture indices in slot 0 only, for every
                        // layer. Wire contract.
                        new_faces[j].corners[l].texcoord[k] = self.last_corners[l].texcoord[0];
                    }
                    self.last_corners[l].texcoord[0] = new_faces[j].corners[l].texcoord[k];
                }
                insert_unique_desc(&mut split_texcoords[k], new_faces[j].corners[0].texcoord[k]);
            }

            // An orientation bit of 1 keeps (split, new, third); 0 swaps the first two corners.
            let nf = &new_faces[j];
            let corners = if nf.ornt == 1 {
                [nf.corners[0], nf.corners[1], nf.corners[2]]
            } else {
                [nf.corners[1], nf.corners[0], nf.corners[2]]
            };
            let face = Face { shading_id: nf.shading_id, corners };
            self.faces.push(face);
            self.indexer.add_face((self.faces.len() - 1) as u32, &face);
        }

        // The new position itself: predicted from the split position (or the origin when the
        // split index is out of range) plus a dequantized delta.
        let mut new_position = match self.positions.get(split_position as usize) {
            Some(&p) => p,
            None => Vector3::default(),
        };
        let pos_sign = bs.read_compressed_u8(Context::PosDiffSign)?;
        let pos_x = bs.read_compressed_u32(Context::PosDiffX)?;
        let pos_y = bs.read_compressed_u32(Context::PosDiffY)?;
        let pos_z = bs.read_compressed_u32(Context::PosDiffZ)?;
        new_position += Vector3::dequantize(pos_sign, pos_x, pos_y, pos_z, self.desc.position_iq);
        self.positions.push(new_position);

        if !self.desc.attributes.contains(ObjectAttributes::EXCLUDE_NORMALS) {
            self.update_normals(bs)?;
        }

        Ok(())
    }

    /// Rebuilds the normals of the inclusive one-ring of the freshly appended position: cluster
    /// the geometric face normals, refine each cluster by a quaternion delta, and re-index every
    /// corner of the ring.
    fn update_normals(&mut self, bs: &mut Bitstream) -> Result<()> {
        let new_position = (self.positions.len() - 1) as u32;
        let neighbors = self.indexer.list_inclusive_neighbors(&self.faces, new_position);

        for &v in &neighbors {
            let normal_count = bs.read_compressed_u32(Context::NormalCnt)?;
            let client_faces = self.indexer.list_faces(v);

            let mut face_norms: Vec<Vector3> = Vec::with_capacity(client_faces.len());
            for &fi in &client_faces {
                let face = &self.faces[fi as usize];
                let a = self.position_or_origin(face.corners[0].position);
                let ba = self.position_or_origin(face.corners[1].position) - a;
                let ca = self.position_or_origin(face.corners[2].position) - a;
                face_norms.push(ba.cross(&ca).normalized());
            }

            // Seed the clusters with the first face normal, then grow by repeatedly adopting the
            // normal farthest from every existing cluster. The seed stays in the pool and later
            // merges into its own cluster, which advances the merge weight.
            let mut new_norms: Vec<Vector3> = Vec::new();
            if let Some(&first) = face_norms.first() {
                new_norms.push(first);
            }
            while (new_norms.len() as u32) < normal_count && !face_norms.is_empty() {
                let mut farthest_dist = 1.0f32;
                let mut farthest_index = 0;
                for (idx, fnorm) in face_norms.iter().enumerate() {
                    let mut nearest_dist = -1.0f32;
                    for nnorm in &new_norms {
                        if fnorm.dot(nnorm) > nearest_dist {
                            nearest_dist = fnorm.dot(nnorm);
                        }
                    }
                    if nearest_dist < farthest_dist {
                        farthest_dist = nearest_dist;
                        farthest_index = idx;
                    }
                }
                new_norms.push(face_norms.remove(farthest_index));
            }

            // Merge the remaining face normals into their nearest cluster.
            let mut merge_weight = vec![0u32; new_norms.len()];
            while let Some(last) = face_norms.last().copied() {
                let mut nearest_dist = -1.0f32;
                let mut nearest_index = 0;
                for (k, nnorm) in new_norms.iter().enumerate() {
                    if nnorm.dot(&last) > nearest_dist {
                        nearest_dist = nnorm.dot(&last);
                        nearest_index = k;
                    }
                }
                new_norms[nearest_index] = scena_core::math::slerp(
                    new_norms[nearest_index],
                    last,
                    1.0 / (merge_weight[nearest_index] as f32 + 2.0),
                );
                merge_weight[nearest_index] += 1;
                face_norms.pop();
            }

            // Refine each cluster representative by a quaternion-encoded delta.
            for k in 0..normal_count as usize {
                let sign = bs.read_compressed_u8(Context::DiffNormalSign)?;
                let x = bs.read_compressed_u32(Context::DiffNormalX)?;
                let y = bs.read_compressed_u32(Context::DiffNormalY)?;
                let z = bs.read_compressed_u32(Context::DiffNormalZ)?;
                let delta = Quaternion::from_encoded_vector(Vector3::dequantize(
                    sign >> 1,
                    x,
                    y,
                    z,
                    self.desc.normal_iq,
                ));
                if let Some(norm) = new_norms.get_mut(k) {
                    *norm = Vector3::from(delta * Quaternion::from(*norm));
                }
            }

            for &fi in &client_faces {
                let normal_index =
                    self.normals.len() as u32 + bs.read_compressed_u32(Context::NormalIdx)?;
                self.faces[fi as usize].corner_at_mut(v).normal = normal_index;
            }
            self.normals.extend(new_norms);
        }

        Ok(())
    }

    fn position_or_origin(&self, index: u32) -> Vector3 {
        match self.positions.get(index as usize) {
            Some(&p) => p,
            None => Vector3::default(),
        }
    }

    /// Interleaves the mesh into per-shading-id vertex buffers for the renderer.
    pub fn geometry(&self) -> GeometryBuffers {
        let mut elements = Vec::with_capacity(self.desc.shading_descs.len());

        let mut face_count = vec![0usize; self.desc.shading_descs.len()];
        for face in &self.faces {
            if let Some(count) = face_count.get_mut(face.shading_id as usize) {
                *count += 1;
            } else {
                warn!("u3d: skipping a face with an undeclared shading id");
            }
        }

        for (i, shading) in self.desc.shading_descs.iter().enumerate() {
            let mut mask = BUFFER_POSITION_MASK;
            if !self.desc.attributes.contains(ObjectAttributes::EXCLUDE_NORMALS) {
                mask |= BUFFER_NORMAL_MASK;
            }
            if shading.attributes.contains(ShadingAttributes::DIFFUSE) {
                mask |= BUFFER_DIFFUSE_MASK;
            }
            if shading.attributes.contains(ShadingAttributes::SPECULAR) {
                mask |= BUFFER_SPECULAR_MASK;
            }
            for j in 0..shading.texlayer_count.min(8) {
                if shading.texcoord_dims[j as usize] == 2 {
                    mask |= BUFFER_TEXCOORD0_MASK << (2 * j);
                }
            }

            let stride = mask.count_ones() as usize;
            let mut data = Vec::with_capacity(face_count[i] * 3 * stride);
            for face in self.faces.iter().filter(|f| f.shading_id as usize == i) {
                for corner in &face.corners {
                    let p = self.position_or_origin(corner.position);
                    data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&p)));
                    if mask & BUFFER_NORMAL_MASK != 0 {
                        let n = self.normals.get(corner.normal as usize).copied().unwrap_or_default();
                        data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&n)));
                    }
                    if mask & BUFFER_DIFFUSE_MASK != 0 {
                        let c = self
                            .diffuse_colors
                            .get(corner.diffuse as usize)
                            .copied()
                            .unwrap_or_default();
                        data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&c)));
                    }
                    if mask & BUFFER_SPECULAR_MASK != 0 {
                        let c = self
                            .specular_colors
                            .get(corner.specular as usize)
                            .copied()
                            .unwrap_or_default();
                        data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&c)));
                    }
                    for l in 0..8 {
                        if mask & (BUFFER_TEXCOORD0_MASK << (2 * l)) != 0 {
                            let t = self
                                .texcoords
                                .get(corner.texcoord[l] as usize)
                                .copied()
                                .unwrap_or_default();
                            data.extend_from_slice(&[t.u, t.v]);
                        }
                    }
                }
            }

            elements.push(GeometryElement {
                attr_mask: mask,
                vertex_count: face_count[i] * 3,
                data,
            });
        }

        GeometryBuffers { kind: PrimitiveKind::Triangles, elements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenc::Encoder;
    use scena_core::math::Vector3;

    fn test_desc() -> ObjectDesc {
        ObjectDesc {
            face_count: 3,
            position_count: 5,
            normal_count: 16,
            shading_descs: vec![Default::default()],
            min_res: 3,
            max_res: 5,
            position_iq: 1.0,
            normal_iq: 1.0,
            texcoord_iq: 1.0,
            diffuse_iq: 1.0,
            specular_iq: 1.0,
            ..Default::default()
        }
    }

    fn encode_base_mesh() -> Encoder {
        let mut enc = Encoder::new();
        enc.write_u32(0); // chain index
        enc.write_u32(1); // faces
        enc.write_u32(3); // positions
        enc.write_u32(3); // normals
        enc.write_u32(0);
        enc.write_u32(0);
        enc.write_u32(0);
        for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for c in p {
                enc.write_f32(c);
            }
        }
        for _ in 0..3 {
            for c in [0.0f32, 0.0, 1.0] {
                enc.write_f32(c);
            }
        }
        enc.write_compressed_u32(Context::Shading, 0);
        for corner in 0..3u32 {
            enc.write_static_u32(3, corner); // position
            enc.write_static_u32(3, corner); // normal
        }
        enc
    }

    fn base_mesh() -> ClodMesh {
        let mut mesh = ClodMesh::new(test_desc());
        mesh.create_base_mesh(&mut encode_base_mesh().finish()).unwrap();
        mesh
    }

    // One vertex split at resolution 3: split vertex 0, two new faces fanning to the ring
    // vertices, every ring face staying, position delta (0, 0, 1).
    fn encode_step3(enc: &mut Encoder) {
        enc.write_static_u32(3, 0); // split position
        enc.write_compressed_u16(Context::DiffuseCount, 0);
        enc.write_compressed_u16(Context::SpecularCount, 0);
        enc.write_compressed_u16(Context::TexCoordCount, 0);
        enc.write_compressed_u32(Context::FaceCnt, 2);
        // Face A: third = local_positions[0] = 2.
        enc.write_compressed_u32(Context::Shading, 0);
        enc.write_compressed_u8(Context::FaceOrnt, 1);
        enc.write_compressed_u8(Context::ThirdPosType, 1);
        enc.write_compressed_u32(Context::LocalThirdPos, 0);
        // Face B: third = local_positions[1] = 1.
        enc.write_compressed_u32(Context::Shading, 0);
        enc.write_compressed_u8(Context::FaceOrnt, 1);
        enc.write_compressed_u8(Context::ThirdPosType, 1);
        enc.write_compressed_u32(Context::LocalThirdPos, 1);
        // The lone ring face shares the reversed edge (0, 2) with face A: context StayMove2.
        enc.write_compressed_u8(Context::StayMove2, 0);
        // Position delta (0, 0, 1).
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 0);
        enc.write_compressed_u32(Context::PosDiffY, 0);
        enc.write_compressed_u32(Context::PosDiffZ, 1);
        // Normals for the inclusive ring of the new vertex: neighbors 3, 2, 1, 0 with client
        // face lists [2,1], [1,0], [2,0], [2,1,0].
        for faces_at_neighbor in [2usize, 2, 2, 3] {
            enc.write_compressed_u32(Context::NormalCnt, 1);
            enc.write_compressed_u8(Context::DiffNormalSign, 0);
            enc.write_compressed_u32(Context::DiffNormalX, 0);
            enc.write_compressed_u32(Context::DiffNormalY, 0);
            enc.write_compressed_u32(Context::DiffNormalZ, 0);
            for _ in 0..faces_at_neighbor {
                enc.write_compressed_u32(Context::NormalIdx, 0);
            }
        }
    }

    // A second split at resolution 4: split vertex 1, no new faces, both ring faces stay.
    fn encode_step4(enc: &mut Encoder) {
        enc.write_static_u32(4, 1); // split position
        enc.write_compressed_u16(Context::DiffuseCount, 0);
        enc.write_compressed_u16(Context::SpecularCount, 0);
        enc.write_compressed_u16(Context::TexCoordCount, 0);
        enc.write_compressed_u32(Context::FaceCnt, 0);
        // Ring faces in descending order: face 2 (no prediction), then face 0 (a corner of it
        // already stayed).
        enc.write_compressed_u8(Context::StayMove0, 0);
        enc.write_compressed_u8(Context::StayMove4, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 0);
        enc.write_compressed_u32(Context::PosDiffY, 1);
        enc.write_compressed_u32(Context::PosDiffZ, 0);
        // The new vertex has no incident faces, so its inclusive ring is empty and the normal
        // phase reads nothing.
    }

    fn encode_update(range: (u32, u32), steps: &[fn(&mut Encoder)]) -> Encoder {
        let mut enc = Encoder::new();
        enc.write_u32(0); // chain index
        enc.write_u32(range.0);
        enc.write_u32(range.1);
        for step in steps {
            step(&mut enc);
        }
        enc
    }

    #[test]
    fn verify_base_mesh() {
        let mesh = base_mesh();
        assert_eq!(mesh.cur_res(), 3);
        assert_eq!(mesh.faces().len(), 1);
        assert_eq!(mesh.positions().len(), 3);
        assert_eq!(mesh.normals().len(), 3);
        for p in 0..3 {
            assert_eq!(mesh.faces_at(p), vec![0]);
        }
        assert_eq!(mesh.faces()[0].corners[1].position, 1);
    }

    #[test]
    fn verify_base_mesh_refuses_double_setup() {
        let mut mesh = base_mesh();
        assert!(mesh.create_base_mesh(&mut encode_base_mesh().finish()).is_err());
        assert_eq!(mesh.positions().len(), 3);
    }

    #[test]
    fn verify_vertex_split() {
        let mut mesh = base_mesh();
        let enc = encode_update((3, 4), &[encode_step3]);
        mesh.update_resolution(&mut enc.finish()).unwrap();

        assert_eq!(mesh.cur_res(), 4);
        assert_eq!(mesh.faces().len(), 3);
        assert_eq!(mesh.positions().len(), 4);
        assert_eq!(mesh.positions()[3], Vector3::new(0.0, 0.0, 1.0));
        // Both new faces are registered against the new vertex.
        assert_eq!(mesh.faces_at(3), vec![2, 1]);
        // Orientation 1 keeps the (split, new, third) corner order.
        assert_eq!(mesh.faces()[1].corners[0].position, 0);
        assert_eq!(mesh.faces()[1].corners[1].position, 3);
        assert_eq!(mesh.faces()[1].corners[2].position, 2);
        assert_eq!(mesh.faces()[2].corners[2].position, 1);
        // The stay decision left the base face on the split vertex.
        assert!(mesh.faces_at(0).contains(&0));
        // One normal cluster was appended per ring vertex.
        assert_eq!(mesh.normals().len(), 7);
    }

    // A split at resolution zero may name a position that does not exist yet; the predictor
    // starts from the origin and the step still appends its vertex.
    #[test]
    fn verify_split_of_absent_position_starts_at_origin() {
        let mut desc = test_desc();
        desc.min_res = 0;
        let mut mesh = ClodMesh::new(desc);

        let mut enc = Encoder::new();
        enc.write_u32(0); // chain index
        enc.write_u32(0); // start
        enc.write_u32(1); // end
        enc.write_compressed_u32(Context::Zero, 5); // split position, out of range
        enc.write_compressed_u16(Context::DiffuseCount, 0);
        enc.write_compressed_u16(Context::SpecularCount, 0);
        enc.write_compressed_u16(Context::TexCoordCount, 0);
        enc.write_compressed_u32(Context::FaceCnt, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 2);
        enc.write_compressed_u32(Context::PosDiffY, 0);
        enc.write_compressed_u32(Context::PosDiffZ, 0);
        // The new vertex has no incident faces, so the normal phase reads nothing.

        mesh.update_resolution(&mut enc.finish()).unwrap();
        assert_eq!(mesh.cur_res(), 1);
        assert_eq!(mesh.positions(), &[Vector3::new(2.0, 0.0, 0.0)]);
    }

    #[test]
    fn verify_no_op_update() {
        let mut mesh = base_mesh();
        let enc = encode_update((3, 3), &[]);
        mesh.update_resolution(&mut enc.finish()).unwrap();
        assert_eq!(mesh.cur_res(), 3);
        assert_eq!(mesh.positions().len(), 3);
        assert_eq!(mesh.faces().len(), 1);
    }

    #[test]
    fn verify_out_of_order_update_is_rejected() {
        let mut mesh = base_mesh();
        let enc = encode_update((9, 10), &[encode_step3]);
        assert!(mesh.update_resolution(&mut enc.finish()).is_err());
        assert_eq!(mesh.cur_res(), 3);
        assert_eq!(mesh.positions().len(), 3);
        assert_eq!(mesh.faces().len(), 1);
    }

    #[test]
    fn verify_split_interval_composition() {
        // Applying [3,4) then [4,5) must equal applying [3,5) in one continuation.
        let mut split_twice = base_mesh();
        split_twice.update_resolution(&mut encode_update((3, 4), &[encode_step3]).finish()).unwrap();
        split_twice.update_resolution(&mut encode_update((4, 5), &[encode_step4]).finish()).unwrap();

        let mut split_once = base_mesh();
        split_once
            .update_resolution(&mut encode_update((3, 5), &[encode_step3, encode_step4]).finish())
            .unwrap();

        assert_eq!(split_twice.cur_res(), 5);
        assert_eq!(split_once.cur_res(), 5);
        assert_eq!(split_twice.positions(), split_once.positions());
        assert_eq!(split_twice.normals(), split_once.normals());
        assert_eq!(split_twice.faces(), split_once.faces());
    }

    #[test]
    fn verify_decode_is_deterministic() {
        let decode = || {
            let mut mesh = base_mesh();
            mesh.update_resolution(&mut encode_update((3, 4), &[encode_step3]).finish()).unwrap();
            mesh
        };
        let a = decode();
        let b = decode();
        assert_eq!(a.positions(), b.positions());
        assert_eq!(a.normals(), b.normals());
        assert_eq!(a.faces(), b.faces());
    }

    #[test]
    fn verify_geometry_interleaving() {
        let mesh = base_mesh();
        let geometry = mesh.geometry();
        assert_eq!(geometry.kind, PrimitiveKind::Triangles);
        assert_eq!(geometry.elements.len(), 1);
        let element = &geometry.elements[0];
        assert_eq!(element.attr_mask, BUFFER_POSITION_MASK | BUFFER_NORMAL_MASK);
        assert_eq!(element.stride(), 6);
        assert_eq!(element.vertex_count, 3);
        assert_eq!(element.data.len(), 18);
        // First vertex: position then normal.
        assert_eq!(&element.data[0..6], &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
