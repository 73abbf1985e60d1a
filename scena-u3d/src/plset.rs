// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `plset` module implements the progressive point-set and line-set generators.
//!
//! Both share the declaration of the mesh generator but are structurally simpler: each
//! resolution step appends one position, a batch of normals predicted from the split position,
//! and a batch of point or line records whose attributes are either fresh deltas or reuses of
//! the per-attribute last-seen registers.

use scena_core::errors::{decode_error, Result};
use scena_core::math::{Color4, TexCoord4, Vector3};

use crate::assembly::{
    GeometryBuffers, GeometryElement, PrimitiveKind, BUFFER_DIFFUSE_MASK, BUFFER_NORMAL_MASK,
    BUFFER_POSITION_MASK, BUFFER_SPECULAR_MASK, BUFFER_TEXCOORD0_MASK,
};
use crate::bitstream::{Bitstream, Context};
use crate::object::{ObjectDesc, ShadingAttributes, ShadingDesc};

/// The "reuse the last-seen index" bit of a duplication flag.
const DUP_REUSE: u8 = 0x2;

/// One decoded point.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Point {
    pub shading_id: u32,
    pub position: u32,
    pub normal: u32,
    pub diffuse: u32,
    pub specular: u32,
    pub texcoord: [u32; 8],
}

/// One terminal of a line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Terminal {
    pub position: u32,
    pub normal: u32,
    pub diffuse: u32,
    pub specular: u32,
    pub texcoord: [u32; 8],
}

/// One decoded line segment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Line {
    pub shading_id: u32,
    pub terminals: [Terminal; 2],
}

impl Line {
    fn terminal_at(&self, position: u32) -> &Terminal {
        if self.terminals[0].position == position {
            &self.terminals[0]
        } else {
            &self.terminals[1]
        }
    }
}

/// Maps a position index to the lines incident to it, in insertion order.
#[derive(Default)]
struct LineIndexer {
    line_lists: Vec<Vec<u32>>,
}

impl LineIndexer {
    fn list_lines(&self, position: u32) -> Vec<u32> {
        match self.line_lists.get(position as usize) {
            Some(list) => list.clone(),
            None => Vec::new(),
        }
    }

    fn add_position(&mut self) {
        self.line_lists.push(Vec::new());
    }

    fn set_line(&mut self, position: u32, line: u32) {
        self.line_lists[position as usize].push(line);
    }
}

/// Shared attribute state of point and line records: the last-seen registers consulted by the
/// duplication bits.
#[derive(Default)]
struct LastSeen {
    diffuse: u32,
    specular: u32,
    texcoord: [u32; 8],
}

/// A progressive point-set generator.
pub struct PointSet {
    desc: ObjectDesc,
    positions: Vec<Vector3>,
    normals: Vec<Vector3>,
    diffuse_colors: Vec<Color4>,
    specular_colors: Vec<Color4>,
    texcoords: Vec<TexCoord4>,
    points: Vec<Point>,
    cur_res: u32,
    last: LastSeen,
}

impl PointSet {
    pub fn new(desc: ObjectDesc) -> Self {
        PointSet {
            desc,
            positions: Vec::new(),
            normals: Vec::new(),
            diffuse_colors: Vec::new(),
            specular_colors: Vec::new(),
            texcoords: Vec::new(),
            points: Vec::new(),
            cur_res: 0,
            last: LastSeen::default(),
        }
    }

    pub fn read(bs: &mut Bitstream) -> Result<PointSet> {
        Ok(PointSet::new(ObjectDesc::read(bs, false)?))
    }

    pub fn desc(&self) -> &ObjectDesc {
        &self.desc
    }

    pub fn positions(&self) -> &[Vector3] {
        &self.positions
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn shading(&self, shading_id: u32) -> Result<&ShadingDesc> {
        match self.desc.shading(shading_id) {
            Some(s) => Ok(s),
            None => decode_error("u3d: point references an undeclared shading id"),
        }
    }

    /// Applies one point-set continuation block.
    pub fn update_resolution(&mut self, bs: &mut Bitstream) -> Result<()> {
        // Chain index is always zero.
        bs.read_u32()?;
        let start = bs.read_u32()?;
        let end = bs.read_u32()?;

        if self.cur_res != start {
            return decode_error("u3d: resolution update out of order");
        }

        for resolution in start..end {
            let split_position;
            let mut pred_position = Vector3::default();
            if resolution == 0 {
                split_position = bs.read_compressed_u32(Context::Zero)?;
            } else {
                split_position = bs.read_static_u32(resolution)?;
                pred_position =
                    self.positions.get(split_position as usize).copied().unwrap_or_default();
            }

            let pos_sign = bs.read_compressed_u8(Context::PosDiffSign)?;
            let pos_x = bs.read_compressed_u32(Context::PosDiffX)?;
            let pos_y = bs.read_compressed_u32(Context::PosDiffY)?;
            let pos_z = bs.read_compressed_u32(Context::PosDiffZ)?;
            self.positions.push(
                pred_position
                    + Vector3::dequantize(pos_sign, pos_x, pos_y, pos_z, self.desc.position_iq),
            );

            let new_normal_count = bs.read_compressed_u32(Context::NormalCnt)?;
            let split_point = self.points.get(split_position as usize).copied();
            let mut pred_normal = Vector3::default();
            if resolution > 0 {
                if let Some(point) = split_point {
                    pred_normal =
                        self.normals.get(point.normal as usize).copied().unwrap_or_default();
                }
            }
            for _ in 0..new_normal_count {
                let sign = bs.read_compressed_u8(Context::DiffNormalSign)?;
                let x = bs.read_compressed_u32(Context::DiffNormalX)?;
                let y = bs.read_compressed_u32(Context::DiffNormalY)?;
                let z = bs.read_compressed_u32(Context::DiffNormalZ)?;
                self.normals.push(
                    pred_normal + Vector3::dequantize(sign, x, y, z, self.desc.normal_iq),
                );
            }

            let new_point_count = bs.read_compressed_u32(Context::PointCnt)?;
            let mut pred_diffuse = Color4::default();
            let mut pred_specular = Color4::default();
            let mut pred_texcoord = [TexCoord4::default(); 8];
            if resolution > 0 {
                if let Some(point) = split_point {
                    pred_diffuse =
                        self.diffuse_colors.get(point.diffuse as usize).copied().unwrap_or_default();
                    pred_specular = self
                        .specular_colors
                        .get(point.specular as usize)
                        .copied()
                        .unwrap_or_default();
                    let layers = self.shading(point.shading_id)?.texlayer_count.min(8) as usize;
                    for (i, pred) in pred_texcoord.iter_mut().enumerate().take(layers) {
                        *pred = self
                            .texcoords
                            .get(point.texcoord[i] as usize)
                            .copied()
                            .unwrap_or_default();
                    }
                }
            }

            for _ in 0..new_point_count {
                let mut point = Point {
                    shading_id: bs.read_compressed_u32(Context::Shading)?,
                    position: (self.positions.len() - 1) as u32,
                    ..Default::default()
                };
                point.normal = (self.normals.len() as u32)
                    .wrapping_sub(new_normal_count)
                    .wrapping_add(bs.read_compressed_u32(Context::NormalIdx)?);
                let shading = self.shading(point.shading_id)?.clone();
                if shading.attributes.contains(ShadingAttributes::DIFFUSE) {
                    let dup_flag = bs.read_compressed_u8(Context::DiffDup)?;
                    if dup_flag & DUP_REUSE == 0 {
                        let sign = bs.read_compressed_u8(Context::DiffuseColorSign)?;
                        let r = bs.read_compressed_u32(Context::ColorDiffR)?;
                        let g = bs.read_compressed_u32(Context::ColorDiffG)?;
                        let b = bs.read_compressed_u32(Context::ColorDiffB)?;
                        let a = bs.read_compressed_u32(Context::ColorDiffA)?;
                        point.diffuse = self.diffuse_colors.len() as u32;
                        self.diffuse_colors.push(
                            pred_diffuse
                                + Color4::dequantize(sign, r, g, b, a, self.desc.diffuse_iq),
                        );
                    } else {
                        point.diffuse = self.last.diffuse;
                    }
                    self.last.diffuse = point.diffuse;
                }
                if shading.attributes.contains(ShadingAttributes::SPECULAR) {
                    let dup_flag = bs.read_compressed_u8(Context::SpecDup)?;
                    if dup_flag & DUP_REUSE == 0 {
                        let sign = bs.read_compressed_u8(Context::SpecularColorSign)?;
                        let r = bs.read_compressed_u32(Context::ColorDiffR)?;
                        let g = bs.read_compressed_u32(Context::ColorDiffG)?;
                        let b = bs.read_compressed_u32(Context::ColorDiffB)?;
                        let a = bs.read_compressed_u32(Context::ColorDiffA)?;
                        point.specular = self.specular_colors.len() as u32;
                        self.specular_colors.push(
                            pred_specular
                                + Color4::dequantize(sign, r, g, b, a, self.desc.specular_iq),
                        );
                    } else {
                        point.specular = self.last.specular;
                    }
                    self.last.specular = point.specular;
                }
                for j in 0..shading.texlayer_count.min(8) as usize {
                    let dup_flag = bs.read_compressed_u8(Context::TexCDup)?;
                    if dup_flag & DUP_REUSE == 0 {
                        let sign = bs.read_compressed_u8(Context::TexCoordSign)?;
                        let u = bs.read_compressed_u32(Context::TexCDiffU)?;
                        let v = bs.read_compressed_u32(Context::TexCDiffV)?;
                        let s = bs.read_compressed_u32(Context::TexCDiffS)?;
                        let t = bs.read_compressed_u32(Context::TexCDiffT)?;
                        point.texcoord[j] = self.texcoords.len() as u32;
                        self.texcoords.push(
                            pred_texcoord[j]
                                + TexCoord4::dequantize(sign, u, v, s, t, self.desc.texcoord_iq),
                        );
                    } else {
                        point.texcoord[j] = self.last.texcoord[j];
                    }
                    self.last.texcoord[j] = point.texcoord[j];
                }
                self.points.push(point);
            }
        }
        self.cur_res = end;
        Ok(())
    }

    /// Interleaves the point set into per-shading-id vertex buffers.
    pub fn geometry(&self) -> GeometryBuffers {
        let elements = interleave(
            &self.desc,
            self.points.iter().map(|p| (p.shading_id, Terminal::from(*p))),
            &self.positions,
            &self.normals,
            &self.diffuse_colors,
            &self.specular_colors,
            &self.texcoords,
        );
        GeometryBuffers { kind: PrimitiveKind::Points, elements }
    }
}

impl From<Point> for Terminal {
    fn from(p: Point) -> Terminal {
        Terminal {
            position: p.position,
            normal: p.normal,
            diffuse: p.diffuse,
            specular: p.specular,
            texcoord: p.texcoord,
        }
    }
}

/// A progressive line-set generator.
pub struct LineSet {
    desc: ObjectDesc,
    positions: Vec<Vector3>,
    normals: Vec<Vector3>,
    diffuse_colors: Vec<Color4>,
    specular_colors: Vec<Color4>,
    texcoords: Vec<TexCoord4>,
    lines: Vec<Line>,
    indexer: LineIndexer,
    cur_res: u32,
    last: LastSeen,
}

impl LineSet {
    pub fn new(desc: ObjectDesc) -> Self {
        LineSet {
            desc,
            positions: Vec::new(),
            normals: Vec::new(),
            diffuse_colors: Vec::new(),
            specular_colors: Vec::new(),
            texcoords: Vec::new(),
            lines: Vec::new(),
            indexer: LineIndexer::default(),
            cur_res: 0,
            last: LastSeen::default(),
        }
    }

    pub fn read(bs: &mut Bitstream) -> Result<LineSet> {
        Ok(LineSet::new(ObjectDesc::read(bs, false)?))
    }

    pub fn desc(&self) -> &ObjectDesc {
        &self.desc
    }

    pub fn positions(&self) -> &[Vector3] {
        &self.positions
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    fn shading(&self, shading_id: u32) -> Result<&ShadingDesc> {
        match self.desc.shading(shading_id) {
            Some(s) => Ok(s),
            None => decode_error("u3d: line references an undeclared shading id"),
        }
    }

    /// Applies one line-set continuation block.
    pub fn update_resolution(&mut self, bs: &mut Bitstream) -> Result<()> {
        // Chain index is always zero.
        bs.read_u32()?;
        let start = bs.read_u32()?;
        let end = bs.read_u32()?;

        if self.cur_res != start {
            return decode_error("u3d: resolution update out of order");
        }

        for resolution in start..end {
            let split_position;
            let mut new_position = Vector3::default();
            if resolution == 0 {
                split_position = bs.read_compressed_u32(Context::Zero)?;
            } else {
                split_position = bs.read_static_u32(resolution)?;
                new_position =
                    self.positions.get(split_position as usize).copied().unwrap_or_default();
            }
            let split_lines = self.indexer.list_lines(split_position);

            let pos_sign = bs.read_compressed_u8(Context::PosDiffSign)?;
            let pos_x = bs.read_compressed_u32(Context::PosDiffX)?;
            let pos_y = bs.read_compressed_u32(Context::PosDiffY)?;
            let pos_z = bs.read_compressed_u32(Context::PosDiffZ)?;
            new_position +=
                Vector3::dequantize(pos_sign, pos_x, pos_y, pos_z, self.desc.position_iq);
            self.positions.push(new_position);
            self.indexer.add_position();

            let new_normal_count = bs.read_compressed_u32(Context::NormalCnt)?;
            let mut pred_normal = Vector3::default();
            for &li in &split_lines {
                let terminal = self.lines[li as usize].terminal_at(split_position);
                pred_normal +=
                    self.normals.get(terminal.normal as usize).copied().unwrap_or_default();
            }
            if !split_lines.is_empty() {
                pred_normal = pred_normal.normalized();
            }
            for _ in 0..new_normal_count {
                let sign = bs.read_compressed_u8(Context::DiffNormalSign)?;
                let x = bs.read_compressed_u32(Context::DiffNormalX)?;
                let y = bs.read_compressed_u32(Context::DiffNormalY)?;
                let z = bs.read_compressed_u32(Context::DiffNormalZ)?;
                self.normals.push(
                    pred_normal + Vector3::dequantize(sign, x, y, z, self.desc.normal_iq),
                );
            }

            let new_line_count = bs.read_compressed_u32(Context::LineCnt)?;
            for _ in 0..new_line_count {
                let mut line = Line {
                    shading_id: bs.read_compressed_u32(Context::Shading)?,
                    ..Default::default()
                };
                line.terminals[0].position =
                    bs.read_static_u32((self.positions.len() - 1) as u32)?;
                line.terminals[1].position = (self.positions.len() - 1) as u32;

                // Each terminal's attributes are predicted as the average of the attributes of
                // the terminals already incident to the split position.
                let mut pred_diffuse = Color4::default();
                let mut pred_specular = Color4::default();
                let mut pred_texcoord = [TexCoord4::default(); 8];
                for &li in &split_lines {
                    let split_line = self.lines[li as usize];
                    let terminal = split_line.terminal_at(split_position);
                    pred_diffuse += self
                        .diffuse_colors
                        .get(terminal.diffuse as usize)
                        .copied()
                        .unwrap_or_default();
                    pred_specular += self
                        .specular_colors
                        .get(terminal.specular as usize)
                        .copied()
                        .unwrap_or_default();
                    let layers = self.shading(split_line.shading_id)?.texlayer_count.min(8);
                    for k in 0..layers as usize {
                        pred_texcoord[k] += self
                            .texcoords
                            .get(terminal.texcoord[k] as usize)
                            .copied()
                            .unwrap_or_default();
                    }
                }
                if !split_lines.is_empty() {
                    pred_diffuse /= split_lines.len() as f32;
                    pred_specular /= split_lines.len() as f32;
                    for pred in pred_texcoord.iter_mut() {
                        *pred /= split_lines.len() as f32;
                    }
                }

                let shading = self.shading(line.shading_id)?.clone();
                for j in 0..2 {
                    line.terminals[j].normal = (self.normals.len() as u32)
                        .wrapping_sub(new_normal_count)
                        .wrapping_add(bs.read_compressed_u32(Context::NormalIdx)?);
                    if shading.attributes.contains(ShadingAttributes::DIFFUSE) {
                        let dup_flag = bs.read_compressed_u8(Context::DiffDup)?;
                        if dup_flag & DUP_REUSE == 0 {
                            let sign = bs.read_compressed_u8(Context::DiffuseColorSign)?;
                            let r = bs.read_compressed_u32(Context::ColorDiffR)?;
                            let g = bs.read_compressed_u32(Context::ColorDiffG)?;
                            let b = bs.read_compressed_u32(Context::ColorDiffB)?;
                            let a = bs.read_compressed_u32(Context::ColorDiffA)?;
                            line.terminals[j].diffuse = self.diffuse_colors.len() as u32;
                            self.diffuse_colors.push(
                                pred_diffuse
                                    + Color4::dequantize(sign, r, g, b, a, self.desc.diffuse_iq),
                            );
                        } else {
                            line.terminals[j].diffuse = self.last.diffuse;
                        }
                        self.last.diffuse = line.terminals[j].diffuse;
                    }
                    if shading.attributes.contains(ShadingAttributes::SPECULAR) {
                        let dup_flag = bs.read_compressed_u8(Context::SpecDup)?;
                        if dup_flag & DUP_REUSE == 0 {
                            let sign = bs.read_compressed_u8(Context::SpecularColorSign)?;
                            let r = bs.read_compressed_u32(Context::ColorDiffR)?;
                            let g = bs.read_compressed_u32(Context::ColorDiffG)?;
                            let b = bs.read_compressed_u32(Context::ColorDiffB)?;
                            let a = bs.read_compressed_u32(Context::ColorDiffA)?;
                            line.terminals[j].specular = self.specular_colors.len() as u32;
                            self.specular_colors.push(
                                pred_specular
                                    + Color4::dequantize(sign, r, g, b, a, self.desc.specular_iq),
                            );
                        } else {
                            line.terminals[j].specular = self.last.specular;
                        }
                        self.last.specular = line.terminals[j].specular;
                    }
                    for k in 0..shading.texlayer_count.min(8) as usize {
                        let dup_flag = bs.read_compressed_u8(Context::TexCDup)?;
                        if dup_flag & DUP_REUSE == 0 {
                            let sign = bs.read_compressed_u8(Context::TexCoordSign)?;
                            let u = bs.read_compressed_u32(Context::TexCDiffU)?;
                            let v = bs.read_compressed_u32(Context::TexCDiffV)?;
                            let s = bs.read_compressed_u32(Context::TexCDiffS)?;
                            let t = bs.read_compressed_u32(Context::TexCDiffT)?;
                            line.terminals[j].texcoord[k] = self.texcoords.len() as u32;
                            self.texcoords.push(
                                pred_texcoord[k]
                                    + TexCoord4::dequantize(
                                        sign,
                                        u,
                                        v,
                                        s,
                                        t,
                                        self.desc.texcoord_iq,
                                    ),
                            );
                        } else {
                            line.terminals[j].texcoord[k] = self.last.texcoord[k];
                        }
                        self.last.texcoord[k] = line.terminals[j].texcoord[k];
                    }
                }
                self.lines.push(line);
                self.indexer
                    .set_line((self.positions.len() - 1) as u32, (self.lines.len() - 1) as u32);
            }
        }
        self.cur_res = end;
        Ok(())
    }

    /// Interleaves the line set into per-shading-id vertex buffers, two vertices per line.
    pub fn geometry(&self) -> GeometryBuffers {
        let elements = interleave(
            &self.desc,
            self.lines.iter().flat_map(|l| l.terminals.iter().map(move |t| (l.shading_id, *t))),
            &self.positions,
            &self.normals,
            &self.diffuse_colors,
            &self.specular_colors,
            &self.texcoords,
        );
        GeometryBuffers { kind: PrimitiveKind::Lines, elements }
    }
}

/// Builds the per-shading-id interleaved buffers shared by point and line sets: position and
/// normal always, colors and 2-D texture layers as the shading declares.
fn interleave<I>(
    desc: &ObjectDesc,
    vertices: I,
    positions: &[Vector3],
    normals: &[Vector3],
    diffuse_colors: &[Color4],
    specular_colors: &[Color4],
    texcoords: &[TexCoord4],
) -> Vec<GeometryElement>
where
    I: Iterator<Item = (u32, Terminal)> + Clone,
{
    let mut elements = Vec::with_capacity(desc.shading_descs.len());
    for (i, shading) in desc.shading_descs.iter().enumerate() {
        let mut mask = BUFFER_POSITION_MASK | BUFFER_NORMAL_MASK;
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

        let mut data = Vec::new();
        let mut vertex_count = 0usize;
        for (shading_id, t) in vertices.clone() {
            if shading_id as usize != i {
                continue;
            }
            vertex_count += 1;
            let p = positions.get(t.position as usize).copied().unwrap_or_default();
            data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&p)));
            let n = normals.get(t.normal as usize).copied().unwrap_or_default();
            data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&n)));
            if mask & BUFFER_DIFFUSE_MASK != 0 {
                let c = diffuse_colors.get(t.diffuse as usize).copied().unwrap_or_default();
                data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&c)));
            }
            if mask & BUFFER_SPECULAR_MASK != 0 {
                let c = specular_colors.get(t.specular as usize).copied().unwrap_or_default();
                data.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&c)));
            }
            for l in 0..8 {
                if mask & (BUFFER_TEXCOORD0_MASK << (2 * l)) != 0 {
                    let tc = texcoords.get(t.texcoord[l] as usize).copied().unwrap_or_default();
                    data.extend_from_slice(&[tc.u, tc.v]);
                }
            }
        }

        elements.push(GeometryElement { attr_mask: mask, vertex_count, data });
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenc::Encoder;
    use scena_core::math::Vector3;

    fn test_desc() -> ObjectDesc {
        ObjectDesc {
            position_count: 4,
            normal_count: 4,
            shading_descs: vec![Default::default()],
            position_iq: 1.0,
            normal_iq: 1.0,
            texcoord_iq: 1.0,
            diffuse_iq: 1.0,
            specular_iq: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn verify_point_set_update() {
        let mut enc = Encoder::new();
        enc.write_u32(0); // chain index
        enc.write_u32(0); // start
        enc.write_u32(2); // end
        // Resolution 0: split via the zero context, position (1, 2, 3), one normal, one point.
        enc.write_compressed_u32(Context::Zero, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 1);
        enc.write_compressed_u32(Context::PosDiffY, 2);
        enc.write_compressed_u32(Context::PosDiffZ, 3);
        enc.write_compressed_u32(Context::NormalCnt, 1);
        enc.write_compressed_u8(Context::DiffNormalSign, 0);
        enc.write_compressed_u32(Context::DiffNormalX, 1);
        enc.write_compressed_u32(Context::DiffNormalY, 0);
        enc.write_compressed_u32(Context::DiffNormalZ, 0);
        enc.write_compressed_u32(Context::PointCnt, 1);
        enc.write_compressed_u32(Context::Shading, 0);
        enc.write_compressed_u32(Context::NormalIdx, 0);
        // Resolution 1: split vertex 0, delta (0, 0, 2), no new normals, one point.
        enc.write_static_u32(1, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 0);
        enc.write_compressed_u32(Context::PosDiffY, 0);
        enc.write_compressed_u32(Context::PosDiffZ, 2);
        enc.write_compressed_u32(Context::NormalCnt, 0);
        enc.write_compressed_u32(Context::PointCnt, 1);
        enc.write_compressed_u32(Context::Shading, 0);
        enc.write_compressed_u32(Context::NormalIdx, 0);

        let mut set = PointSet::new(test_desc());
        set.update_resolution(&mut enc.finish()).unwrap();

        assert_eq!(set.positions().len(), 2);
        assert_eq!(set.positions()[0], Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(set.positions()[1], Vector3::new(1.0, 2.0, 5.0));
        assert_eq!(set.points().len(), 2);
        assert_eq!(set.points()[0].position, 0);
        assert_eq!(set.points()[1].position, 1);
        // The second point's normal is predicted from the first point's and offset from the
        // end of the normal array.
        assert_eq!(set.points()[1].normal, 1);
    }

    #[test]
    fn verify_line_set_update() {
        let mut enc = Encoder::new();
        enc.write_u32(0); // chain index
        enc.write_u32(0); // start
        enc.write_u32(2); // end
        // Resolution 0: first position, one normal, no lines yet.
        enc.write_compressed_u32(Context::Zero, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 1);
        enc.write_compressed_u32(Context::PosDiffY, 0);
        enc.write_compressed_u32(Context::PosDiffZ, 0);
        enc.write_compressed_u32(Context::NormalCnt, 1);
        enc.write_compressed_u8(Context::DiffNormalSign, 0);
        enc.write_compressed_u32(Context::DiffNormalX, 0);
        enc.write_compressed_u32(Context::DiffNormalY, 1);
        enc.write_compressed_u32(Context::DiffNormalZ, 0);
        enc.write_compressed_u32(Context::LineCnt, 0);
        // Resolution 1: second position, one normal, one line connecting position 0 to it.
        enc.write_static_u32(1, 0);
        enc.write_compressed_u8(Context::PosDiffSign, 0);
        enc.write_compressed_u32(Context::PosDiffX, 0);
        enc.write_compressed_u32(Context::PosDiffY, 3);
        enc.write_compressed_u32(Context::PosDiffZ, 0);
        enc.write_compressed_u32(Context::NormalCnt, 1);
        enc.write_compressed_u8(Context::DiffNormalSign, 0);
        enc.write_compressed_u32(Context::DiffNormalX, 0);
        enc.write_compressed_u32(Context::DiffNormalY, 0);
        enc.write_compressed_u32(Context::DiffNormalZ, 1);
        enc.write_compressed_u32(Context::LineCnt, 1);
        enc.write_compressed_u32(Context::Shading, 0);
        enc.write_static_u32(1, 0); // start terminal position
        enc.write_compressed_u32(Context::NormalIdx, 0); // terminal 0 normal
        enc.write_compressed_u32(Context::NormalIdx, 0); // terminal 1 normal
        let mut set = LineSet::new(test_desc());
        set.update_resolution(&mut enc.finish()).unwrap();

        assert_eq!(set.positions().len(), 2);
        assert_eq!(set.positions()[0], Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(set.positions()[1], Vector3::new(1.0, 3.0, 0.0));
        assert_eq!(set.lines().len(), 1);
        assert_eq!(set.lines()[0].terminals[0].position, 0);
        assert_eq!(set.lines()[0].terminals[1].position, 1);
        assert_eq!(set.lines()[0].terminals[0].normal, 1);

        let geometry = set.geometry();
        assert_eq!(geometry.kind, PrimitiveKind::Lines);
        assert_eq!(geometry.elements[0].vertex_count, 2);
        assert_eq!(geometry.elements[0].stride(), 6);
    }
}
