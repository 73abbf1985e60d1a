// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `reader` module drives the block parse loop and owns the name-indexed entity registries.
//!
//! Declaration blocks create entities; continuation blocks mutate exactly one already-declared
//! entity, identified by name. Each registry is seeded with a nameless default entity, so lookups
//! against the empty name always succeed. Recoverable format violations (unknown blocks,
//! out-of-order continuations, unimplemented modifiers) are logged with the framer's byte offset
//! and skipped per the container's error policy; I/O failures and unsupported required features
//! surface as errors.

use std::collections::BTreeMap;
use std::io::Write;

use log::{debug, error, info, warn};
use scena_core::errors::{decode_error, Result};
use scena_core::io::MediaSourceStream;
use scena_core::math::Matrix4;

use crate::assembly::{
    GeometryBuffers, LightParams, MaterialParams, ModelParams, RenderDescriptor, SceneDescriptor,
    ShaderSpec, ViewParams,
};
use crate::bitstream::Bitstream;
use crate::block::{self, BlockReader, SubBlock};
use crate::mesh::ClodMesh;
use crate::plset::{LineSet, PointSet};
use crate::scene::{
    LightResource, LitTextureShader, Material, Node, NodeKind, Shading, ViewResource,
};
use crate::texture::Texture;

/// A model resource: the decoded geometry generator a model node instances by name.
pub enum ModelResource {
    Mesh(ClodMesh),
    Points(PointSet),
    Lines(LineSet),
}

impl Default for ModelResource {
    fn default() -> Self {
        ModelResource::Mesh(ClodMesh::default())
    }
}

impl ModelResource {
    pub fn geometry(&self) -> GeometryBuffers {
        match self {
            ModelResource::Mesh(mesh) => mesh.geometry(),
            ModelResource::Points(points) => points.geometry(),
            ModelResource::Lines(lines) => lines.geometry(),
        }
    }
}

/// A model resource together with an optional shading modifier from its modifier chain.
#[derive(Default)]
pub struct ModelResourceEntry {
    pub resource: ModelResource,
    pub shading: Option<Shading>,
}

/// Maximum depth of the parent-edge walk. Parent references are names, so a malformed file can
/// introduce cycles; the walk refuses to recurse past this depth.
const MAX_PARENT_DEPTH: u32 = 256;

/// Parses a U3D file into name-indexed registries of scene entities and hands out rendering
/// descriptors.
pub struct U3dReader {
    nodes: BTreeMap<String, Node>,
    models: BTreeMap<String, ModelResourceEntry>,
    lights: BTreeMap<String, LightResource>,
    views: BTreeMap<String, ViewResource>,
    textures: BTreeMap<String, Texture>,
    shaders: BTreeMap<String, LitTextureShader>,
    materials: BTreeMap<String, Material>,
}

impl Default for U3dReader {
    fn default() -> Self {
        let mut reader = U3dReader {
            nodes: BTreeMap::new(),
            models: BTreeMap::new(),
            lights: BTreeMap::new(),
            views: BTreeMap::new(),
            textures: BTreeMap::new(),
            shaders: BTreeMap::new(),
            materials: BTreeMap::new(),
        };
        reader.nodes.insert(String::new(), Node::default());
        reader.models.insert(String::new(), ModelResourceEntry::default());
        reader.lights.insert(String::new(), LightResource::default());
        reader.views.insert(String::new(), ViewResource::default());
        reader.textures.insert(String::new(), Texture::default());
        reader.shaders.insert(String::new(), LitTextureShader::default());
        reader.materials.insert(String::new(), Material::default());
        reader
    }
}

impl U3dReader {
    /// Parses the whole stream. Returns once every block has been consumed or a terminal block
    /// was encountered.
    pub fn try_new(mss: MediaSourceStream) -> Result<U3dReader> {
        let mut reader = BlockReader::new(mss);
        let mut u3d = U3dReader::default();

        while let Some(mut blk) = reader.next_block()? {
            let bs = &mut blk.data;
            match blk.block_type {
                block::FILE_HEADER => read_header_block(bs)?,
                block::MODIFIER_CHAIN => u3d.read_modifier_chain(bs)?,
                block::PRIORITY_UPDATE => {
                    bs.read_u32()?;
                }
                block::NEW_OBJECT_TYPE => {
                    error!(
                        "u3d: new-object-type block at offset {} is not supported, stopping",
                        blk.offset
                    );
                    break;
                }
                block::LIGHT_RESOURCE => {
                    let name = bs.read_string()?;
                    debug!("u3d: light resource \"{}\"", name);
                    let light = LightResource::read(bs)?;
                    u3d.lights.insert(name, light);
                }
                block::VIEW_RESOURCE => {
                    let name = bs.read_string()?;
                    debug!("u3d: view resource \"{}\"", name);
                    let view = ViewResource::read(bs)?;
                    u3d.views.insert(name, view);
                }
                block::LIT_TEXTURE_SHADER => {
                    let name = bs.read_string()?;
                    debug!("u3d: lit texture shader \"{}\"", name);
                    let shader = LitTextureShader::read(bs)?;
                    u3d.shaders.insert(name, shader);
                }
                block::MATERIAL_RESOURCE => {
                    let name = bs.read_string()?;
                    debug!("u3d: material \"{}\"", name);
                    let material = Material::read(bs)?;
                    u3d.materials.insert(name, material);
                }
                block::TEXTURE_DECLARATION => {
                    let name = bs.read_string()?;
                    debug!("u3d: texture resource \"{}\"", name);
                    let texture = Texture::read(bs)?;
                    u3d.textures.insert(name, texture);
                }
                // Recognized but carries nothing the decoder materializes.
                block::MOTION_DECLARATION => {}
                block::TEXTURE_CONTINUATION => {
                    let name = bs.read_string()?;
                    debug!("u3d: texture continuation \"{}\"", name);
                    match u3d.textures.get_mut(&name) {
                        Some(texture) => texture.load_continuation(bs)?,
                        None => {
                            warn!("u3d: texture continuation \"{}\" is not declared", name)
                        }
                    }
                }
                block::BASE_MESH_CONTINUATION => {
                    u3d.mesh_continuation(bs, blk.offset, "base mesh", ClodMesh::create_base_mesh)
                }
                block::PROGRESSIVE_MESH_CONTINUATION => u3d.mesh_continuation(
                    bs,
                    blk.offset,
                    "progressive mesh",
                    ClodMesh::update_resolution,
                ),
                block::POINT_SET_CONTINUATION => {
                    u3d.point_set_continuation(bs, blk.offset);
                }
                block::LINE_SET_CONTINUATION => {
                    u3d.line_set_continuation(bs, blk.offset);
                }
                t if (block::USER_EXTENSION_FIRST..=block::USER_EXTENSION_LAST).contains(&t) => {
                    error!(
                        "u3d: new-object block 0x{:08X} at offset {} is not supported, stopping",
                        t, blk.offset
                    );
                    break;
                }
                t => {
                    error!("u3d: unknown block type 0x{:08X} at offset {}, stopping", t, blk.offset);
                    break;
                }
            }
        }

        Ok(u3d)
    }

    /// Applies a mesh continuation, downgrading decode failures to logged skips: the entity is
    /// left at its prior (or partial) state and the stream continues.
    fn mesh_continuation(
        &mut self,
        bs: &mut Bitstream,
        offset: u64,
        what: &str,
        apply: fn(&mut ClodMesh, &mut Bitstream) -> Result<()>,
    ) {
        let name = match bs.read_string() {
            Ok(name) => name,
            Err(_) => {
                warn!("u3d: unreadable {} continuation at offset {}", what, offset);
                return;
            }
        };
        debug!("u3d: {} continuation \"{}\"", what, name);
        match self.models.get_mut(&name) {
            Some(ModelResourceEntry { resource: ModelResource::Mesh(mesh), .. }) => {
                if let Err(err) = apply(mesh, bs) {
                    warn!(
                        "u3d: {} continuation \"{}\" at offset {} skipped: {}",
                        what, name, offset, err
                    );
                }
            }
            Some(_) => {
                warn!("u3d: {} continuation \"{}\" does not target a mesh", what, name)
            }
            None => warn!("u3d: {} continuation \"{}\" is not declared", what, name),
        }
    }

    fn point_set_continuation(&mut self, bs: &mut Bitstream, offset: u64) {
        let name = match bs.read_string() {
            Ok(name) => name,
            Err(_) => return,
        };
        debug!("u3d: point set continuation \"{}\"", name);
        match self.models.get_mut(&name) {
            Some(ModelResourceEntry { resource: ModelResource::Points(set), .. }) => {
                if let Err(err) = set.update_resolution(bs) {
                    warn!(
                        "u3d: point set continuation \"{}\" at offset {} skipped: {}",
                        name, offset, err
                    );
                }
            }
            _ => warn!("u3d: point set continuation \"{}\" does not target a point set", name),
        }
    }

    fn line_set_continuation(&mut self, bs: &mut Bitstream, offset: u64) {
        let name = match bs.read_string() {
            Ok(name) => name,
            Err(_) => return,
        };
        debug!("u3d: line set continuation \"{}\"", name);
        match self.models.get_mut(&name) {
            Some(ModelResourceEntry { resource: ModelResource::Lines(set), .. }) => {
                if let Err(err) = set.update_resolution(bs) {
                    warn!(
                        "u3d: line set continuation \"{}\" at offset {} skipped: {}",
                        name, offset, err
                    );
                }
            }
            _ => warn!("u3d: line set continuation \"{}\" does not target a line set", name),
        }
    }

    fn read_modifier_chain(&mut self, bs: &mut Bitstream) -> Result<()> {
        let name = bs.read_string()?;
        let chain_type = bs.read_u32()?;
        debug!("u3d: modifier chain \"{}\" of type {}", name, chain_type);
        match chain_type {
            0 => {
                if let Some(node) = read_node_chain(bs)? {
                    self.nodes.insert(name, node);
                }
            }
            1 => {
                if let Some(entry) = read_model_chain(bs)? {
                    self.models.insert(name, entry);
                }
            }
            2 => {
                if let Some(texture) = read_texture_chain(bs)? {
                    self.textures.insert(name, texture);
                }
            }
            t => warn!("u3d: unknown modifier chain type {} for \"{}\"", t, name),
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn model(&self, name: &str) -> Option<&ModelResourceEntry> {
        self.models.get(name)
    }

    pub fn light_resource(&self, name: &str) -> Option<&LightResource> {
        self.lights.get(name)
    }

    /// Looks up a node and returns it only if it is a view.
    pub fn view(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name).filter(|n| matches!(n.kind, NodeKind::View(_)))
    }

    /// The first view node in name order, if any.
    pub fn first_view(&self) -> Option<(&str, &Node)> {
        self.nodes
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::View(_)))
            .map(|(name, node)| (name.as_str(), node))
    }

    /// Walks parent edges depth-first from `node` towards `root`, left-multiplying parent
    /// transforms. Returns `None` when the root is unreachable.
    pub fn world_transform(&self, node: &str, root: &str) -> Option<Matrix4> {
        self.world_transform_guarded(node, root, 0)
    }

    fn world_transform_guarded(&self, node: &str, root: &str, depth: u32) -> Option<Matrix4> {
        if node == root {
            return Some(Matrix4::IDENTITY);
        }
        if depth >= MAX_PARENT_DEPTH {
            warn!("u3d: parent chain of \"{}\" exceeds the depth limit", node);
            return None;
        }
        let n = self.nodes.get(node)?;
        for parent in &n.parents {
            if let Some(mat) = self.world_transform_guarded(&parent.name, root, depth + 1) {
                return Some(mat * parent.transform);
            }
        }
        None
    }

    /// Prints the node tree, one line per node, children indented under their parents.
    pub fn dump_tree(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut tree: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, node) in &self.nodes {
            for parent in &node.parents {
                tree.entry(parent.name.as_str()).or_default().push(name.as_str());
            }
        }
        self.dump_tree_recursive(out, &tree, "", 0)
    }

    fn dump_tree_recursive(
        &self,
        out: &mut dyn Write,
        tree: &BTreeMap<&str, Vec<&str>>,
        name: &str,
        depth: usize,
    ) -> std::io::Result<()> {
        write!(out, "{:indent$}", "", indent = depth)?;
        match self.nodes.get(name).map(|n| &n.kind) {
            Some(NodeKind::Light(light)) => {
                writeln!(out, "Light <{}> => <{}>", name, light.resource_name)?
            }
            Some(NodeKind::Model(model)) => {
                writeln!(out, "Model <{}> => <{}>", name, model.resource_name)?
            }
            Some(NodeKind::View(view)) => {
                let root = self
                    .views
                    .get(&view.resource_name)
                    .and_then(|rsc| rsc.passes.first())
                    .map(|pass| pass.root_node_name.as_str())
                    .unwrap_or("");
                writeln!(out, "View <{}> => <{}>", name, root)?
            }
            _ => writeln!(out, "Group <{}>", name)?,
        }
        if let Some(children) = tree.get(name) {
            for child in children {
                self.dump_tree_recursive(out, tree, child, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Materializes everything the renderer needs up front: shader groups with their material
    /// parameters, texture payloads, and interleaved geometry per model resource.
    pub fn render_descriptor(&self) -> RenderDescriptor {
        let mut descriptor = RenderDescriptor::default();

        for (name, shader) in &self.shaders {
            let material =
                self.materials.get(&shader.material_name).cloned().unwrap_or_default();
            let mut texture_names: [String; 8] = Default::default();
            for (i, info) in shader.texinfos.iter().enumerate() {
                if shader.shader_channels & (1 << i) != 0 {
                    texture_names[i] = info.name.clone();
                }
            }
            descriptor.shader_groups.insert(
                name.clone(),
                ShaderSpec {
                    material: MaterialParams {
                        ambient: material.ambient,
                        diffuse: material.diffuse,
                        specular: material.specular,
                        emissive: material.emissive,
                        reflectivity: material.reflectivity,
                        opacity: material.opacity,
                    },
                    channels: shader.shader_channels,
                    texture_names,
                },
            );
        }

        for (name, texture) in &self.textures {
            descriptor.textures.insert(name.clone(), texture.image());
        }

        for (name, entry) in &self.models {
            descriptor.render_groups.insert(name.clone(), entry.resource.geometry());
        }

        descriptor
    }

    /// Builds the scene descriptor for one view node and render pass: the world-space view
    /// parameters, every light node, and every model node reachable from the pass's root.
    pub fn scene_descriptor(&self, view_name: &str, pass_index: usize) -> Result<SceneDescriptor> {
        let view_node = match self.view(view_name) {
            Some(node) => node,
            None => return decode_error("u3d: no view node"),
        };
        let view = match &view_node.kind {
            NodeKind::View(view) => view,
            _ => unreachable!(),
        };

        let rsc = self.views.get(&view.resource_name).cloned().unwrap_or_default();
        let pass = match rsc.passes.get(pass_index) {
            Some(pass) => pass,
            None => return decode_error("u3d: view resource pass index out of range"),
        };

        debug!("u3d: assembling pass rooted at \"{}\"", pass.root_node_name);
        let root_transform = match self.world_transform(&pass.root_node_name, "") {
            Some(mat) => mat,
            None => return decode_error("u3d: root node does not belong to the world"),
        };
        let view_transform = match self.world_transform(view_name, "") {
            Some(mat) => mat,
            None => return decode_error("u3d: view node does not belong to the world"),
        };

        let mut scene = SceneDescriptor {
            view: ViewParams::new(view, pass, view_transform)?,
            lights: Vec::new(),
            models: Vec::new(),
        };

        for (name, node) in &self.nodes {
            match &node.kind {
                NodeKind::Light(light) if !light.resource_name.is_empty() => {
                    if let Some(transform) = self.world_transform(name, "") {
                        info!("u3d: light node \"{}\" found", name);
                        let rsc =
                            self.lights.get(&light.resource_name).cloned().unwrap_or_default();
                        scene.lights.push(LightParams::new(&rsc, &transform));
                    }
                }
                NodeKind::Model(model) if !model.resource_name.is_empty() => {
                    if let Some(transform) = self.world_transform(name, &pass.root_node_name) {
                        info!("u3d: model node \"{}\" found", name);
                        // Shading names resolve from the node's modifier first, the resource's
                        // second.
                        let shader_names = model
                            .shading
                            .as_ref()
                            .or_else(|| {
                                self.models
                                    .get(&model.resource_name)
                                    .and_then(|entry| entry.shading.as_ref())
                            })
                            .map(|shading| shading.shader_names.clone())
                            .unwrap_or_default();
                        scene.models.push(ModelParams {
                            resource_name: model.resource_name.clone(),
                            model_matrix: root_transform * transform,
                            shader_names,
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(scene)
    }
}

/// Reads the file header block.
fn read_header_block(bs: &mut Bitstream) -> Result<()> {
    let major_version = bs.read_u16()?;
    let minor_version = bs.read_u16()?;
    let profile_identifier = bs.read_u32()?;
    let declaration_size = bs.read_u32()?;
    let file_size = bs.read_u64()?;
    let character_encoding = bs.read_u32()?;
    let units_scaling_factor =
        if profile_identifier & 0x8 != 0 { bs.read_f64()? } else { 1.0 };
    debug!(
        "u3d: header v{}.{}, profile 0x{:X}, declaration size {}, file size {}, encoding {}, \
         scale {}",
        major_version,
        minor_version,
        profile_identifier,
        declaration_size,
        file_size,
        character_encoding,
        units_scaling_factor
    );
    Ok(())
}

/// Reads the modifier-chain preamble (optional bounding volume, padding) and returns the
/// modifier count.
fn read_modifier_count(bs: &mut Bitstream) -> Result<u32> {
    let attributes = bs.read_u32()?;
    if attributes & 0x0000_0001 != 0 {
        // Bounding sphere.
        bs.read_vector3()?;
        bs.read_f32()?;
    } else if attributes & 0x0000_0002 != 0 {
        // Axis-aligned bounding box.
        bs.read_vector3()?;
        bs.read_vector3()?;
    }
    bs.align_to_word();
    bs.read_u32()
}

/// Parses a node modifier chain: node blocks, with an optional shading modifier attaching to a
/// model head.
fn read_node_chain(bs: &mut Bitstream) -> Result<Option<Node>> {
    let mut head: Option<Node> = None;
    let count = read_modifier_count(bs)?;
    for _ in 0..count {
        let sub = SubBlock::read(bs)?;
        let name = bs.read_string()?;
        match sub.block_type {
            block::GROUP_NODE => {
                debug!("u3d: group node \"{}\"", name);
                head = Some(Node::read_group(bs)?);
            }
            block::MODEL_NODE => {
                debug!("u3d: model node \"{}\"", name);
                head = Some(Node::read_model(bs)?);
            }
            block::LIGHT_NODE => {
                debug!("u3d: light node \"{}\"", name);
                head = Some(Node::read_light(bs)?);
            }
            block::VIEW_NODE => {
                debug!("u3d: view node \"{}\"", name);
                head = Some(Node::read_view(bs)?);
            }
            block::SHADING_MODIFIER => {
                debug!("u3d: shading modifier \"{}\"", name);
                let shading = Shading::read(bs)?;
                match head.as_mut().map(|n| &mut n.kind) {
                    Some(NodeKind::Model(model)) => model.shading = Some(shading),
                    _ => warn!("u3d: shading modifier \"{}\" has no model to attach to", name),
                }
            }
            t => {
                warn!("u3d: illegal modifier 0x{:08X} in a node modifier chain", t);
                return Ok(head);
            }
        }
        sub.skip_past(bs);
    }
    Ok(head)
}

/// Parses a model (instance) modifier chain: a generator declaration plus modifiers.
fn read_model_chain(bs: &mut Bitstream) -> Result<Option<ModelResourceEntry>> {
    let mut head: Option<ModelResourceEntry> = None;
    let count = read_modifier_count(bs)?;
    for _ in 0..count {
        let sub = SubBlock::read(bs)?;
        let name = bs.read_string()?;
        match sub.block_type {
            block::CLOD_MESH_DECLARATION => {
                debug!("u3d: CLOD mesh \"{}\"", name);
                head = Some(ModelResourceEntry {
                    resource: ModelResource::Mesh(ClodMesh::read(bs)?),
                    shading: None,
                });
            }
            block::POINT_SET_DECLARATION => {
                debug!("u3d: point set \"{}\"", name);
                head = Some(ModelResourceEntry {
                    resource: ModelResource::Points(PointSet::read(bs)?),
                    shading: None,
                });
            }
            block::LINE_SET_DECLARATION => {
                debug!("u3d: line set \"{}\"", name);
                head = Some(ModelResourceEntry {
                    resource: ModelResource::Lines(LineSet::read(bs)?),
                    shading: None,
                });
            }
            block::SUBDIVISION_MODIFIER
            | block::ANIMATION_MODIFIER
            | block::BONE_WEIGHT_MODIFIER
            | block::CLOD_MODIFIER => {
                warn!(
                    "u3d: modifier type 0x{:08X} (\"{}\") is not implemented, skipping",
                    sub.block_type, name
                );
            }
            block::SHADING_MODIFIER => {
                debug!("u3d: shading modifier \"{}\"", name);
                let shading = Shading::read(bs)?;
                match head.as_mut() {
                    Some(entry) => entry.shading = Some(shading),
                    None => warn!("u3d: shading modifier \"{}\" has no generator", name),
                }
            }
            t => {
                warn!("u3d: illegal modifier 0x{:08X} in an instance modifier chain", t);
                return Ok(head);
            }
        }
        sub.skip_past(bs);
    }
    Ok(head)
}

/// Parses a texture modifier chain.
fn read_texture_chain(bs: &mut Bitstream) -> Result<Option<Texture>> {
    let mut head: Option<Texture> = None;
    let count = read_modifier_count(bs)?;
    for _ in 0..count {
        let sub = SubBlock::read(bs)?;
        let name = bs.read_string()?;
        match sub.block_type {
            block::TEXTURE_DECLARATION => {
                debug!("u3d: texture resource \"{}\"", name);
                head = Some(Texture::read(bs)?);
            }
            t => {
                warn!("u3d: illegal modifier 0x{:08X} in a texture modifier chain", t);
                return Ok(head);
            }
        }
        sub.skip_past(bs);
    }
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Projection;
    use crate::scene::LightType;
    use crate::testenc::{ByteWriter, FileBuilder};
    use std::io::Cursor;

    fn parse(bytes: Vec<u8>) -> U3dReader {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)));
        U3dReader::try_new(mss).unwrap()
    }

    fn header_block() -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.push_u16(0); // major version
        w.push_u16(0); // minor version
        w.push_u32(0); // profile
        w.push_u32(36); // declaration size
        w.push_u64(36); // file size
        w.push_u32(106); // character encoding
        w.into_bytes()
    }

    fn light_resource_block(name: &str) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.push_string(name);
        w.push_u32(1); // attributes: enabled
        w.push_u8(1); // type: directional
        w.push_f32(1.0); // color r
        w.push_f32(1.0); // color g
        w.push_f32(1.0); // color b
        w.push_f32(0.0); // reserved
        w.push_f32(1.0); // constant attenuation
        w.push_f32(0.0); // linear attenuation
        w.push_f32(0.0); // quadratic attenuation
        w.push_f32(180.0); // spot angle
        w.push_f32(1.0); // intensity
        w.into_bytes()
    }

    fn light_node_chain(chain_name: &str, resource: &str) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.push_string(""); // sub-block name
        payload.push_u32(1); // one parent
        payload.push_string(""); // parent: the world
        payload.push_identity_matrix();
        payload.push_string(resource);

        let mut w = ByteWriter::new();
        w.push_string(chain_name);
        w.push_u32(0); // node modifier chain
        w.push_u32(0); // chain attributes
        w.align_to_word();
        w.push_u32(1); // one modifier
        w.push_sub_block(block::LIGHT_NODE, &payload.into_bytes());
        w.into_bytes()
    }

    fn view_node_chain(chain_name: &str) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.push_string(""); // sub-block name
        payload.push_u32(1); // one parent
        payload.push_string(""); // parent: the world
        payload.push_identity_matrix();
        payload.push_string(""); // view resource: the default
        payload.push_u32(0); // attributes: three-point perspective
        payload.push_f32(1.0); // near
        payload.push_f32(1000.0); // far
        payload.push_f32(90.0); // field of view
        payload.push_f32(640.0); // port width
        payload.push_f32(480.0); // port height
        payload.push_f32(0.0); // port x
        payload.push_f32(0.0); // port y
        payload.push_u32(0); // backdrops
        payload.push_u32(0); // overlays

        let mut w = ByteWriter::new();
        w.push_string(chain_name);
        w.push_u32(0); // node modifier chain
        w.push_u32(0); // chain attributes
        w.align_to_word();
        w.push_u32(1); // one modifier
        w.push_sub_block(block::VIEW_NODE, &payload.into_bytes());
        w.into_bytes()
    }

    // A header-only file produces empty registries holding only the nameless defaults.
    #[test]
    fn verify_header_only_file() {
        let mut file = FileBuilder::new();
        file.add_block(block::FILE_HEADER, &header_block());
        let u3d = parse(file.into_bytes());

        assert!(u3d.first_view().is_none());
        assert!(u3d.node("").is_some());
        assert!(u3d.light_resource("").is_some());
        assert!(u3d.scene_descriptor("DefaultView", 0).is_err());

        let descriptor = u3d.render_descriptor();
        assert_eq!(descriptor.shader_groups.len(), 1);
        assert_eq!(descriptor.textures.len(), 1);
        assert_eq!(descriptor.render_groups.len(), 1);
    }

    #[test]
    fn verify_light_assembly() {
        let mut file = FileBuilder::new();
        file.add_block(block::FILE_HEADER, &header_block());
        file.add_block(block::LIGHT_RESOURCE, &light_resource_block("L0"));
        file.add_block(block::MODIFIER_CHAIN, &light_node_chain("Lamp", "L0"));

        // Without any view node, assembly reports "no view".
        let u3d = parse(file.bytes().to_vec());
        assert!(u3d.first_view().is_none());
        assert!(u3d.scene_descriptor("DefaultView", 0).is_err());

        // With a view node, the scene holds one directional light.
        file.add_block(block::MODIFIER_CHAIN, &view_node_chain("DefaultView"));
        let u3d = parse(file.into_bytes());
        assert!(u3d.view("DefaultView").is_some());

        let light = u3d.light_resource("L0").unwrap();
        assert_eq!(light.light_type, LightType::Directional);
        assert_eq!(light.intensity, 1.0);

        let scene = u3d.scene_descriptor("DefaultView", 0).unwrap();
        assert_eq!(scene.lights.len(), 1);
        assert_eq!(scene.lights[0].light_type, LightType::Directional);
        assert_eq!(scene.models.len(), 0);
        match scene.view.projection {
            Projection::Perspective { fovy } => {
                assert!((fovy - std::f32::consts::FRAC_PI_2).abs() < 1e-4)
            }
            _ => panic!("expected a perspective projection"),
        }

        let mut tree = Vec::new();
        u3d.dump_tree(&mut tree).unwrap();
        let tree = String::from_utf8(tree).unwrap();
        assert!(tree.contains("Light <Lamp> => <L0>"));
        assert!(tree.contains("View <DefaultView>"));
    }

    #[test]
    fn verify_unknown_block_stops_cleanly() {
        let mut file = FileBuilder::new();
        file.add_block(block::FILE_HEADER, &header_block());
        file.add_block(block::LIGHT_RESOURCE, &light_resource_block("L0"));
        file.add_block(0xFFFF_FFEE, &[0u8; 4]);
        // A block after the terminal one is never reached.
        file.add_block(block::LIGHT_RESOURCE, &light_resource_block("L1"));

        let u3d = parse(file.into_bytes());
        assert!(u3d.light_resource("L0").is_some());
        assert!(u3d.light_resource("L1").is_none());
    }

    #[test]
    fn verify_motion_declaration_is_skipped() {
        let mut file = FileBuilder::new();
        file.add_block(block::FILE_HEADER, &header_block());
        file.add_block(block::MOTION_DECLARATION, &[1u8, 2, 3, 4, 5, 6, 7, 8]);
        file.add_block(block::LIGHT_RESOURCE, &light_resource_block("L0"));

        let u3d = parse(file.into_bytes());
        assert!(u3d.light_resource("L0").is_some());
    }

    #[test]
    fn verify_parse_is_deterministic() {
        let mut file = FileBuilder::new();
        file.add_block(block::FILE_HEADER, &header_block());
        file.add_block(block::LIGHT_RESOURCE, &light_resource_block("L0"));
        file.add_block(block::MODIFIER_CHAIN, &light_node_chain("Lamp", "L0"));
        file.add_block(block::MODIFIER_CHAIN, &view_node_chain("DefaultView"));
        let bytes = file.into_bytes();

        let a = parse(bytes.clone());
        let b = parse(bytes);
        let scene_a = a.scene_descriptor("DefaultView", 0).unwrap();
        let scene_b = b.scene_descriptor("DefaultView", 0).unwrap();
        assert_eq!(scene_a.lights.len(), scene_b.lights.len());
        assert_eq!(scene_a.lights[0].position, scene_b.lights[0].position);
        assert_eq!(scene_a.lights[0].direction, scene_b.lights[0].direction);
    }
}
