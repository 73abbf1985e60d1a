// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `block` module implements the byte-level block framer over the container file.
//!
//! A U3D file is a plain sequence of blocks. Each block starts with a 12-byte header of three
//! little-endian u32 values (type, data size, metadata size) followed by the data and metadata
//! sections, each padded to a 32-bit word boundary. The data section of every block is an
//! independent arithmetic-coded stream.

use scena_core::errors::{limit_error, Result, ScenaError};
use scena_core::io::{MediaSourceStream, ReadBytes};

use crate::bitstream::Bitstream;

pub const FILE_HEADER: u32 = 0x0044_3355;

pub const MODIFIER_CHAIN: u32 = 0xFFFF_FF14;
pub const PRIORITY_UPDATE: u32 = 0xFFFF_FF15;
pub const NEW_OBJECT_TYPE: u32 = 0xFFFF_FF16;

pub const GROUP_NODE: u32 = 0xFFFF_FF21;
pub const MODEL_NODE: u32 = 0xFFFF_FF22;
pub const LIGHT_NODE: u32 = 0xFFFF_FF23;
pub const VIEW_NODE: u32 = 0xFFFF_FF24;

pub const CLOD_MESH_DECLARATION: u32 = 0xFFFF_FF31;
pub const POINT_SET_DECLARATION: u32 = 0xFFFF_FF36;
pub const LINE_SET_DECLARATION: u32 = 0xFFFF_FF37;

pub const BASE_MESH_CONTINUATION: u32 = 0xFFFF_FF3B;
pub const PROGRESSIVE_MESH_CONTINUATION: u32 = 0xFFFF_FF3C;
pub const POINT_SET_CONTINUATION: u32 = 0xFFFF_FF3E;
pub const LINE_SET_CONTINUATION: u32 = 0xFFFF_FF3F;

pub const SUBDIVISION_MODIFIER: u32 = 0xFFFF_FF42;
pub const ANIMATION_MODIFIER: u32 = 0xFFFF_FF43;
pub const BONE_WEIGHT_MODIFIER: u32 = 0xFFFF_FF44;
pub const SHADING_MODIFIER: u32 = 0xFFFF_FF45;
pub const CLOD_MODIFIER: u32 = 0xFFFF_FF46;

pub const LIGHT_RESOURCE: u32 = 0xFFFF_FF51;
pub const VIEW_RESOURCE: u32 = 0xFFFF_FF52;
pub const LIT_TEXTURE_SHADER: u32 = 0xFFFF_FF53;
pub const MATERIAL_RESOURCE: u32 = 0xFFFF_FF54;
pub const TEXTURE_DECLARATION: u32 = 0xFFFF_FF55;
pub const MOTION_DECLARATION: u32 = 0xFFFF_FF56;

pub const TEXTURE_CONTINUATION: u32 = 0xFFFF_FF5C;

/// The inclusive range of user-extension ("new object") block types.
pub const USER_EXTENSION_FIRST: u32 = 0x0000_0100;
pub const USER_EXTENSION_LAST: u32 = 0x00FF_FFFF;

/// Upper bound on a block's data or metadata section.
const MAX_BLOCK_SIZE: u32 = 1 << 30;

/// One framed block: its type, its byte offset in the file, and its data section wrapped in a
/// fresh arithmetic bitstream.
pub struct Block {
    pub block_type: u32,
    pub offset: u64,
    pub data: Bitstream,
}

/// Reads the input as a stream of blocks until end of file.
pub struct BlockReader {
    mss: MediaSourceStream,
}

impl BlockReader {
    pub fn new(mss: MediaSourceStream) -> Self {
        BlockReader { mss }
    }

    /// Frames the next block, or returns `None` at a clean end of file.
    ///
    /// The data section is loaded word-by-word into a new [`Bitstream`], which resets the
    /// arithmetic coder and every context histogram. The metadata section is skipped. On return
    /// the file cursor sits at the next word-aligned block boundary, regardless of how much of
    /// the previous block the caller consumed.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let offset = self.mss.pos();

        let block_type = match self.mss.read_u32() {
            Ok(block_type) => block_type,
            // End of file on a block boundary terminates the stream.
            Err(ScenaError::EndOfFile) if self.mss.pos() == offset => return Ok(None),
            Err(err) => return Err(err),
        };

        let data_size = self.mss.read_u32()?;
        let metadata_size = self.mss.read_u32()?;

        // A declared size beyond any plausible block is either corruption or a malicious
        // allocation request.
        if data_size > MAX_BLOCK_SIZE || metadata_size > MAX_BLOCK_SIZE {
            return limit_error("u3d: block section size exceeds the supported maximum");
        }

        let data_words = (data_size as usize + 3) / 4;
        let mut words = Vec::with_capacity(data_words);
        for _ in 0..data_words {
            words.push(self.mss.read_u32()?);
        }

        let metadata_words = (metadata_size as u64 + 3) / 4;
        self.mss.ignore_bytes(4 * metadata_words)?;

        Ok(Some(Block { block_type, offset, data: Bitstream::new(words, data_size) }))
    }

    /// The current byte position of the framer cursor.
    pub fn pos(&self) -> u64 {
        self.mss.pos()
    }
}

/// The header of a block nested inside another block's data section.
///
/// Modifier-chain payloads carry their modifiers as such sub-blocks, read through the arithmetic
/// byte path. The caller parses what it understands and then steps past the declared size; the
/// parser's cursor is never trusted to land on the boundary by itself.
pub struct SubBlock {
    pub block_type: u32,
    data_size: u32,
    metadata_size: u32,
    origin: usize,
}

impl SubBlock {
    pub fn read(bs: &mut Bitstream) -> Result<SubBlock> {
        let block_type = bs.read_u32()?;
        let data_size = bs.read_u32()?;
        let metadata_size = bs.read_u32()?;
        Ok(SubBlock { block_type, data_size, metadata_size, origin: bs.bit_pos() })
    }

    /// Seeks to the first bit after this sub-block's padded data and metadata sections.
    pub fn skip_past(&self, bs: &mut Bitstream) {
        let words = (self.data_size as usize + 3) / 4 + (self.metadata_size as usize + 3) / 4;
        bs.seek_to_bit(self.origin + 32 * words);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scena_core::io::MediaSourceStream;
    use std::io::Cursor;

    fn stream(bytes: Vec<u8>) -> MediaSourceStream {
        MediaSourceStream::new(Box::new(Cursor::new(bytes)))
    }

    #[test]
    fn verify_block_framing() {
        let mut bytes = Vec::new();
        // Block 1: type 0x00443355, 5 data bytes (pads to 8), 3 metadata bytes (pads to 4).
        bytes.extend_from_slice(&0x0044_3355u32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 8]);
        bytes.extend_from_slice(&[0xBB; 4]);
        // Block 2: type 0xFFFFFF15, 4 data bytes, no metadata.
        bytes.extend_from_slice(&0xFFFF_FF15u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0xCC; 4]);

        let mut reader = BlockReader::new(stream(bytes));

        let block = reader.next_block().unwrap().unwrap();
        assert_eq!(block.block_type, 0x0044_3355);
        assert_eq!(block.offset, 0);
        // Cursor has advanced over header, padded data, and padded metadata.
        assert_eq!(reader.pos(), 12 + 8 + 4);

        let block = reader.next_block().unwrap().unwrap();
        assert_eq!(block.block_type, 0xFFFF_FF15);
        assert_eq!(block.offset, 24);
        assert_eq!(reader.pos(), 24 + 12 + 4);

        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn verify_truncated_block_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0044_3355u32.to_le_bytes());
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);

        let mut reader = BlockReader::new(stream(bytes));
        assert!(reader.next_block().is_err());
    }

    #[test]
    fn verify_empty_file() {
        let mut reader = BlockReader::new(stream(Vec::new()));
        assert!(reader.next_block().unwrap().is_none());
    }
}
