// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `texture` module implements texture declarations and continuations.
//!
//! The declaration announces the image dimensions, channel layout, and compressed byte count;
//! the continuation carries the image bytes. Image decompression (JPEG, PNG) is left to the
//! rendering collaborator, which receives the bytes as-is.

use scena_core::errors::{decode_error, unsupported_error, Result};

use crate::assembly::TextureBytes;
use crate::bitstream::Bitstream;

/// Channel layout masks of a texture declaration.
pub const CHANNEL_ALPHA: u8 = 1;
pub const CHANNEL_BLUE: u8 = 2;
pub const CHANNEL_GREEN: u8 = 4;
pub const CHANNEL_RED: u8 = 8;
pub const CHANNEL_RGB: u8 = 14;
pub const CHANNEL_RGBA: u8 = 15;
pub const CHANNEL_LUMINANCE: u8 = 16;

/// Compression types of a texture continuation payload.
pub const COMPRESSION_RAW: u8 = 0;
pub const COMPRESSION_JPEG24: u8 = 1;
pub const COMPRESSION_PNG: u8 = 2;
pub const COMPRESSION_JPEG8: u8 = 3;
pub const COMPRESSION_TIFF: u8 = 4;

/// The fallback image: an 8x8 white/orange RGB checker.
const DEFAULT_TEXTURE: [u8; 192] = {
    let white = [255u8, 255, 255];
    let orange = [255u8, 102, 51];
    let mut data = [0u8; 192];
    let mut i = 0;
    while i < 64 {
        let cell = if ((i / 8) / 4 + (i % 8) / 4) % 2 == 0 { white } else { orange };
        data[3 * i] = cell[0];
        data[3 * i + 1] = cell[1];
        data[3 * i + 2] = cell[2];
        i += 1;
    }
    data
};

/// A texture resource: the declared image parameters plus the (possibly still compressed) image
/// bytes accumulated from its continuation.
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    /// Declared channel layout mask.
    pub channels: u8,
    pub compression: u8,
    pub attributes: u16,
    image_data: Vec<u8>,
    byte_position: usize,
}

impl Default for Texture {
    fn default() -> Self {
        Texture {
            width: 8,
            height: 8,
            channels: CHANNEL_RGB,
            compression: COMPRESSION_RAW,
            attributes: 0,
            image_data: DEFAULT_TEXTURE.to_vec(),
            byte_position: DEFAULT_TEXTURE.len(),
        }
    }
}

impl Texture {
    pub fn read(bs: &mut Bitstream) -> Result<Texture> {
        let height = bs.read_u32()?;
        let width = bs.read_u32()?;
        let declared_type = bs.read_u8()?;

        let continuation_count = bs.read_u32()?;
        if continuation_count != 1 {
            return unsupported_error("u3d: textures with more than one continuation");
        }

        let compression = bs.read_u8()?;
        let channels = bs.read_u8()?;
        let attributes = bs.read_u16()?;
        if declared_type != channels {
            return decode_error("u3d: texture type and channel mask do not match");
        }
        if attributes & 0x0001 != 0 {
            return unsupported_error("u3d: texture loading from an external URI");
        }

        let byte_count = bs.read_u32()?;
        Ok(Texture {
            width,
            height,
            channels,
            compression,
            attributes,
            image_data: vec![0u8; byte_count as usize],
            byte_position: 0,
        })
    }

    /// Applies a texture continuation block, appending the block's remaining bytes to the image
    /// buffer.
    pub fn load_continuation(&mut self, bs: &mut Bitstream) -> Result<()> {
        let image_index = bs.read_u32()?;
        if image_index != 0 {
            return decode_error("u3d: texture continuation references an undeclared image");
        }
        let bytes_read = bs.read_remainder(&mut self.image_data[self.byte_position..])?;
        self.byte_position += bytes_read;
        Ok(())
    }

    /// The image payload handed to the renderer.
    pub fn image(&self) -> TextureBytes {
        TextureBytes {
            width: self.width,
            height: self.height,
            channels: self.channels,
            compression: self.compression,
            data: self.image_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenc::Encoder;

    fn encode_declaration(continuations: u32, declared_type: u8, channels: u8) -> Encoder {
        let mut enc = Encoder::new();
        enc.write_u32(4); // height
        enc.write_u32(4); // width
        enc.write_u8(declared_type);
        enc.write_u32(continuations);
        enc.write_u8(COMPRESSION_RAW);
        enc.write_u8(channels);
        enc.write_u16(0); // attributes
        enc.write_u32(6); // byte count
        enc
    }

    #[test]
    fn verify_declaration_and_continuation() {
        let mut texture =
            Texture::read(&mut encode_declaration(1, CHANNEL_RGB, CHANNEL_RGB).finish()).unwrap();
        assert_eq!(texture.width, 4);
        assert_eq!(texture.height, 4);

        let mut enc = Encoder::new();
        enc.write_u32(0); // image index
        for b in [1u8, 2, 3, 4] {
            enc.write_u8(b);
        }
        texture.load_continuation(&mut enc.finish()).unwrap();

        let image = texture.image();
        assert_eq!(&image.data[0..4], &[1, 2, 3, 4]);
        assert_eq!(image.data.len(), 6);
    }

    #[test]
    fn verify_multi_continuation_is_unsupported() {
        assert!(Texture::read(&mut encode_declaration(2, CHANNEL_RGB, CHANNEL_RGB).finish()).is_err());
    }

    #[test]
    fn verify_channel_mismatch_is_rejected() {
        assert!(Texture::read(&mut encode_declaration(1, CHANNEL_RGB, CHANNEL_RGBA).finish()).is_err());
    }

    #[test]
    fn verify_default_texture_checker() {
        let texture = Texture::default();
        let image = texture.image();
        assert_eq!(image.data.len(), 192);
        // Top-left cell is white, top-right cell is orange.
        assert_eq!(&image.data[0..3], &[255, 255, 255]);
        assert_eq!(&image.data[3 * 4..3 * 4 + 3], &[255, 102, 51]);
    }
}
