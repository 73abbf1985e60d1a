// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `bitstream` module implements the U3D arithmetic-coded bitstream reader.
//!
//! A U3D block's data section is a single stream produced by an integer range coder with 16-bit
//! state and one pending-underflow counter. Three read modes exist on the wire:
//!
//! * *Dynamic* symbols are coded against one of the named adaptive contexts below, each an
//!   escape-seeded histogram. Symbol 0 is the escape: the value was not in the model and follows
//!   as a raw typed value, which is then inserted so it compresses next time.
//! * *Static* symbols are coded against a uniform prior over `[0, n)` and never update a model.
//! * Raw bytes are a special case of the static mode: each byte is one static symbol over
//!   `[0, 256)` followed by a bit reversal.

use scena_core::errors::{decode_error, Result};
use scena_core::io::BitBuffer;
use scena_core::math::{Color3, Color4, Matrix4, Quaternion, TexCoord4, Vector2, Vector3};

/// The adaptive coding contexts, in their exact wire enumeration order. The discriminant of each
/// variant is part of the format: it selects the histogram shared between encoder and decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Context {
    Zero = 0,
    Shading,
    DiffuseCount,
    DiffuseColorSign,
    ColorDiffR,
    ColorDiffG,
    ColorDiffB,
    ColorDiffA,
    SpecularCount,
    SpecularColorSign,
    TexCoordCount,
    TexCoordSign,
    TexCDiffU,
    TexCDiffV,
    TexCDiffS,
    TexCDiffT,
    FaceCnt,
    FaceOrnt,
    ThirdPosType,
    LocalThirdPos,
    StayMove0,
    StayMove1,
    StayMove2,
    StayMove3,
    StayMove4,
    DiffuseKeepChange,
    DiffuseChangeType,
    DiffuseChangeIndexNew,
    DiffuseChangeIndexLocal,
    DiffuseChangeIndexGlobal,
    SpecularKeepChange,
    SpecularChangeType,
    SpecularChangeIndexNew,
    SpecularChangeIndexLocal,
    SpecularChangeIndexGlobal,
    TexCKeepChange,
    TexCChangeType,
    TexCChangeIndexNew,
    TexCChangeIndexLocal,
    TexCChangeIndexGlobal,
    ColorDup,
    ColorIndexType,
    ColorIndexLocal,
    ColorIndexGlobal,
    TexCDup,
    TexCIndexType,
    TextureIndexLocal,
    TextureIndexGlobal,
    PosDiffSign,
    PosDiffX,
    PosDiffY,
    PosDiffZ,
    NormalCnt,
    DiffNormalSign,
    DiffNormalX,
    DiffNormalY,
    DiffNormalZ,
    NormalIdx,
    PointCnt,
    DiffDup,
    SpecDup,
    LineCnt,
}

/// The number of adaptive contexts.
pub const NUM_CONTEXTS: usize = Context::LineCnt as usize + 1;

/// Static contexts at or above this value read the raw typed value instead.
const MAX_STATIC_CONTEXT: u32 = 0x3FFF;

/// Rescale threshold for an adaptive histogram.
const MAX_TOTAL_FREQUENCY: u32 = 0x1FFF;

/// Maps a symbol index to a byte: `i -> reverse_bits(i)`.
const BIT_REVERSE_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
};

/// An adaptive symbol histogram. Starts out predicting only the escape symbol.
#[derive(Clone)]
pub(crate) struct DynamicContext {
    freq: Vec<u16>,
    total: u32,
}

impl Default for DynamicContext {
    fn default() -> Self {
        let mut freq = vec![0u16; 256];
        freq[0] = 1;
        DynamicContext { freq, total: 1 }
    }
}

impl DynamicContext {
    /// Records an occurrence of `symbol`, halving the histogram first if the total frequency
    /// reached the rescale threshold. Symbols wider than 16 bits are not modelled.
    pub(crate) fn add_symbol(&mut self, symbol: u32) {
        if symbol > 0xFFFF {
            return;
        }
        let symbol = symbol as usize;
        if symbol >= self.freq.len() {
            self.freq.resize(symbol + 1, 0);
        }
        if self.total >= MAX_TOTAL_FREQUENCY {
            self.total = 1;
            for f in self.freq.iter_mut() {
                *f >>= 1;
                self.total += u32::from(*f);
            }
            self.freq[0] += 1;
        }
        self.freq[symbol] += 1;
        self.total += 1;
    }

    pub(crate) fn symbol_frequency(&self, symbol: u32) -> u32 {
        match self.freq.get(symbol as usize) {
            Some(&f) => u32::from(f),
            None => 0,
        }
    }

    pub(crate) fn total_frequency(&self) -> u32 {
        self.total
    }

    /// The cumulative frequency of all symbols below `symbol`.
    pub(crate) fn cumulative_frequency(&self, symbol: u32) -> u32 {
        self.freq.iter().take(symbol as usize).map(|&f| u32::from(f)).sum()
    }

    /// Finds the smallest symbol whose cumulative frequency range covers `frequency`, returning
    /// the symbol and the cumulative frequency below it.
    pub(crate) fn symbol_from_frequency(&self, frequency: u32) -> (u32, u32) {
        let mut cum = 0u32;
        for (symbol, &f) in self.freq.iter().enumerate() {
            if cum + u32::from(f) > frequency {
                return (symbol as u32, cum);
            }
            cum += u32::from(f);
        }
        (self.freq.len() as u32, cum)
    }
}

/// The arithmetic-coded reader over one block's data section.
///
/// Holds the range-coder state and all adaptive contexts. A fresh `Bitstream` is created per
/// block, so every block starts with reset contexts and a pristine coder state.
pub struct Bitstream {
    buf: BitBuffer,
    /// Unpadded byte length of the block's data section.
    data_len: u32,
    high: u32,
    low: u32,
    underflow: u32,
    contexts: Vec<DynamicContext>,
}

impl Bitstream {
    pub fn new(words: Vec<u32>, data_len: u32) -> Self {
        Bitstream {
            buf: BitBuffer::new(words),
            data_len,
            high: 0xFFFF,
            low: 0,
            underflow: 0,
            contexts: vec![DynamicContext::default(); NUM_CONTEXTS],
        }
    }

    /// The current cursor position in bits from the start of the data section.
    pub fn bit_pos(&self) -> usize {
        self.buf.pos()
    }

    /// Moves the cursor to an absolute bit position. Used to step past nested sub-blocks.
    pub fn seek_to_bit(&mut self, pos: usize) {
        self.buf.seek(pos);
    }

    /// Rounds the cursor up to the next 32-bit boundary.
    pub fn align_to_word(&mut self) {
        self.buf.align_to_word();
    }

    /// The number of unread bits left in the data section.
    fn bits_remaining(&self) -> usize {
        (self.data_len as usize * 8).saturating_sub(self.buf.pos())
    }

    /// Peeks the 16-bit code word under the cursor: one bit, `underflow` discarded bits, then
    /// fifteen bits, most-significant first.
    fn peek_code(&self) -> u32 {
        let start = self.buf.pos();
        let mut code = self.buf.bit_at(start) << 15;
        let base = start + 1 + self.underflow as usize;
        for i in 0..15 {
            code |= self.buf.bit_at(base + i) << (14 - i);
        }
        code
    }

    /// Renormalizes the interval, consuming the produced output bits (plus any pending underflow
    /// bits) from the buffer.
    fn renormalize(&mut self) {
        let mut count = 0;
        while (self.low & 0x8000) == (self.high & 0x8000) {
            self.low = (self.low & 0x7FFF) << 1;
            self.high = ((self.high & 0x7FFF) << 1) | 1;
            count += 1;
        }
        if count > 0 {
            count += self.underflow;
            self.underflow = 0;
        }
        while (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
            self.low = ((self.low & 0x3FFF) << 1) | (self.low & 0x8000);
            self.high = ((self.high & 0x3FFF) << 1) | 1 | (self.high & 0x8000);
            self.underflow += 1;
        }
        self.buf.skip(count as usize);
    }

    /// Reads one symbol against a uniform prior over `[0, n)`. Returns the 1-based symbol; the
    /// coded value is `symbol - 1`. No model is updated.
    pub fn read_static_symbol(&mut self, n: u32) -> u32 {
        let code = self.peek_code().clamp(self.low, self.high);
        let range = self.high + 1 - self.low;
        let cum = (n * (1 + code - self.low) - 1) / range;
        let symbol = cum + 1;
        self.high = self.low + range * symbol / n - 1;
        self.low += range * cum / n;
        self.renormalize();
        symbol
    }

    /// Reads one symbol against the adaptive histogram of `ctx` and records it in the model.
    /// Returns 0 for the escape symbol.
    pub fn read_dynamic_symbol(&mut self, ctx: Context) -> Result<u32> {
        let code = self.peek_code().clamp(self.low, self.high);
        let range = self.high + 1 - self.low;

        let context = &self.contexts[ctx as usize];
        let total = context.total_frequency();
        let cum_code = (total * (1 + code - self.low) - 1) / range;
        let (symbol, cum) = context.symbol_from_frequency(cum_code);
        let freq = context.symbol_frequency(symbol);

        if freq == 0 {
            // The code word points past the histogram. The stream and the model have diverged.
            return decode_error("u3d: arithmetic decoder lost symbol synchronization");
        }

        self.high = self.low + range * (cum + freq) / total - 1;
        self.low += range * cum / total;
        self.contexts[ctx as usize].add_symbol(symbol);
        self.renormalize();
        Ok(symbol)
    }

    /// Reads one raw byte: a static symbol over `[0, 256)` mapped through the bit-reversal table.
    pub fn read_u8(&mut self) -> Result<u8> {
        let symbol = self.read_static_symbol(256);
        Ok(BIT_REVERSE_TABLE[(symbol - 1) as usize])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for b in bytes.iter_mut() {
            *b = self.read_u8()?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        for b in bytes.iter_mut() {
            *b = self.read_u8()?;
        }
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a length-prefixed string: a u16 byte count followed by that many bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()?;
        let mut bytes = Vec::with_capacity(usize::from(len));
        for _ in 0..len {
            bytes.push(self.read_u8()?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_vector2(&mut self) -> Result<Vector2> {
        Ok(Vector2 { u: self.read_f32()?, v: self.read_f32()? })
    }

    pub fn read_vector3(&mut self) -> Result<Vector3> {
        Ok(Vector3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_color3(&mut self) -> Result<Color3> {
        Ok(Color3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_color4(&mut self) -> Result<Color4> {
        Ok(Color4::new(self.read_f32()?, self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_texcoord4(&mut self) -> Result<TexCoord4> {
        Ok(TexCoord4::new(self.read_f32()?, self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quaternion(&mut self) -> Result<Quaternion> {
        Ok(Quaternion {
            w: self.read_f32()?,
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    /// Reads a 4x4 transform element: sixteen floats in column-of-rows wire order.
    pub fn read_matrix4(&mut self) -> Result<Matrix4> {
        let mut mat = Matrix4::IDENTITY;
        for i in 0..4 {
            for j in 0..4 {
                mat.m[i][j] = self.read_f32()?;
            }
        }
        Ok(mat)
    }

    /// Reads a value compressed against an adaptive context, applying the escape convention.
    pub fn read_compressed_u32(&mut self, ctx: Context) -> Result<u32> {
        let symbol = self.read_dynamic_symbol(ctx)?;
        if symbol == 0 {
            let value = self.read_u32()?;
            self.contexts[ctx as usize].add_symbol(value.wrapping_add(1));
            Ok(value)
        } else {
            Ok(symbol - 1)
        }
    }

    /// Reads a 16-bit value compressed against an adaptive context.
    pub fn read_compressed_u16(&mut self, ctx: Context) -> Result<u16> {
        let symbol = self.read_dynamic_symbol(ctx)?;
        if symbol == 0 {
            let value = self.read_u16()?;
            self.contexts[ctx as usize].add_symbol(u32::from(value) + 1);
            Ok(value)
        } else {
            Ok((symbol - 1) as u16)
        }
    }

    /// Reads an 8-bit value compressed against an adaptive context.
    pub fn read_compressed_u8(&mut self, ctx: Context) -> Result<u8> {
        let symbol = self.read_dynamic_symbol(ctx)?;
        if symbol == 0 {
            let value = self.read_u8()?;
            self.contexts[ctx as usize].add_symbol(u32::from(value) + 1);
            Ok(value)
        } else {
            Ok((symbol - 1) as u8)
        }
    }

    /// Reads a value coded against the static uniform context `n`. Degenerate contexts (0, or at
    /// or above the static limit) carry the value uncompressed.
    pub fn read_static_u32(&mut self, n: u32) -> Result<u32> {
        if n == 0 || n >= MAX_STATIC_CONTEXT {
            self.read_u32()
        } else {
            Ok(self.read_static_symbol(n) - 1)
        }
    }

    /// Copies raw bytes into `buf` until it is full or the block's data section is exhausted.
    /// Returns the number of bytes copied.
    pub fn read_remainder(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() && self.bits_remaining() >= 8 {
            buf[written] = self.read_u8()?;
            written += 1;
        }
        Ok(written)
    }

    #[cfg(test)]
    pub(crate) fn context_stats(&self, ctx: Context) -> (u32, Vec<u16>) {
        let c = &self.contexts[ctx as usize];
        (c.total, c.freq.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenc::Encoder;

    #[test]
    fn verify_bit_reverse_table() {
        assert_eq!(BIT_REVERSE_TABLE[0x00], 0x00);
        assert_eq!(BIT_REVERSE_TABLE[0x01], 0x80);
        assert_eq!(BIT_REVERSE_TABLE[0x80], 0x01);
        assert_eq!(BIT_REVERSE_TABLE[0xB5], 0xAD);
        assert_eq!(BIT_REVERSE_TABLE[0xFF], 0xFF);
    }

    #[test]
    fn verify_raw_typed_reads() {
        let mut enc = Encoder::new();
        enc.write_u32(0xDEAD_BEEF);
        enc.write_u16(0x1234);
        enc.write_u8(0x7F);
        enc.write_f32(1.5);
        enc.write_string("DefaultView");
        let mut bs = enc.finish();

        assert_eq!(bs.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(bs.read_u16().unwrap(), 0x1234);
        assert_eq!(bs.read_u8().unwrap(), 0x7F);
        assert_eq!(bs.read_f32().unwrap(), 1.5);
        assert_eq!(bs.read_string().unwrap(), "DefaultView");
    }

    #[test]
    fn verify_raw_bytes_consume_eight_bits() {
        let mut enc = Encoder::new();
        enc.write_u32(0x0102_0304);
        let mut bs = enc.finish();
        assert_eq!(bs.bit_pos(), 0);
        bs.read_u8().unwrap();
        assert_eq!(bs.bit_pos(), 8);
        bs.read_u8().unwrap();
        bs.read_u8().unwrap();
        bs.read_u8().unwrap();
        assert_eq!(bs.bit_pos(), 32);
    }

    #[test]
    fn verify_static_symbols() {
        let mut enc = Encoder::new();
        for value in [0u32, 1, 2, 2, 0, 1] {
            enc.write_static_u32(3, value);
        }
        enc.write_static_u32(713, 700);
        let mut bs = enc.finish();

        for expect in [0u32, 1, 2, 2, 0, 1] {
            assert_eq!(bs.read_static_u32(3).unwrap(), expect);
        }
        assert_eq!(bs.read_static_u32(713).unwrap(), 700);
    }

    #[test]
    fn verify_static_context_one_reads_nothing() {
        let mut enc = Encoder::new();
        enc.write_u8(0xAB);
        let mut bs = enc.finish();
        assert_eq!(bs.read_static_u32(1).unwrap(), 0);
        assert_eq!(bs.bit_pos(), 0);
        assert_eq!(bs.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn verify_degenerate_static_contexts_read_raw() {
        let mut enc = Encoder::new();
        enc.write_u32(42);
        enc.write_u32(43);
        let mut bs = enc.finish();
        assert_eq!(bs.read_static_u32(0).unwrap(), 42);
        assert_eq!(bs.read_static_u32(0x3FFF).unwrap(), 43);
    }

    // A fresh context always escapes, the raw value is inserted as `value + 1`, and the next
    // occurrence of the same value decodes from the histogram.
    #[test]
    fn verify_escape_convention_and_histogram() {
        let mut enc = Encoder::new();
        enc.write_compressed_u32(Context::Zero, 5);
        enc.write_compressed_u32(Context::Shading, 7);
        enc.write_compressed_u32(Context::Shading, 7);
        let mut bs = enc.finish();

        assert_eq!(bs.read_compressed_u32(Context::Zero).unwrap(), 5);
        assert_eq!(bs.read_compressed_u32(Context::Shading).unwrap(), 7);
        assert_eq!(bs.read_compressed_u32(Context::Shading).unwrap(), 7);

        let (total, freq) = bs.context_stats(Context::Shading);
        // One escape plus one in-model hit of symbol 8 (= value 7).
        assert_eq!(freq[0], 2);
        assert_eq!(freq[8], 2);
        assert_eq!(total, 4);
        assert_eq!(freq.iter().map(|&f| u32::from(f)).sum::<u32>(), total);
    }

    #[test]
    fn verify_compressed_value_mix() {
        let values: Vec<u32> = (0..200).map(|i| (i * 7) % 23).collect();
        let mut enc = Encoder::new();
        for &v in &values {
            enc.write_compressed_u32(Context::NormalIdx, v);
            enc.write_static_u32(29, v % 29);
        }
        let mut bs = enc.finish();
        for &v in &values {
            assert_eq!(bs.read_compressed_u32(Context::NormalIdx).unwrap(), v);
            assert_eq!(bs.read_static_u32(29).unwrap(), v % 29);
        }
    }

    // Push a single context past the rescale threshold and verify the model stays consistent on
    // both sides of the wire.
    #[test]
    fn verify_histogram_rescale_roundtrip() {
        let values: Vec<u32> = (0..10_000u32).map(|i| i % 50).collect();
        let mut enc = Encoder::new();
        for &v in &values {
            enc.write_compressed_u32(Context::Shading, v);
        }
        let mut bs = enc.finish();
        for &v in &values {
            assert_eq!(bs.read_compressed_u32(Context::Shading).unwrap(), v);
        }

        let (total, freq) = bs.context_stats(Context::Shading);
        assert_eq!(freq.iter().map(|&f| u32::from(f)).sum::<u32>(), total);
        assert!(total < MAX_TOTAL_FREQUENCY + 2);
        assert!(freq[0] >= 1);
    }

    #[test]
    fn verify_rescale_keeps_invariants() {
        let mut ctx = DynamicContext::default();
        for i in 0..MAX_TOTAL_FREQUENCY + 100 {
            ctx.add_symbol(1 + (i % 3));
        }
        let sum: u32 = ctx.freq.iter().map(|&f| u32::from(f)).sum();
        assert_eq!(sum, ctx.total);
        assert!(ctx.freq[0] >= 1);
    }
}
