// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only encoding support: the arithmetic writer paired with the decoder in `bitstream`,
//! plus plain byte and block builders for whole-file fixtures.
//!
//! The writer mirrors the decoder's interval updates and context bookkeeping exactly, emitting
//! each determined top bit followed by the pending underflow bits, and finishing with the
//! classic quarter-marker flush. Any state divergence between the pair shows up immediately as
//! garbage symbols in the consuming test.

use crate::bitstream::{Bitstream, Context, DynamicContext, NUM_CONTEXTS};

pub(crate) struct Encoder {
    bits: Vec<bool>,
    high: u32,
    low: u32,
    pending: u32,
    contexts: Vec<DynamicContext>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Encoder {
            bits: Vec::new(),
            high: 0xFFFF,
            low: 0,
            pending: 0,
            contexts: vec![DynamicContext::default(); NUM_CONTEXTS],
        }
    }

    fn push_bit(&mut self, bit: u32) {
        self.bits.push(bit != 0);
    }

    /// Narrows the interval to the symbol's frequency band and emits every determined bit.
    fn emit(&mut self, cum: u32, freq: u32, total: u32) {
        let range = self.high + 1 - self.low;
        self.high = self.low + range * (cum + freq) / total - 1;
        self.low += range * cum / total;

        loop {
            if (self.low & 0x8000) == (self.high & 0x8000) {
                let bit = (self.low >> 15) & 1;
                self.push_bit(bit);
                for _ in 0..self.pending {
                    self.push_bit(bit ^ 1);
                }
                self.pending = 0;
                self.low = (self.low & 0x7FFF) << 1;
                self.high = ((self.high & 0x7FFF) << 1) | 1;
            } else if (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
                self.pending += 1;
                self.low = ((self.low & 0x3FFF) << 1) | (self.low & 0x8000);
                self.high = ((self.high & 0x3FFF) << 1) | 1 | (self.high & 0x8000);
            } else {
                break;
            }
        }
    }

    /// Writes a 1-based symbol against the uniform prior over `[0, n)`.
    fn write_static_symbol(&mut self, n: u32, symbol: u32) {
        debug_assert!(symbol >= 1 && symbol <= n);
        self.emit(symbol - 1, 1, n);
    }

    /// Writes a symbol against an adaptive context and records it in the model.
    fn write_dynamic_symbol(&mut self, ctx: Context, symbol: u32) {
        let context = &self.contexts[ctx as usize];
        let total = context.total_frequency();
        let cum = context.cumulative_frequency(symbol);
        let freq = context.symbol_frequency(symbol);
        debug_assert!(freq > 0, "symbol {} is not in the model of {:?}", symbol, ctx);
        self.emit(cum, freq, total);
        self.contexts[ctx as usize].add_symbol(symbol);
    }

    pub(crate) fn write_u8(&mut self, byte: u8) {
        self.write_static_symbol(256, u32::from(byte.reverse_bits()) + 1);
    }

    pub(crate) fn write_u16(&mut self, value: u16) {
        for byte in value.to_le_bytes() {
            self.write_u8(byte);
        }
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.write_u8(byte);
        }
    }

    pub(crate) fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub(crate) fn write_string(&mut self, value: &str) {
        self.write_u16(value.len() as u16);
        for byte in value.bytes() {
            self.write_u8(byte);
        }
    }

    /// Writes a value against the static uniform context `n`, mirroring the reader's degenerate
    /// cases.
    pub(crate) fn write_static_u32(&mut self, n: u32, value: u32) {
        if n == 0 || n >= 0x3FFF {
            self.write_u32(value);
        } else {
            self.write_static_symbol(n, value + 1);
        }
    }

    fn write_compressed(&mut self, ctx: Context, value: u32, raw: fn(&mut Encoder, u32)) {
        let symbol = value.wrapping_add(1);
        if symbol <= 0xFFFF && self.contexts[ctx as usize].symbol_frequency(symbol) > 0 {
            self.write_dynamic_symbol(ctx, symbol);
        } else {
            self.write_dynamic_symbol(ctx, 0);
            raw(self, value);
            self.contexts[ctx as usize].add_symbol(symbol);
        }
    }

    pub(crate) fn write_compressed_u32(&mut self, ctx: Context, value: u32) {
        self.write_compressed(ctx, value, |enc, v| enc.write_u32(v));
    }

    pub(crate) fn write_compressed_u16(&mut self, ctx: Context, value: u16) {
        self.write_compressed(ctx, u32::from(value), |enc, v| enc.write_u16(v as u16));
    }

    pub(crate) fn write_compressed_u8(&mut self, ctx: Context, value: u8) {
        self.write_compressed(ctx, u32::from(value), |enc, v| enc.write_u8(v as u8));
    }

    /// Emits the closing quarter marker that pins the final code word inside the last interval.
    /// Raw-only streams leave the coder pristine and need no marker.
    fn flush(&mut self) {
        if self.low == 0 && self.high == 0xFFFF && self.pending == 0 {
            return;
        }
        self.pending += 1;
        let bit = if self.low < 0x4000 { 0 } else { 1 };
        self.push_bit(bit);
        for _ in 0..self.pending {
            self.push_bit(bit ^ 1);
        }
        self.pending = 0;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; (self.bits.len() + 7) / 8];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        bytes
    }

    /// Finishes the stream and returns its bytes, for embedding into a block.
    pub(crate) fn into_data(mut self) -> Vec<u8> {
        self.flush();
        self.to_bytes()
    }

    /// Finishes the stream and wraps it in a `Bitstream`, for driving a decoder directly.
    pub(crate) fn finish(self) -> Bitstream {
        let data = self.into_data();
        let data_len = data.len() as u32;
        Bitstream::new(bytes_to_words(&data), data_len)
    }
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// A plain little-endian byte builder for block payloads that carry only raw typed fields. Raw
/// bytes pass through the arithmetic byte path untouched, so such payloads are byte-transparent.
pub(crate) struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        ByteWriter { bytes: Vec::new() }
    }

    pub(crate) fn push_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub(crate) fn push_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_string(&mut self, value: &str) {
        self.push_u16(value.len() as u16);
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub(crate) fn push_identity_matrix(&mut self) {
        for i in 0..4 {
            for j in 0..4 {
                self.push_f32(if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    pub(crate) fn align_to_word(&mut self) {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    /// Appends a nested sub-block: header, then the payload padded to a word boundary.
    pub(crate) fn push_sub_block(&mut self, block_type: u32, data: &[u8]) {
        self.push_u32(block_type);
        self.push_u32(data.len() as u32);
        self.push_u32(0); // metadata size
        self.bytes.extend_from_slice(data);
        self.align_to_word();
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Builds a whole container file: a sequence of framed blocks with padded sections.
pub(crate) struct FileBuilder {
    bytes: Vec<u8>,
}

impl FileBuilder {
    pub(crate) fn new() -> Self {
        FileBuilder { bytes: Vec::new() }
    }

    pub(crate) fn add_block(&mut self, block_type: u32, data: &[u8]) {
        self.bytes.extend_from_slice(&block_type.to_le_bytes());
        self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        self.bytes.extend_from_slice(data);
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
