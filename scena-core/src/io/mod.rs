// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable byte- and bit-level I/O.
//!
//! All byte-oriented readers implement the [`ReadBytes`] trait. A `Stream` consumes any source
//! implementing [`MediaSource`] (aka. [`std::io::Read`]), while a `Reader` consumes a `&[u8]`.
//!
//! The U3D container is little-endian throughout, therefore only little-endian primitives are
//! provided.

use std::io;
use std::mem;

use crate::errors::Result;

mod bits;

pub use bits::BitBuffer;

/// `MediaSource` is a composite trait of [`std::io::Read`] and [`std::io::Seek`]. A source *must*
/// implement this trait to be used by [`MediaSourceStream`].
pub trait MediaSource: io::Read + io::Seek + Send + Sync {
    /// Returns if the source is seekable. This may be an expensive operation.
    fn is_seekable(&self) -> bool;

    /// Returns the length in bytes, if available. This may be an expensive operation.
    fn byte_len(&self) -> Option<u64>;
}

impl MediaSource for std::fs::File {
    fn is_seekable(&self) -> bool {
        // If the file's metadata is available, and the file is a regular file (i.e., not a FIFO,
        // etc.), then the MediaSource will be seekable. Otherwise assume it is not.
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    fn byte_len(&self) -> Option<u64> {
        match self.metadata() {
            Ok(metadata) => Some(metadata.len()),
            _ => None,
        }
    }
}

impl<T: AsRef<[u8]> + Send + Sync> MediaSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// `ReadBytes` provides methods to read bytes and interpret them as little-endian unsigned
/// integers or floating-point values of standard widths.
pub trait ReadBytes {
    /// Reads a single byte from the stream and returns it or an error.
    fn read_byte(&mut self) -> Result<u8>;

    /// Reads two bytes from the stream and returns them in read-order or an error.
    fn read_double_bytes(&mut self) -> Result<[u8; 2]>;

    /// Reads four bytes from the stream and returns them in read-order or an error.
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]>;

    /// Reads exactly the number of bytes required to fill the provided buffer or returns an error.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Reads a single unsigned byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_double_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads eight bytes from the stream and interprets them as an unsigned 64-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; mem::size_of::<u64>()];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as a 32-bit little-endian IEEE-754
    /// floating-point value.
    #[inline(always)]
    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads eight bytes from the stream and interprets them as a 64-bit little-endian IEEE-754
    /// floating-point value.
    #[inline(always)]
    fn read_f64(&mut self) -> Result<f64> {
        let mut buf = [0u8; mem::size_of::<u64>()];
        self.read_buf_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Ignores the specified number of bytes from the stream or returns an error.
    fn ignore_bytes(&mut self, count: u64) -> Result<()>;

    /// Gets the position of the stream.
    fn pos(&self) -> u64;
}

impl<R: ReadBytes> ReadBytes for &mut R {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        (**self).read_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        (**self).read_double_bytes()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        (**self).read_quad_bytes()
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_buf_exact(buf)
    }

    #[inline(always)]
    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        (**self).ignore_bytes(count)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

/// `MediaSourceStream` is the main reader type in Scena. It is a buffered reader over a
/// [`MediaSource`] that implements [`ReadBytes`].
pub struct MediaSourceStream {
    /// The source.
    inner: Box<dyn MediaSource>,
    /// The intermediate read buffer.
    buf: Box<[u8]>,
    /// The number of valid bytes in `buf`.
    end: usize,
    /// The next byte to read in `buf`.
    cur: usize,
    /// The absolute position of the first byte of `buf` in the source.
    origin: u64,
}

impl MediaSourceStream {
    const BUF_LEN: usize = 32 * 1024;

    pub fn new(source: Box<dyn MediaSource>) -> Self {
        MediaSourceStream {
            inner: source,
            buf: vec![0u8; Self::BUF_LEN].into_boxed_slice(),
            end: 0,
            cur: 0,
            origin: 0,
        }
    }

    /// Returns the total length of the underlying source in bytes, if known.
    pub fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }

    fn fetch(&mut self) -> Result<()> {
        if self.cur == self.end {
            self.origin += self.end as u64;
            self.cur = 0;
            self.end = self.inner.read(&mut self.buf)?;
        }
        Ok(())
    }
}

impl ReadBytes for MediaSourceStream {
    fn read_byte(&mut self) -> Result<u8> {
        self.fetch()?;

        if self.cur == self.end {
            return crate::errors::end_of_stream_error();
        }

        let byte = self.buf[self.cur];
        self.cur += 1;
        Ok(byte)
    }

    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        let mut bytes = [0u8; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut bytes = [0u8; 4];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut written = 0;

        while written < buf.len() {
            self.fetch()?;

            if self.cur == self.end {
                return crate::errors::end_of_stream_error();
            }

            let count = (self.end - self.cur).min(buf.len() - written);
            buf[written..written + count].copy_from_slice(&self.buf[self.cur..self.cur + count]);
            self.cur += count;
            written += count;
        }

        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> Result<()> {
        while count > 0 {
            self.fetch()?;

            if self.cur == self.end {
                return crate::errors::end_of_stream_error();
            }

            let discard = ((self.end - self.cur) as u64).min(count) as usize;
            self.cur += discard;
            count -= discard as u64;
        }
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.origin + self.cur as u64
    }
}

/// A `BufReader` reads bytes from a byte buffer.
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    /// Instantiate a new `BufReader` with a given byte buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BufReader { buf, pos: 0 }
    }

    /// The number of bytes left to read.
    pub fn bytes_available(&self) -> u64 {
        (self.buf.len() - self.pos) as u64
    }
}

impl ReadBytes for BufReader<'_> {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        if self.buf.len() - self.pos < 1 {
            return crate::errors::end_of_stream_error();
        }

        self.pos += 1;
        Ok(self.buf[self.pos - 1])
    }

    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        let mut bytes = [0u8; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut bytes = [0u8; 4];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.buf.len() - self.pos < buf.len() {
            return crate::errors::end_of_stream_error();
        }

        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        if ((self.buf.len() - self.pos) as u64) < count {
            return crate::errors::end_of_stream_error();
        }
        self.pos += count as usize;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_buf_reader_primitives() {
        let mut reader = BufReader::new(&[
            0x01, //
            0x02, 0x03, //
            0x04, 0x05, 0x06, 0x07, //
            0x00, 0x00, 0x80, 0x3F, //
        ]);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
        assert_eq!(reader.read_u32().unwrap(), 0x0706_0504);
        assert_eq!(reader.read_f32().unwrap(), 1.0);
        assert_eq!(reader.pos(), 11);
        assert_eq!(reader.bytes_available(), 0);
        assert!(reader.read_byte().is_err());
    }

    #[test]
    fn verify_media_source_stream() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let mut mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(bytes)));

        assert_eq!(mss.read_u32().unwrap(), 0x0302_0100);
        mss.ignore_bytes(250).unwrap();
        assert_eq!(mss.pos(), 254);
        assert_eq!(mss.read_u8().unwrap(), 254);
        assert_eq!(mss.read_u8().unwrap(), 255);
        assert!(mss.read_u8().is_err());
        assert_eq!(mss.pos(), 256);
    }

    #[test]
    fn verify_ignore_past_end_is_an_error() {
        let mut mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(vec![0u8; 4])));
        assert!(mss.ignore_bytes(8).is_err());
    }
}
