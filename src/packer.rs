// Copyright 2021 Gravitational, Inc
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cursor-based reader/writer over a single contiguous buffer.
//!
//! Mirrors the `STREAM*` helpers of the original C implementation
//! (`stream_read_uint16`, `stream_write_uint16`, `stream_seek`, ...): one
//! buffer, one cursor, typed little/big-endian accessors. Buffers are
//! pre-sized by the caller (the [`crate::pipeline`] send/receive paths), so
//! writes never need to reallocate on the hot path; [`BytePacker::write_u8`]
//! and friends will extend the backing `Vec` only if the caller asked for
//! more space than it reserved, which is always a sign the reservation
//! constants drifted from the body that was written.

use crate::errors::FrameError;

/// A cursor over a mutable byte buffer, used for both encoding and decoding.
///
/// Invariant: `pos <= size <= data.len()`. Typed reads fail without moving
/// the cursor when fewer than `sizeof(T)` bytes remain between `pos` and
/// `size`.
#[derive(Debug)]
pub struct BytePacker {
    data: Vec<u8>,
    pos: usize,
    size: usize,
}

impl BytePacker {
    /// Creates a packer over a fresh buffer with at least `capacity` bytes
    /// reserved. The logical size starts at 0 (nothing has been written
    /// yet); use this for outbound packers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            pos: 0,
            size: 0,
        }
    }

    /// Wraps a buffer that has already been filled by the transport for
    /// decoding. The logical size is the number of valid bytes.
    pub fn from_filled(data: Vec<u8>) -> Self {
        let size = data.len();
        Self { data, pos: 0, size }
    }

    /// Number of bytes logically present in the buffer.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes remaining between the cursor and the logical end.
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.pos)
    }

    /// Cursor position from the start of the buffer (the "length written so
    /// far" when used as a write cursor).
    pub fn length(&self) -> usize {
        self.pos
    }

    /// Returns the current cursor position, for later use with
    /// [`BytePacker::set_position`].
    pub fn mark(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
        if self.size < pos {
            self.size = pos;
        }
    }

    /// Shrinks the logical size, e.g. after stripping FIPS padding.
    pub fn truncate(&mut self, size: usize) {
        self.size = size.min(self.data.len());
        if self.pos > self.size {
            self.pos = self.size;
        }
    }

    fn ensure_capacity(&mut self, end: usize) {
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        if self.size < end {
            self.size = end;
        }
    }

    /// Advances the cursor by `n` bytes without reading or writing them
    /// (equivalent to `stream_seek`). Extends the buffer if writing past the
    /// previously-recorded size.
    pub fn seek(&mut self, n: usize) {
        let end = self.pos + n;
        self.ensure_capacity(end);
        self.pos = end;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Full backing buffer up to the logical size, for crypto routines that
    /// need to index an arbitrary `[start..end]` range directly rather than
    /// go through the cursor.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.data[..size]
    }

    fn check_read(&self, n: usize) -> Result<(), FrameError> {
        if self.remaining() < n {
            return Err(FrameError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        self.check_read(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, FrameError> {
        self.check_read(2)?;
        let v = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, FrameError> {
        self.check_read(2)?;
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, FrameError> {
        self.check_read(4)?;
        let b = &self.data[self.pos..self.pos + 4];
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_slice(&mut self, n: usize) -> Result<&[u8], FrameError> {
        self.check_read(n)?;
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn write_u8(&mut self, v: u8) {
        self.ensure_capacity(self.pos + 1);
        self.data[self.pos] = v;
        self.pos += 1;
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.ensure_capacity(self.pos + 2);
        self.data[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.ensure_capacity(self.pos + 2);
        self.data[self.pos..self.pos + 2].copy_from_slice(&v.to_be_bytes());
        self.pos += 2;
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.ensure_capacity(self.pos + 4);
        self.data[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn write_slice(&mut self, v: &[u8]) {
        self.ensure_capacity(self.pos + v.len());
        self.data[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    /// Overwrites `n` bytes at the cursor with zero, without moving it.
    pub fn zero_fill(&mut self, n: usize) {
        self.ensure_capacity(self.pos + n);
        for b in &mut self.data[self.pos..self.pos + n] {
            *b = 0;
        }
    }
}
