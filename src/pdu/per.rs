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

//! Packed Encoding Rules helpers used by the MCS framer.
//!
//! Only the subset the MCS header needs: a fixed-width 16-bit integer (the
//! `per_read_integer16`/`per_write_integer16` of the original), a
//! forced-long-form length determinant (always 2 bytes with the high bit
//! set, rather than the short form PER would normally pick for small
//! values), and an 8-bit enumerated.

use crate::errors::FrameError;
use crate::packer::BytePacker;

/// Reads a constrained 16-bit integer. The caller applies any range offset
/// (e.g. the MCS initiator's `MCS_BASE_CHANNEL_ID` base).
pub fn read_u16(packer: &mut BytePacker) -> Result<u16, FrameError> {
    packer.read_u16_be()
}

pub fn write_u16(packer: &mut BytePacker, value: u16) {
    packer.write_u16_be(value);
}

/// Reads a length determinant. This implementation only understands the
/// long form (top bit set, 14-bit value in the low bits) since that's the
/// only form this crate ever emits or expects from a peer that round-trips
/// with it.
pub fn read_length(packer: &mut BytePacker) -> Result<u16, FrameError> {
    let raw = packer.read_u16_be()?;
    if raw & 0x8000 == 0 {
        return Err(FrameError::PerLength);
    }
    Ok(raw & 0x7fff)
}

/// Always emits the long form: high bit set, value in the low 15 bits.
pub fn write_length(packer: &mut BytePacker, len: u16) {
    packer.write_u16_be(0x8000 | (len & 0x7fff));
}

pub fn read_enumerated(packer: &mut BytePacker) -> Result<u8, FrameError> {
    packer.read_u8()
}

pub fn write_enumerated(packer: &mut BytePacker, value: u8) {
    packer.write_u8(value);
}
