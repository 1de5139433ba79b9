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

//! Share Control Header and Share Data Header: the two RDP-specific
//! envelopes nested inside one MCS `SendDataRequest`/`SendDataIndication`
//! payload.

use crate::errors::FrameError;
use crate::packer::BytePacker;
use crate::pdu::types::ShareControlPduType;
use num_traits::FromPrimitive;

pub const SHARE_CONTROL_HEADER_LEN: usize = 6;
pub const SHARE_DATA_HEADER_LEN: usize = 12;

/// Bit 4 of the on-wire `pduType` field is always set; only the low nibble
/// is the semantic `ShareControlPduType`.
const PROTOCOL_VERSION_BIT: u16 = 0x10;

pub const STREAM_UNDEFINED: u8 = 0;
pub const STREAM_LOW: u8 = 1;
pub const STREAM_MED: u8 = 2;
pub const STREAM_HI: u8 = 4;

bitflags::bitflags! {
    /// The low byte of the Share Data Header's `compressedType` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompressionFlags: u8 {
        /// `PACKET_COMPRESSED`: the payload needs MPPC decompression.
        const COMPRESSED = 0x20;
        const AT_FRONT   = 0x40;
        const FLUSHED    = 0x80;
    }
}

impl CompressionFlags {
    /// The compression type ID occupies the low 4 bits alongside the flags.
    pub fn type_id(byte: u8) -> u8 {
        byte & 0x0f
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareControlHeader {
    pub total_length: u16,
    pub pdu_type: ShareControlPduType,
    pub pdu_source: u16,
}

/// Writes a Share Control Header. `total_length` must be the full length of
/// this Share Control PDU, header included, per the MCS-envelope iteration
/// invariant that `mark + pdu_length` lands exactly on the next header.
pub fn write_control_header(
    packer: &mut BytePacker,
    total_length: u16,
    pdu_type: ShareControlPduType,
    pdu_source: u16,
) {
    packer.write_u16_le(total_length);
    packer.write_u16_le((pdu_type as u16) | PROTOCOL_VERSION_BIT);
    packer.write_u16_le(pdu_source);
}

/// Reads a Share Control Header. Tolerates the short-PDU exception some
/// servers emit for a minimal `DEACTIVATE_ALL`: when `total_length <= 4`,
/// `pduSource` is not present on the wire and is reported as 0.
pub fn read_control_header(packer: &mut BytePacker) -> Result<ShareControlHeader, FrameError> {
    let total_length = packer.read_u16_le()?;
    let raw_type = packer.read_u16_le()?;
    let pdu_type = ShareControlPduType::from_u16(raw_type & 0x0f)
        .ok_or(FrameError::ShortShareControlHeader(total_length as usize))?;

    let pdu_source = if total_length as usize <= 4 {
        0
    } else {
        packer.read_u16_le()?
    };

    Ok(ShareControlHeader {
        total_length,
        pdu_type,
        pdu_source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareDataHeader {
    pub share_id: u32,
    pub stream_id: u8,
    pub uncompressed_length: u16,
    pub pdu_type2: u8,
    pub compressed_type: u8,
    pub compressed_length: u16,
}

/// Writes a Share Data Header. This crate never compresses outbound
/// traffic, so `compressed_type`/`compressed_length` are always zero.
pub fn write_data_header(
    packer: &mut BytePacker,
    share_id: u32,
    stream_id: u8,
    uncompressed_length: u16,
    pdu_type2: u8,
) {
    packer.write_u32_le(share_id);
    packer.write_u8(0); // pad1
    packer.write_u8(stream_id);
    packer.write_u16_le(uncompressed_length);
    packer.write_u8(pdu_type2);
    packer.write_u8(0); // compressedType
    packer.write_u16_le(0); // compressedLength
}

pub fn read_data_header(packer: &mut BytePacker) -> Result<ShareDataHeader, FrameError> {
    let share_id = packer.read_u32_le()?;
    let _pad1 = packer.read_u8()?;
    let stream_id = packer.read_u8()?;
    let uncompressed_length = packer.read_u16_le()?;
    let pdu_type2 = packer.read_u8()?;
    let compressed_type = packer.read_u8()?;
    let compressed_length = packer.read_u16_le()?;
    Ok(ShareDataHeader {
        share_id,
        stream_id,
        uncompressed_length,
        pdu_type2,
        compressed_type,
        compressed_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_header_round_trips() {
        let mut p = BytePacker::with_capacity(8);
        write_control_header(&mut p, 42, ShareControlPduType::Data, 1007);
        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        let hdr = read_control_header(&mut r).unwrap();
        assert_eq!(hdr.total_length, 42);
        assert_eq!(hdr.pdu_type, ShareControlPduType::Data);
        assert_eq!(hdr.pdu_source, 1007);
    }

    #[test]
    fn short_deactivate_all_omits_pdu_source() {
        let mut r = BytePacker::from_filled(vec![0x04, 0x00, 0x16, 0x00]);
        let hdr = read_control_header(&mut r).unwrap();
        assert_eq!(hdr.total_length, 4);
        assert_eq!(hdr.pdu_type, ShareControlPduType::DeactivateAll);
        assert_eq!(hdr.pdu_source, 0);
        assert_eq!(r.mark(), 4);
    }

    #[test]
    fn data_header_round_trips_with_zeroed_compression_fields() {
        let mut p = BytePacker::with_capacity(16);
        write_data_header(&mut p, 0xDEAD_BEEF, STREAM_LOW, 16, 0x1C);
        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        let hdr = read_data_header(&mut r).unwrap();
        assert_eq!(hdr.share_id, 0xDEAD_BEEF);
        assert_eq!(hdr.stream_id, STREAM_LOW);
        assert_eq!(hdr.uncompressed_length, 16);
        assert_eq!(hdr.pdu_type2, 0x1C);
        assert_eq!(hdr.compressed_type, 0);
        assert_eq!(hdr.compressed_length, 0);
    }
}
