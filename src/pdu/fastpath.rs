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

//! Fast-path: the compact alternative to TPKT+MCS+Share Control used for
//! server-to-client output PDUs. One header byte (action in the low 2 bits,
//! encryption flags in the high 2), then a 1- or 2-byte continuation
//! length, then the payload.

use crate::errors::FrameError;
use crate::packer::BytePacker;

pub const FASTPATH_OUTPUT_ACTION_FASTPATH: u8 = 0x0;

const FLAGS_SECURE_CHECKSUM: u8 = 0x1;
const FLAGS_ENCRYPTED: u8 = 0x2;
const FLAGS_SHIFT: u8 = 6;
const ACTION_MASK: u8 = 0x03;
const LENGTH_CONTINUATION_BIT: u8 = 0x80;

/// Reserved prefix size this module always writes on encode: 1 action/flags
/// byte + a forced 2-byte length, matching the MCS framer's "always encode
/// long form" choice so `SendPipeline` can back-fill uniformly.
pub const HEADER_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPathHeader {
    pub action: u8,
    pub encrypted: bool,
    pub secure_checksum: bool,
    /// Total PDU length, header included.
    pub total_length: usize,
}

pub fn read_header(packer: &mut BytePacker) -> Result<FastPathHeader, FrameError> {
    let byte0 = packer.read_u8()?;
    let action = byte0 & ACTION_MASK;
    if action != FASTPATH_OUTPUT_ACTION_FASTPATH {
        return Err(FrameError::UnknownFastPathAction(byte0));
    }
    let flags = byte0 >> FLAGS_SHIFT;

    let len0 = packer.read_u8()?;
    let total_length = if len0 & LENGTH_CONTINUATION_BIT != 0 {
        let len1 = packer.read_u8()?;
        (((len0 & !LENGTH_CONTINUATION_BIT) as usize) << 8) | len1 as usize
    } else {
        len0 as usize
    };

    Ok(FastPathHeader {
        action,
        encrypted: flags & FLAGS_ENCRYPTED != 0,
        secure_checksum: flags & FLAGS_SECURE_CHECKSUM != 0,
        total_length,
    })
}

/// Reserves the header prefix ahead of the caller writing the body.
pub fn reserve_header(packer: &mut BytePacker) {
    packer.seek(HEADER_LEN);
}

/// Back-fills the header at position 0 once `total_length` (the packer's
/// final cursor position) is known. Always emits the long (2-byte) length
/// form.
pub fn backfill_header(
    packer: &mut BytePacker,
    action: u8,
    encrypted: bool,
    secure_checksum: bool,
    total_length: u16,
) {
    let resume = packer.mark();
    packer.set_position(0);
    let mut flags = 0u8;
    if secure_checksum {
        flags |= FLAGS_SECURE_CHECKSUM;
    }
    if encrypted {
        flags |= FLAGS_ENCRYPTED;
    }
    packer.write_u8((flags << FLAGS_SHIFT) | (action & ACTION_MASK));
    packer.write_u8(LENGTH_CONTINUATION_BIT | ((total_length >> 8) as u8));
    packer.write_u8((total_length & 0xff) as u8);
    packer.set_position(resume);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_with_long_form_length() {
        let mut p = BytePacker::with_capacity(16);
        reserve_header(&mut p);
        p.write_slice(&[1, 2, 3, 4, 5]);
        let total = p.length() as u16;
        backfill_header(&mut p, FASTPATH_OUTPUT_ACTION_FASTPATH, true, false, total);

        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        let hdr = read_header(&mut r).unwrap();
        assert!(hdr.encrypted);
        assert!(!hdr.secure_checksum);
        assert_eq!(hdr.total_length, total as usize);
        assert_eq!(r.remaining(), 5);
    }

    #[test]
    fn short_form_length_decodes_without_continuation_byte() {
        let mut r = BytePacker::from_filled(vec![0x00, 0x05, 0xAA]);
        let hdr = read_header(&mut r).unwrap();
        assert_eq!(hdr.total_length, 5);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn non_fastpath_action_is_rejected() {
        // Action bits select a TPKT-incompatible discriminator here; any
        // non-zero action is out of scope for this crate's fast-path path.
        let mut r = BytePacker::from_filled(vec![0x03, 0x00]);
        assert!(read_header(&mut r).is_err());
    }
}
