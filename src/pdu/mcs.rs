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

//! The outermost Domain-MCS-PDU header (ITU-T T.125 §7).
//!
//! Three choices matter to a client: `SendDataRequest`/`SendDataIndication`
//! carry the payload we actually care about, and
//! `DisconnectProviderUltimatum` is the server's clean-shutdown signal. Every
//! other Domain-MCS-PDU choice belongs to the connect/attach/channel-join
//! handshake and is handled by the connection state machine's collaborators,
//! not here.

use super::per;
use crate::errors::FrameError;
use crate::packer::BytePacker;

pub const MCS_BASE_CHANNEL_ID: u16 = 1001;
pub const MCS_GLOBAL_CHANNEL_ID: u16 = 1003;

/// Fixed prefix/segmentation byte: high-priority, single segment.
const PRIORITY_SEGMENTATION: u8 = 0x70;

const CHOICE_DISCONNECT_PROVIDER_ULTIMATUM: u8 = 8;
const CHOICE_SEND_DATA_REQUEST: u8 = 25;
const CHOICE_SEND_DATA_INDICATION: u8 = 26;

/// Fixed size of the header this module writes: choice(1) + initiator(2) +
/// channelId(2) + priority/segmentation(1) + length(2).
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McsDecoded {
    /// A `SendDataRequest`/`SendDataIndication` carrying `user_data_len`
    /// bytes of payload immediately following the header.
    Data { channel_id: u16, user_data_len: u16 },
    /// `DisconnectProviderUltimatum`: the caller should latch
    /// `Session::disconnect` and stop reading further PDUs from this frame.
    Disconnect,
}

/// Writes the `SendDataRequest`/`SendDataIndication` header. `server_mode`
/// picks the PDU direction: a client sends requests and expects
/// indications; a server is the mirror image.
pub fn write_send_data_header(
    packer: &mut BytePacker,
    server_mode: bool,
    initiator: u16,
    channel_id: u16,
    user_data_len: u16,
) {
    let choice = if server_mode {
        CHOICE_SEND_DATA_INDICATION
    } else {
        CHOICE_SEND_DATA_REQUEST
    };
    packer.write_u8(choice << 2);
    per::write_u16(packer, initiator.wrapping_sub(MCS_BASE_CHANNEL_ID));
    per::write_u16(packer, channel_id);
    packer.write_u8(PRIORITY_SEGMENTATION);
    per::write_length(packer, user_data_len);
}

pub fn read_header(packer: &mut BytePacker) -> Result<McsDecoded, FrameError> {
    let byte0 = packer.read_u8()?;
    let choice = byte0 >> 2;
    match choice {
        CHOICE_SEND_DATA_REQUEST | CHOICE_SEND_DATA_INDICATION => {
            let _initiator = per::read_u16(packer)?.wrapping_add(MCS_BASE_CHANNEL_ID);
            let channel_id = per::read_u16(packer)?;
            let _priority_segmentation = packer.read_u8()?;
            let user_data_len = per::read_length(packer)?;
            if user_data_len as usize > packer.remaining() {
                return Err(FrameError::DeclaredLengthExceedsBuffer {
                    declared: user_data_len as usize,
                    remaining: packer.remaining(),
                });
            }
            Ok(McsDecoded::Data {
                channel_id,
                user_data_len,
            })
        }
        CHOICE_DISCONNECT_PROVIDER_ULTIMATUM => {
            let _reason = per::read_enumerated(packer)?;
            Ok(McsDecoded::Disconnect)
        }
        _ => Err(FrameError::UnknownMcsChoice(byte0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_data_request_round_trips() {
        let mut p = BytePacker::with_capacity(32);
        write_send_data_header(&mut p, false, 1007, MCS_GLOBAL_CHANNEL_ID, 20);
        p.write_slice(&[0u8; 20]);

        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        match read_header(&mut r).unwrap() {
            McsDecoded::Data {
                channel_id,
                user_data_len,
            } => {
                assert_eq!(channel_id, MCS_GLOBAL_CHANNEL_ID);
                assert_eq!(user_data_len, 20);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn server_mode_emits_send_data_indication_choice() {
        let mut p = BytePacker::with_capacity(8);
        write_send_data_header(&mut p, true, 1007, MCS_GLOBAL_CHANNEL_ID, 0);
        assert_eq!(p.as_slice()[0] >> 2, CHOICE_SEND_DATA_INDICATION);
    }

    #[test]
    fn disconnect_provider_ultimatum_is_recognized() {
        let mut p = BytePacker::with_capacity(2);
        p.write_u8(CHOICE_DISCONNECT_PROVIDER_ULTIMATUM << 2);
        p.write_u8(0); // reason: rn-domain-disconnected
        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        assert_eq!(read_header(&mut r).unwrap(), McsDecoded::Disconnect);
    }

    #[test]
    fn declared_length_past_buffer_is_a_frame_error() {
        let mut p = BytePacker::with_capacity(8);
        write_send_data_header(&mut p, false, 1007, MCS_GLOBAL_CHANNEL_ID, 200);
        let mut r = BytePacker::from_filled(p.as_slice().to_vec());
        assert!(read_header(&mut r).is_err());
    }
}
