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

//! [`ReceivePipeline`] and [`SendPipeline`]: the two entry points that tie
//! TPKT, MCS, the security envelope, and the Share Control/Data headers
//! together into one frame in each direction.

use crate::compression::{CompressionType, COMPRESSED_LENGTH_HEADER_OFFSET};
use crate::errors::{CryptoError, FrameError, RdpError};
use crate::handlers::{self, Collaborators};
use crate::packer::BytePacker;
use crate::pdu::mcs::{self, McsDecoded, MCS_GLOBAL_CHANNEL_ID};
use crate::pdu::security::{self, SecurityFlags};
use crate::pdu::share::{self, CompressionFlags};
use crate::pdu::fastpath;
use crate::pdu::types::{ShareControlPduType, ShareDataPduType};
use crate::session::Session;
use crate::state::Phase;
use crate::transport::Transport;

/// TPKT (ITU-T T.123) header: version(1) + reserved(1) + length(2, big
/// endian, header included).
const TPKT_HEADER_LEN: usize = 4;
const TPKT_VERSION: u8 = 0x03;

/// The TPKT header plus the MCS Send-Data header this crate always emits
/// in long form.
pub const RDP_PACKET_HEADER_MAX: usize = TPKT_HEADER_LEN + mcs::HEADER_LEN;

fn write_tpkt_header(packer: &mut BytePacker, total_length: u16) {
    packer.write_u8(TPKT_VERSION);
    packer.write_u8(0); // reserved
    packer.write_u16_be(total_length);
}

fn read_tpkt_header(packer: &mut BytePacker) -> Result<u16, FrameError> {
    let version = packer.read_u8()?;
    if version != TPKT_VERSION {
        return Err(FrameError::BadTpktVersion(version));
    }
    let _reserved = packer.read_u8()?;
    packer.read_u16_be()
}

/// Decodes one inbound frame and dispatches it to the embedder's
/// [`Collaborators`] implementation.
pub struct ReceivePipeline;

impl ReceivePipeline {
    /// Entry point for one transport read. `packer` is the freshly-filled
    /// buffer; discrimination between TPKT and fast-path framing is by the
    /// first byte (`0x03` selects TPKT).
    pub fn process<C: Collaborators>(
        session: &mut Session,
        collab: &mut C,
        packer: &mut BytePacker,
    ) -> Result<(), RdpError> {
        if session.disconnect {
            return Ok(());
        }
        match packer.as_slice().first() {
            Some(&TPKT_VERSION) => Self::process_tpkt(session, collab, packer),
            _ => Self::process_fastpath(session, collab, packer),
        }
    }

    fn process_tpkt<C: Collaborators>(
        session: &mut Session,
        collab: &mut C,
        packer: &mut BytePacker,
    ) -> Result<(), RdpError> {
        let declared_len = read_tpkt_header(packer)? as usize;
        if declared_len > packer.size() {
            return Err(FrameError::DeclaredLengthExceedsBuffer {
                declared: declared_len,
                remaining: packer.remaining(),
            }
            .into());
        }

        // Before the channel-join handshake completes, PDUs ride directly on
        // TPKT with their own top-level MCS framing (connect-response,
        // attach-user-confirm, channel-join-confirm...), not inside a
        // Send-Data envelope. That framing is the phase collaborator's
        // concern, not this module's.
        if session.state.phase() < Phase::Finalization {
            return session.state.dispatch(collab, packer);
        }

        let channel_id = match mcs::read_header(packer)? {
            McsDecoded::Disconnect => {
                session.disconnect = true;
                return Ok(());
            }
            McsDecoded::Data { channel_id, .. } => channel_id,
        };

        if session.settings.encryption {
            let flags = security::read_basic_header(packer)?;
            if flags.intersects(SecurityFlags::ENCRYPT | SecurityFlags::REDIRECTION_PKT) {
                Self::decrypt_frame(session, packer, flags)?;
            }
            if flags.contains(SecurityFlags::REDIRECTION_PKT) {
                // The redirection PDU's own length field overlaps the last
                // two bytes already consumed off the security header.
                let body_start = packer.mark().saturating_sub(2);
                let body = packer.as_mut_slice()[body_start..packer.size()].to_vec();
                packer.set_position(packer.size());
                return collab.on_redirect(session, &body);
            }
        }

        if channel_id != MCS_GLOBAL_CHANNEL_ID {
            let start = packer.mark();
            let end = packer.size();
            let body = packer.as_mut_slice()[start..end].to_vec();
            packer.set_position(end);
            return collab.on_channel_data(session, channel_id, &body);
        }

        while packer.remaining() >= 4 {
            let mark = packer.mark();
            let hdr = share::read_control_header(packer)?;
            session.settings.pdu_source = hdr.pdu_source;
            let next = mark + hdr.total_length as usize;
            if hdr.total_length < 4 || next > packer.size() {
                return Err(FrameError::ShortShareControlHeader(hdr.total_length as usize).into());
            }

            match hdr.pdu_type {
                ShareControlPduType::Data => {
                    Self::process_data_pdu(session, collab, packer, next)?;
                }
                ShareControlPduType::DeactivateAll => {
                    let body = packer.as_mut_slice()[packer.mark()..next].to_vec();
                    collab.on_deactivate_all(session, &body)?;
                }
                ShareControlPduType::ServerRedirect => {
                    let body = packer.as_mut_slice()[packer.mark()..next].to_vec();
                    collab.on_redirect(session, &body)?;
                }
                other => log::debug!("skipping Share Control PDU type {other:?}"),
            }
            packer.set_position(next);
        }
        Ok(())
    }

    fn process_data_pdu<C: Collaborators>(
        session: &mut Session,
        collab: &mut C,
        packer: &mut BytePacker,
        pdu_end: usize,
    ) -> Result<(), RdpError> {
        let data_hdr = share::read_data_header(packer)?;
        let mark = packer.mark();

        let flags = CompressionFlags::from_bits_truncate(data_hdr.compressed_type);
        if flags.contains(CompressionFlags::COMPRESSED) {
            let payload_len = (data_hdr.compressed_length as usize)
                .checked_sub(COMPRESSED_LENGTH_HEADER_OFFSET)
                .filter(|len| mark + len <= pdu_end)
                .ok_or(FrameError::DeclaredLengthExceedsBuffer {
                    declared: data_hdr.compressed_length as usize,
                    remaining: pdu_end - mark,
                })?;
            let raw = packer.as_mut_slice()[mark..mark + payload_len].to_vec();
            let ty = CompressionType::from_type_id(data_hdr.compressed_type)?;
            let (offset, len) = session.decompressor.decompress(flags, ty, &raw)?;
            let body = session.decompressor.history()[offset..offset + len].to_vec();
            handlers::dispatch(collab, session, data_hdr.pdu_type2, &body)?;
        } else {
            let raw = packer.as_mut_slice()[mark..pdu_end].to_vec();
            handlers::dispatch(collab, session, data_hdr.pdu_type2, &raw)?;
        }
        Ok(())
    }

    fn decrypt_frame(
        session: &mut Session,
        packer: &mut BytePacker,
        flags: SecurityFlags,
    ) -> Result<(), RdpError> {
        let fips = session.settings.encryption_method.is_fips();
        let allow_insecure = session.settings.legacy_insecure_mac_accept;

        if fips {
            let (pad, signature) = security::read_fips_header(packer)?;
            let cipher_start = packer.mark();
            let end = packer.size();
            let sec = session
                .security
                .as_mut()
                .ok_or(CryptoError::NoSecurityContext)?;
            let logical_len = {
                let buf = packer.as_mut_slice();
                security::fips_decrypt(sec, &mut buf[cipher_start..end], pad, &signature)?
            };
            packer.truncate(cipher_start + logical_len);
            packer.set_position(cipher_start);
        } else {
            let mut mac = [0u8; security::LEGACY_MAC_LEN];
            mac.copy_from_slice(packer.read_slice(security::LEGACY_MAC_LEN)?);
            let cipher_start = packer.mark();
            let end = packer.size();
            let secure_checksum = flags.contains(SecurityFlags::SECURE_CHECKSUM);
            let sec = session
                .security
                .as_mut()
                .ok_or(CryptoError::NoSecurityContext)?;
            let buf = packer.as_mut_slice();
            security::legacy_decrypt(
                sec,
                secure_checksum,
                &mut buf[cipher_start..end],
                &mac,
                allow_insecure,
            )?;
            packer.set_position(cipher_start);
        }
        Ok(())
    }

    fn process_fastpath<C: Collaborators>(
        session: &mut Session,
        collab: &mut C,
        packer: &mut BytePacker,
    ) -> Result<(), RdpError> {
        let hdr = fastpath::read_header(packer)?;
        if hdr.total_length > packer.size() {
            return Err(FrameError::DeclaredLengthExceedsBuffer {
                declared: hdr.total_length,
                remaining: packer.remaining(),
            }
            .into());
        }
        packer.truncate(hdr.total_length);

        if hdr.encrypted {
            let allow_insecure = session.settings.legacy_insecure_mac_accept;
            let mut mac = [0u8; security::LEGACY_MAC_LEN];
            mac.copy_from_slice(packer.read_slice(security::LEGACY_MAC_LEN)?);
            let cipher_start = packer.mark();
            let end = packer.size();
            let sec = session
                .security
                .as_mut()
                .ok_or(CryptoError::NoSecurityContext)?;
            let buf = packer.as_mut_slice();
            security::legacy_decrypt(
                sec,
                hdr.secure_checksum,
                &mut buf[cipher_start..end],
                &mac,
                allow_insecure,
            )?;
            packer.set_position(cipher_start);
        }

        let body = packer.as_mut_slice()[packer.mark()..packer.size()].to_vec();
        collab.on_fastpath_update(session, &body)
    }
}

/// Which headers [`SendPipeline::finish`] back-fills around the body,
/// matching the three reserved-prefix builders.
pub enum Envelope {
    /// No Share Control/Data wrapper; licensing and other PDUs that ride
    /// directly on the MCS Send-Data payload.
    Raw,
    /// A Share Control PDU with no Share Data Header (e.g. `CONFIRM_ACTIVE`).
    Pdu { pdu_type: ShareControlPduType },
    /// A full Data PDU: Share Control Header (`pduType = DATA`) wrapping a
    /// Share Data Header.
    DataPdu {
        pdu_type2: u8,
        share_id: u32,
        stream_id: u8,
    },
}

/// Builds one outbound frame. The three `begin_*` constructors reserve an
/// increasing header prefix so the caller can write the body at a known
/// offset; [`SendPipeline::finish`] then back-fills every outer header now
/// that the total length is known and hands the frame to the transport.
pub struct SendPipeline;

impl SendPipeline {
    fn header_reserve(session: &Session, extra: usize) -> usize {
        let fips = session.settings.encryption_method.is_fips();
        RDP_PACKET_HEADER_MAX + security::reserve_len(session.staged_flags(), fips) + extra
    }

    /// Reserves TPKT + MCS + security space only; the caller writes
    /// whatever payload rides directly on the MCS envelope (e.g. a
    /// licensing PDU).
    pub fn begin_raw<T: Transport>(
        session: &Session,
        transport: &mut T,
        body_cap: usize,
    ) -> BytePacker {
        let reserve = Self::header_reserve(session, 0);
        let mut packer = transport.send_stream_init(reserve + body_cap);
        packer.seek(reserve);
        packer
    }

    /// Additionally reserves a Share Control Header.
    pub fn begin_pdu<T: Transport>(
        session: &Session,
        transport: &mut T,
        body_cap: usize,
    ) -> BytePacker {
        let reserve = Self::header_reserve(session, share::SHARE_CONTROL_HEADER_LEN);
        let mut packer = transport.send_stream_init(reserve + body_cap);
        packer.seek(reserve);
        packer
    }

    /// Additionally reserves a Share Control Header and a Share Data Header.
    pub fn begin_data_pdu<T: Transport>(
        session: &Session,
        transport: &mut T,
        body_cap: usize,
    ) -> BytePacker {
        let reserve = Self::header_reserve(
            session,
            share::SHARE_CONTROL_HEADER_LEN + share::SHARE_DATA_HEADER_LEN,
        );
        let mut packer = transport.send_stream_init(reserve + body_cap);
        packer.seek(reserve);
        packer
    }

    /// Back-fills the Share Data Header and/or Share Control Header (inner
    /// to outer, since both only need the now-known total length), then the
    /// security envelope (encrypting/signing in place under FIPS or legacy
    /// mode), then the MCS Send-Data header and TPKT header, and finally
    /// hands the completed frame to the transport. Consumes the session's
    /// staged security flags.
    pub fn finish<T: Transport>(
        session: &mut Session,
        transport: &mut T,
        mut packer: BytePacker,
        channel_id: u16,
        envelope: Envelope,
    ) -> Result<(), RdpError> {
        const USER_DATA_START: usize = TPKT_HEADER_LEN + mcs::HEADER_LEN;

        let fips = session.settings.encryption_method.is_fips();
        let flags = session.take_staged_flags();
        let sec_reserve = security::reserve_len(flags, fips);
        let share_control_start = USER_DATA_START + sec_reserve;

        let written_end = packer.mark();

        if let Envelope::DataPdu {
            pdu_type2,
            share_id,
            stream_id,
        } = &envelope
        {
            let share_data_start = share_control_start + share::SHARE_CONTROL_HEADER_LEN;
            let body_len = (written_end - share_data_start - share::SHARE_DATA_HEADER_LEN) as u16;
            packer.set_position(share_data_start);
            share::write_data_header(&mut packer, *share_id, *stream_id, body_len, *pdu_type2);
        }

        match &envelope {
            Envelope::Pdu { pdu_type } => {
                let total_length = (written_end - share_control_start) as u16;
                packer.set_position(share_control_start);
                share::write_control_header(
                    &mut packer,
                    total_length,
                    *pdu_type,
                    session.settings.pdu_source,
                );
            }
            Envelope::DataPdu { .. } => {
                let total_length = (written_end - share_control_start) as u16;
                packer.set_position(share_control_start);
                share::write_control_header(
                    &mut packer,
                    total_length,
                    ShareControlPduType::Data,
                    session.settings.pdu_source,
                );
            }
            Envelope::Raw => {}
        }
        packer.set_position(written_end);

        let final_end = if sec_reserve == 0 {
            written_end
        } else if flags.contains(SecurityFlags::ENCRYPT) {
            let sec = session
                .security
                .as_mut()
                .ok_or(CryptoError::NoSecurityContext)?;
            if fips {
                let plaintext_len = written_end - share_control_start;
                let pad = security::fips_pad_len(plaintext_len);
                packer.set_position(written_end);
                packer.zero_fill(pad as usize);
                packer.seek(pad as usize);
                let padded_end = packer.mark();
                let signature = {
                    let buf = packer.as_mut_slice();
                    security::fips_encrypt(sec, plaintext_len, &mut buf[share_control_start..padded_end])?
                };
                packer.set_position(USER_DATA_START);
                security::write_basic_header(&mut packer, flags);
                security::write_fips_header(&mut packer, pad, &signature);
                packer.set_position(padded_end);
                padded_end
            } else {
                let secure_checksum = flags.contains(SecurityFlags::SECURE_CHECKSUM);
                let mac = {
                    let buf = packer.as_mut_slice();
                    security::legacy_encrypt(sec, secure_checksum, &mut buf[share_control_start..written_end])
                };
                packer.set_position(USER_DATA_START);
                security::write_basic_header(&mut packer, flags);
                packer.write_slice(&mac);
                packer.set_position(written_end);
                written_end
            }
        } else {
            packer.set_position(USER_DATA_START);
            security::write_basic_header(&mut packer, flags);
            packer.set_position(written_end);
            written_end
        };

        packer.set_position(0);
        write_tpkt_header(&mut packer, final_end as u16);
        mcs::write_send_data_header(
            &mut packer,
            session.settings.server_mode,
            session.mcs.user_id,
            channel_id,
            (final_end - USER_DATA_START) as u16,
        );
        packer.set_position(final_end);

        transport.write(&packer).map_err(RdpError::transport)
    }
}

const FRAME_ACKNOWLEDGE_PDU_TYPE2: u8 = 56;

/// Emits a Frame Acknowledge Data PDU (pduType2 56) carrying `frame_id`.
pub fn send_frame_ack<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    frame_id: u32,
) -> Result<(), RdpError> {
    let mut packer = SendPipeline::begin_data_pdu(session, transport, 4);
    packer.write_u32_le(frame_id);
    SendPipeline::finish(
        session,
        transport,
        packer,
        MCS_GLOBAL_CHANNEL_ID,
        Envelope::DataPdu {
            pdu_type2: FRAME_ACKNOWLEDGE_PDU_TYPE2,
            share_id: session.settings.share_id,
            stream_id: share::STREAM_LOW,
        },
    )
}

/// Emits a Refresh-Rect Data PDU with a single invalidation rectangle.
/// `code` is an embedder-supplied diagnostic tag (not part of the wire PDU);
/// it is only used for logging.
pub fn send_invalidate<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    code: u16,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
) -> Result<(), RdpError> {
    log::trace!("send_invalidate code={code} rect=({x},{y},{w},{h})");
    let mut packer = SendPipeline::begin_data_pdu(session, transport, 1 + 3 + 8);
    packer.write_u8(1); // numberOfAreas
    packer.write_slice(&[0u8; 3]); // pad3Octets
    packer.write_u16_le(x);
    packer.write_u16_le(y);
    packer.write_u16_le(x + w);
    packer.write_u16_le(y + h);
    SendPipeline::finish(
        session,
        transport,
        packer,
        MCS_GLOBAL_CHANNEL_ID,
        Envelope::DataPdu {
            pdu_type2: ShareDataPduType::RefreshRect as u8,
            share_id: session.settings.share_id,
            stream_id: share::STREAM_LOW,
        },
    )
}

/// Emits a Suppress-Output Data PDU. `allow_updates = false` asks the
/// server to stop sending update PDUs entirely; `true` asks it to resume
/// and carries the rectangle the client wants redrawn.
pub fn send_suppress_output<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    allow_updates: bool,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
) -> Result<(), RdpError> {
    let mut packer = SendPipeline::begin_data_pdu(session, transport, 4 + 8);
    packer.write_u32_le(allow_updates as u32);
    if allow_updates {
        packer.write_u16_le(x);
        packer.write_u16_le(y);
        packer.write_u16_le(x + w);
        packer.write_u16_le(y + h);
    }
    SendPipeline::finish(
        session,
        transport,
        packer,
        MCS_GLOBAL_CHANNEL_ID,
        Envelope::DataPdu {
            pdu_type2: ShareDataPduType::SuppressOutput as u8,
            share_id: session.settings.share_id,
            stream_id: share::STREAM_LOW,
        },
    )
}

/// Forwards raw bytes to a static virtual channel. The channels subsystem
/// owns chunking/fragmentation; this just wraps one MCS Send-Data frame.
pub fn send_channel_data<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    channel_id: u16,
    data: &[u8],
) -> Result<(), RdpError> {
    let mut packer = SendPipeline::begin_raw(session, transport, data.len());
    packer.write_slice(data);
    SendPipeline::finish(session, transport, packer, channel_id, Envelope::Raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EncryptionMethod, MCSContext, SecurityContext, Session, Settings};
    use crate::state::PhaseHandlers;
    use std::convert::Infallible;

    struct MemTransport {
        outbound: Vec<u8>,
    }

    impl Transport for MemTransport {
        type Error = Infallible;

        fn send_stream_init(&mut self, min_cap: usize) -> BytePacker {
            BytePacker::with_capacity(min_cap)
        }
        fn recv_stream_init(&mut self, min_cap: usize) -> BytePacker {
            BytePacker::with_capacity(min_cap)
        }
        fn write(&mut self, packer: &BytePacker) -> Result<(), Infallible> {
            self.outbound = packer.as_slice().to_vec();
            Ok(())
        }
        fn read(&mut self, _packer: &mut BytePacker) -> Result<usize, Infallible> {
            Ok(0)
        }
        fn set_blocking_mode(&mut self, _blocking: bool) {}
        fn check_fds(&mut self) -> Result<usize, Infallible> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct TestCollab {
        last_body: Vec<u8>,
        channel_data: Vec<(u16, Vec<u8>)>,
    }

    impl PhaseHandlers for TestCollab {
        fn on_connect_response(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
        fn on_attach_user_confirm(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
        fn on_channel_join_confirm(&mut self, _pdu: &mut BytePacker) -> Result<bool, RdpError> {
            Ok(true)
        }
        fn on_license(&mut self, _pdu: &mut BytePacker) -> Result<bool, RdpError> {
            Ok(true)
        }
        fn on_demand_active(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
    }

    impl handlers::ShareDataHandler for TestCollab {
        fn on_update(&mut self, _session: &mut Session, body: &[u8]) -> Result<(), RdpError> {
            self.last_body = body.to_vec();
            Ok(())
        }
    }

    impl Collaborators for TestCollab {
        fn on_channel_data(
            &mut self,
            _session: &mut Session,
            channel_id: u16,
            body: &[u8],
        ) -> Result<(), RdpError> {
            self.channel_data.push((channel_id, body.to_vec()));
            Ok(())
        }
    }

    fn active_session() -> Session {
        let mut session = Session::new(Settings::default());
        for p in Phase::ALL_IN_ORDER.iter().skip(1) {
            session.state.advance_to(*p).unwrap();
        }
        session.mcs = MCSContext { user_id: 1007 };
        session
    }

    #[test]
    fn round_trip_unencrypted_data_pdu() {
        let mut session = active_session();
        let mut transport = MemTransport {
            outbound: Vec::new(),
        };

        let mut packer = SendPipeline::begin_data_pdu(&session, &mut transport, 4);
        packer.write_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        SendPipeline::finish(
            &mut session,
            &mut transport,
            packer,
            MCS_GLOBAL_CHANNEL_ID,
            Envelope::DataPdu {
                pdu_type2: ShareDataPduType::Update as u8,
                share_id: session.settings.share_id,
                stream_id: share::STREAM_LOW,
            },
        )
        .unwrap();

        let mut recv = BytePacker::from_filled(transport.outbound.clone());
        let mut collab = TestCollab::default();
        ReceivePipeline::process(&mut session, &mut collab, &mut recv).unwrap();
        assert_eq!(collab.last_body, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn multi_pdu_envelope_iterates_each_share_control_pdu() {
        let mut session = active_session();

        // Hand-build a frame with two Share Control PDUs stacked in one MCS
        // envelope: a short (4-byte, no pduSource) DEACTIVATE_ALL followed
        // by a full Data PDU.
        let mut body = BytePacker::with_capacity(64);
        body.write_u16_le(4);
        body.write_u16_le((ShareControlPduType::DeactivateAll as u16) | 0x10);
        let data_pdu_start = body.length();
        share::write_control_header(&mut body, 0, ShareControlPduType::Data, 1007);
        share::write_data_header(&mut body, 0, share::STREAM_LOW, 2, ShareDataPduType::Update as u8);
        body.write_slice(&[0x11, 0x22]);
        let data_pdu_end = body.length();
        body.set_position(data_pdu_start);
        share::write_control_header(
            &mut body,
            (data_pdu_end - data_pdu_start) as u16,
            ShareControlPduType::Data,
            1007,
        );
        body.set_position(data_pdu_end);

        let mut transport = MemTransport {
            outbound: Vec::new(),
        };
        let mut packer = SendPipeline::begin_raw(&session, &mut transport, body.length());
        packer.write_slice(body.as_slice());
        SendPipeline::finish(
            &mut session,
            &mut transport,
            packer,
            MCS_GLOBAL_CHANNEL_ID,
            Envelope::Raw,
        )
        .unwrap();

        let mut recv = BytePacker::from_filled(transport.outbound.clone());
        let mut collab = TestCollab::default();
        ReceivePipeline::process(&mut session, &mut collab, &mut recv).unwrap();
        assert_eq!(collab.last_body, vec![0x11, 0x22]);
    }

    #[test]
    fn round_trip_legacy_encrypted_data_pdu() {
        let mut session = active_session();
        session.settings.encryption = true;
        session.settings.encryption_method = EncryptionMethod::Bit128;
        session.security = Some(SecurityContext {
            encrypt_key: vec![0x11; 16],
            decrypt_key: vec![0x11; 16],
            mac_key: vec![0x22; 16],
            fips_key: [0x33; 24],
            fips_iv: [0x44; 8],
            fips_mac_key: vec![0x55; 20],
            encrypt_count: 0,
            decrypt_count: 0,
        });
        session.stage_flags(SecurityFlags::ENCRYPT);

        let mut transport = MemTransport {
            outbound: Vec::new(),
        };
        let mut packer = SendPipeline::begin_data_pdu(&session, &mut transport, 4);
        packer.write_slice(&[1, 2, 3, 4]);
        SendPipeline::finish(
            &mut session,
            &mut transport,
            packer,
            MCS_GLOBAL_CHANNEL_ID,
            Envelope::DataPdu {
                pdu_type2: ShareDataPduType::Update as u8,
                share_id: session.settings.share_id,
                stream_id: share::STREAM_LOW,
            },
        )
        .unwrap();

        let mut recv = BytePacker::from_filled(transport.outbound.clone());
        let mut collab = TestCollab::default();
        ReceivePipeline::process(&mut session, &mut collab, &mut recv).unwrap();
        assert_eq!(collab.last_body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn disconnect_provider_ultimatum_latches_and_is_idempotent() {
        let mut session = active_session();
        let mut p = BytePacker::with_capacity(16);
        write_tpkt_header(&mut p, 0); // placeholder, fixed below
        let mcs_start = p.length();
        p.write_u8(8 << 2); // DisconnectProviderUltimatum choice
        p.write_u8(0); // reason
        let total = p.length() as u16;
        p.set_position(0);
        write_tpkt_header(&mut p, total);
        p.set_position(total as usize);
        let _ = mcs_start;

        let mut recv = BytePacker::from_filled(p.as_slice().to_vec());
        let mut collab = TestCollab::default();
        ReceivePipeline::process(&mut session, &mut collab, &mut recv).unwrap();
        assert!(session.disconnect);

        // A second call on an already-disconnected session is a no-op.
        let mut recv2 = BytePacker::from_filled(vec![]);
        ReceivePipeline::process(&mut session, &mut collab, &mut recv2).unwrap();
    }

    #[test]
    fn send_suppress_output_encodes_allow_updates_and_rect() {
        let mut session = active_session();
        let mut transport = MemTransport {
            outbound: Vec::new(),
        };
        send_suppress_output(&mut session, &mut transport, true, 10, 20, 30, 40).unwrap();

        let mut recv = BytePacker::from_filled(transport.outbound.clone());
        read_tpkt_header(&mut recv).unwrap();
        match mcs::read_header(&mut recv).unwrap() {
            McsDecoded::Data { channel_id, .. } => assert_eq!(channel_id, MCS_GLOBAL_CHANNEL_ID),
            McsDecoded::Disconnect => panic!("unexpected disconnect"),
        }
        let control_hdr = share::read_control_header(&mut recv).unwrap();
        assert_eq!(control_hdr.pdu_type, ShareControlPduType::Data);
        let data_hdr = share::read_data_header(&mut recv).unwrap();
        assert_eq!(data_hdr.pdu_type2, ShareDataPduType::SuppressOutput as u8);

        let body = recv.as_mut_slice()[recv.mark()..recv.size()].to_vec();
        assert_eq!(body.len(), 4 + 8);
        assert_eq!(&body[0..4], &1u32.to_le_bytes());
        assert_eq!(u16::from_le_bytes([body[4], body[5]]), 10);
        assert_eq!(u16::from_le_bytes([body[6], body[7]]), 20);
        assert_eq!(u16::from_le_bytes([body[8], body[9]]), 40);
        assert_eq!(u16::from_le_bytes([body[10], body[11]]), 60);
    }

    #[test]
    fn send_suppress_output_omits_rect_when_updates_disallowed() {
        let mut session = active_session();
        let mut transport = MemTransport {
            outbound: Vec::new(),
        };
        send_suppress_output(&mut session, &mut transport, false, 0, 0, 0, 0).unwrap();

        let mut recv = BytePacker::from_filled(transport.outbound.clone());
        read_tpkt_header(&mut recv).unwrap();
        mcs::read_header(&mut recv).unwrap();
        share::read_control_header(&mut recv).unwrap();
        let data_hdr = share::read_data_header(&mut recv).unwrap();

        let body = recv.as_mut_slice()[recv.mark()..recv.size()].to_vec();
        assert_eq!(body, 0u32.to_le_bytes());
        assert_eq!(data_hdr.pdu_type2, ShareDataPduType::SuppressOutput as u8);
    }
}
