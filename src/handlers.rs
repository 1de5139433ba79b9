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

//! The Data-PDU router, expressed as a trait so an embedder implements only
//! the `pduType2` values it cares about. Default methods no-op except for
//! the handful that the framer itself must observe to drive the
//! finalization completion mask or the server error-info slot.

use crate::errors::RdpError;
use crate::error_info::ErrorInfo;
use crate::pdu::types::ShareDataPduType;
use crate::session::Session;
use crate::state::{FinalizeSc, PhaseHandlers};

const CTRLACTION_REQUEST_CONTROL: u16 = 1;
const CTRLACTION_GRANTED_CONTROL: u16 = 2;
const CTRLACTION_DETACH: u16 = 3;
const CTRLACTION_COOPERATE: u16 = 4;

/// Dispatch target for Data PDUs reaching `ShareDataPduType::Data`'s payload.
/// `body` is the Share Data Header's payload: already decompressed if
/// `PACKET_COMPRESSED` was set, still borrowed from the decompressor's
/// history buffer in that case (see [`crate::compression::Decompressor`]).
pub trait ShareDataHandler {
    fn on_update(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }

    /// Observes the `action` subfield enough to drive the finalization
    /// mask (`CONTROL_COOPERATE`/`CONTROL_GRANTED`); anything else about
    /// the Control PDU belongs to the capability-exchange collaborator.
    fn on_control(&mut self, session: &mut Session, body: &[u8]) -> Result<(), RdpError> {
        if body.len() >= 2 {
            let action = u16::from_le_bytes([body[0], body[1]]);
            match action {
                CTRLACTION_COOPERATE => {
                    session.state.note_finalize_pdu(FinalizeSc::CONTROL_COOPERATE)?
                }
                CTRLACTION_GRANTED_CONTROL => {
                    session.state.note_finalize_pdu(FinalizeSc::CONTROL_GRANTED)?
                }
                CTRLACTION_REQUEST_CONTROL | CTRLACTION_DETACH => {}
                _ => log::trace!("unrecognized control action {action:#06x}"),
            }
        }
        Ok(())
    }

    fn on_pointer(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }

    fn on_synchronize(&mut self, session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        session.state.note_finalize_pdu(FinalizeSc::SYNCHRONIZE)?;
        Ok(())
    }

    fn on_play_sound(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }

    fn on_save_session_info(
        &mut self,
        _session: &mut Session,
        _body: &[u8],
    ) -> Result<(), RdpError> {
        Ok(())
    }

    fn on_font_map(&mut self, session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        session.state.note_finalize_pdu(FinalizeSc::FONT_MAP)?;
        Ok(())
    }

    /// Stores the reported code on the session and logs a diagnostic when
    /// nonzero. Does not terminate the session; the embedder decides what
    /// to do with a nonzero `error_info`.
    fn on_set_error_info(&mut self, session: &mut Session, body: &[u8]) -> Result<(), RdpError> {
        if body.len() >= 4 {
            let code = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
            let info = ErrorInfo(code);
            if !info.is_none() {
                log::warn!("server reported error info: {info}");
            }
            session.error_info = info;
        }
        Ok(())
    }

    /// Any `pduType2` not covered above. The framer still decodes the
    /// Share Data Header and hands over the body; the default does nothing.
    fn unhandled(&mut self, pdu_type2: u8, _body: &[u8]) -> Result<(), RdpError> {
        log::trace!(
            "unhandled Data PDU {:#04x} ({})",
            pdu_type2,
            crate::pdu::types::share_data_pdu_type_name(pdu_type2)
        );
        Ok(())
    }
}

/// Everything [`crate::pipeline::ReceivePipeline`] needs from the embedder,
/// gathered into one trait so a caller implements it once rather than
/// threading several collaborator objects through every `process` call.
/// Default methods cover the PDUs this crate treats as pass-through (channel
/// multiplexing, the display/graphics fast-path updates, and server
/// redirection all live one layer up); an embedder overrides only what it
/// needs.
pub trait Collaborators: PhaseHandlers + ShareDataHandler {
    /// A `Server Redirection` Share Control PDU, or a Basic Security Header
    /// with `REDIRECTION_PKT` set. The body is the raw PDU payload past
    /// whichever header was already consumed.
    fn on_redirect(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }

    /// A `DEACTIVATE_ALL` Share Control PDU: the server is about to restart
    /// the capability-exchange sequence.
    fn on_deactivate_all(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }

    /// An MCS `SendDataIndication` addressed to a static virtual channel
    /// other than the I/O channel.
    fn on_channel_data(
        &mut self,
        _session: &mut Session,
        _channel_id: u16,
        _body: &[u8],
    ) -> Result<(), RdpError> {
        Ok(())
    }

    /// One fast-path update PDU, decrypted but not otherwise parsed.
    fn on_fastpath_update(&mut self, _session: &mut Session, _body: &[u8]) -> Result<(), RdpError> {
        Ok(())
    }
}

/// Routes one Data PDU body to the matching [`ShareDataHandler`] method.
pub fn dispatch<H: ShareDataHandler>(
    handler: &mut H,
    session: &mut Session,
    pdu_type2: u8,
    body: &[u8],
) -> Result<(), RdpError> {
    use num_traits::FromPrimitive;
    match ShareDataPduType::from_u8(pdu_type2) {
        Some(ShareDataPduType::Update) => handler.on_update(session, body),
        Some(ShareDataPduType::Control) => handler.on_control(session, body),
        Some(ShareDataPduType::Pointer) => handler.on_pointer(session, body),
        Some(ShareDataPduType::Synchronize) => handler.on_synchronize(session, body),
        Some(ShareDataPduType::PlaySound) => handler.on_play_sound(session, body),
        Some(ShareDataPduType::SaveSessionInfo) => handler.on_save_session_info(session, body),
        Some(ShareDataPduType::FontMap) => handler.on_font_map(session, body),
        Some(ShareDataPduType::SetErrorInfo) => handler.on_set_error_info(session, body),
        _ => handler.unhandled(pdu_type2, body),
    }
}
