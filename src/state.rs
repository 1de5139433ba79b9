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

//! The connection-phase state machine.
//!
//! Modeled as a tagged variant rather than a bare integer, per the redesign
//! note: each phase is a distinct [`Phase`] value, and [`PhaseHandlers`] gives
//! every phase its own dispatch method instead of one handler switching on an
//! opaque state number. Adding a phase means adding both an enum arm and a
//! trait method, so the two can't drift apart silently.

use crate::errors::{PhaseError, RdpError};
use crate::packer::BytePacker;

bitflags::bitflags! {
    /// Tracks which of the four finalization-phase Data PDUs have arrived.
    /// `FINALIZATION -> ACTIVE` only happens once all four bits are set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FinalizeSc: u8 {
        const SYNCHRONIZE       = 0b0001;
        const CONTROL_COOPERATE = 0b0010;
        const CONTROL_GRANTED   = 0b0100;
        const FONT_MAP          = 0b1000;
    }
}

impl FinalizeSc {
    pub const FINALIZE_SC_COMPLETE: FinalizeSc = FinalizeSc::all();
}

/// The connection's current phase. Ordinal order is the only order these
/// variants may legally advance in ([`ConnectionStateMachine::advance_to`]
/// rejects anything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Nego,
    McsConnect,
    McsAttachUser,
    McsChannelJoin,
    License,
    Capability,
    Finalization,
    Active,
}

impl Phase {
    pub const ALL_IN_ORDER: [Phase; 8] = [
        Phase::Nego,
        Phase::McsConnect,
        Phase::McsAttachUser,
        Phase::McsChannelJoin,
        Phase::License,
        Phase::Capability,
        Phase::Finalization,
        Phase::Active,
    ];
}

/// Per-phase collaborators. Every method but the finalization/active ones
/// (handled internally, since they're plain Data PDU receive) corresponds to
/// one bullet in the phase dispatch table: the state machine owns *when* a
/// handler runs, the embedder owns *what* the handler parses.
pub trait PhaseHandlers {
    /// Parses a connect-response during `NEGO`.
    fn on_connect_response(&mut self, pdu: &mut BytePacker) -> Result<(), RdpError>;

    /// Parses an attach-user-confirm during `MCS_ATTACH_USER`.
    fn on_attach_user_confirm(&mut self, pdu: &mut BytePacker) -> Result<(), RdpError>;

    /// Parses one channel-join-confirm. Returns `true` once every requested
    /// channel has been joined (the state machine may need several calls).
    fn on_channel_join_confirm(&mut self, pdu: &mut BytePacker) -> Result<bool, RdpError>;

    /// Processes one license-exchange PDU. Returns `true` when licensing is
    /// complete (including the no-license-required short circuit).
    fn on_license(&mut self, pdu: &mut BytePacker) -> Result<bool, RdpError>;

    /// Parses a demand-active PDU and sends the confirm-active response.
    /// Completion always moves to `FINALIZATION`.
    fn on_demand_active(&mut self, pdu: &mut BytePacker) -> Result<(), RdpError>;
}

/// Drives the connection's phase transitions. Holds only the
/// phase itself and the finalization completion mask; everything
/// phase-specific is delegated to [`PhaseHandlers`].
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    phase: Phase,
    finalize_sc_pdus: FinalizeSc,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Nego,
            finalize_sc_pdus: FinalizeSc::empty(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`. Phases only ever move forward; anything else is a
    /// programming error surfaced as [`PhaseError::NonMonotonic`].
    pub fn advance_to(&mut self, next: Phase) -> Result<(), PhaseError> {
        if next <= self.phase {
            return Err(PhaseError::NonMonotonic {
                from: self.phase,
                to: next,
            });
        }
        log::debug!("connection phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Records the arrival of one finalization Data PDU and, if the
    /// completion mask is now full and we're in `FINALIZATION`, advances to
    /// `ACTIVE`.
    pub fn note_finalize_pdu(&mut self, which: FinalizeSc) -> Result<(), PhaseError> {
        self.finalize_sc_pdus |= which;
        if self.phase == Phase::Finalization
            && self.finalize_sc_pdus.contains(FinalizeSc::FINALIZE_SC_COMPLETE)
        {
            self.advance_to(Phase::Active)?;
        }
        Ok(())
    }

    /// Dispatches one inbound frame to the handler for the current phase.
    /// `FINALIZATION` and `ACTIVE` are not handled here: both are "normal PDU
    /// receive", driven by [`crate::pipeline::ReceivePipeline`] and the
    /// `ShareDataHandler` router instead.
    pub fn dispatch<H: PhaseHandlers>(
        &mut self,
        handlers: &mut H,
        pdu: &mut BytePacker,
    ) -> Result<(), RdpError> {
        match self.phase {
            Phase::Nego => {
                handlers.on_connect_response(pdu)?;
                self.advance_to(Phase::McsConnect)?;
            }
            Phase::McsConnect => {
                // The MCS connect sequence (connect-initial/response,
                // erect-domain, attach-user-request) is itself a fixed
                // handshake with no branching; once the embedder signals it
                // sent attach-user-request we just wait in ATTACH_USER.
                self.advance_to(Phase::McsAttachUser)?;
            }
            Phase::McsAttachUser => {
                handlers.on_attach_user_confirm(pdu)?;
                self.advance_to(Phase::McsChannelJoin)?;
            }
            Phase::McsChannelJoin => {
                if handlers.on_channel_join_confirm(pdu)? {
                    self.advance_to(Phase::License)?;
                }
            }
            Phase::License => {
                if handlers.on_license(pdu)? {
                    self.advance_to(Phase::Capability)?;
                }
            }
            Phase::Capability => {
                handlers.on_demand_active(pdu)?;
                self.advance_to(Phase::Finalization)?;
            }
            Phase::Finalization | Phase::Active => {
                return Err(PhaseError::NoHandler { phase: self.phase }.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandlers {
        joins_remaining: u32,
        license_rounds_remaining: u32,
    }

    impl PhaseHandlers for NoopHandlers {
        fn on_connect_response(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
        fn on_attach_user_confirm(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
        fn on_channel_join_confirm(&mut self, _pdu: &mut BytePacker) -> Result<bool, RdpError> {
            self.joins_remaining = self.joins_remaining.saturating_sub(1);
            Ok(self.joins_remaining == 0)
        }
        fn on_license(&mut self, _pdu: &mut BytePacker) -> Result<bool, RdpError> {
            self.license_rounds_remaining = self.license_rounds_remaining.saturating_sub(1);
            Ok(self.license_rounds_remaining == 0)
        }
        fn on_demand_active(&mut self, _pdu: &mut BytePacker) -> Result<(), RdpError> {
            Ok(())
        }
    }

    #[test]
    fn phases_advance_in_order_up_to_finalization() {
        let mut sm = ConnectionStateMachine::new();
        let mut h = NoopHandlers {
            joins_remaining: 2,
            license_rounds_remaining: 1,
        };
        let mut pdu = BytePacker::from_filled(vec![]);

        sm.dispatch(&mut h, &mut pdu).unwrap(); // NEGO -> MCS_CONNECT
        assert_eq!(sm.phase(), Phase::McsConnect);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // -> MCS_ATTACH_USER
        assert_eq!(sm.phase(), Phase::McsAttachUser);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // -> MCS_CHANNEL_JOIN
        assert_eq!(sm.phase(), Phase::McsChannelJoin);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // one join left
        assert_eq!(sm.phase(), Phase::McsChannelJoin);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // all joined -> LICENSE
        assert_eq!(sm.phase(), Phase::License);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // -> CAPABILITY
        assert_eq!(sm.phase(), Phase::Capability);
        sm.dispatch(&mut h, &mut pdu).unwrap(); // -> FINALIZATION
        assert_eq!(sm.phase(), Phase::Finalization);
    }

    #[test]
    fn finalization_completes_only_once_all_four_pdus_seen() {
        let mut sm = ConnectionStateMachine::new();
        sm.advance_to(Phase::McsConnect).unwrap();
        sm.advance_to(Phase::McsAttachUser).unwrap();
        sm.advance_to(Phase::McsChannelJoin).unwrap();
        sm.advance_to(Phase::License).unwrap();
        sm.advance_to(Phase::Capability).unwrap();
        sm.advance_to(Phase::Finalization).unwrap();

        sm.note_finalize_pdu(FinalizeSc::SYNCHRONIZE).unwrap();
        sm.note_finalize_pdu(FinalizeSc::CONTROL_COOPERATE).unwrap();
        sm.note_finalize_pdu(FinalizeSc::CONTROL_GRANTED).unwrap();
        assert_eq!(sm.phase(), Phase::Finalization);
        sm.note_finalize_pdu(FinalizeSc::FONT_MAP).unwrap();
        assert_eq!(sm.phase(), Phase::Active);
    }

    #[test]
    fn non_monotonic_transition_is_rejected() {
        let mut sm = ConnectionStateMachine::new();
        sm.advance_to(Phase::McsConnect).unwrap();
        assert!(sm.advance_to(Phase::Nego).is_err());
    }
}
