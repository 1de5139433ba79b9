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

//! The root aggregate: [`Session`], [`Settings`], [`MCSContext`], plus the
//! re-exported [`SecurityContext`].

use crate::compression::{CompressionType, Decompressor};
use crate::error_info::ErrorInfo;
use crate::pdu::mcs::MCS_BASE_CHANNEL_ID;
pub use crate::pdu::security::SecurityContext;
use crate::pdu::security::SecurityFlags;
use crate::state::ConnectionStateMachine;

/// `Settings::encryption_method`. Determines both the cipher (RC4 vs 3DES)
/// and, transitively, whether the FIPS security header is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    Bit40,
    Bit56,
    Bit128,
    Fips,
}

impl EncryptionMethod {
    pub fn is_fips(self) -> bool {
        matches!(self, EncryptionMethod::Fips)
    }

    pub fn is_encrypted(self) -> bool {
        !matches!(self, EncryptionMethod::None)
    }
}

/// Read-mostly connection parameters, populated by the handshake and
/// otherwise stable for the life of the session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub encryption: bool,
    pub encryption_method: EncryptionMethod,
    pub server_mode: bool,
    pub share_id: u32,
    pub pdu_source: u16,
    pub frame_acknowledge: bool,
    /// When `false` (the default), a legacy-mode MAC mismatch is a hard
    /// failure. Set `true` only to reproduce the original's
    /// always-accept-and-warn behavior for interop with non-conformant
    /// peers; see the crypto module's design note.
    pub legacy_insecure_mac_accept: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption: false,
            encryption_method: EncryptionMethod::None,
            server_mode: false,
            share_id: 0,
            pdu_source: 0,
            frame_acknowledge: true,
            legacy_insecure_mac_accept: false,
        }
    }
}

/// Local MCS identity, assigned once `MCS_ATTACH_USER` completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MCSContext {
    pub user_id: u16,
}

impl MCSContext {
    pub fn initiator_offset(&self) -> u16 {
        self.user_id.wrapping_sub(MCS_BASE_CHANNEL_ID)
    }
}

/// The root aggregate. Owns everything a running connection needs except
/// the transport itself and the subsystem collaborators, which the
/// embedder holds and passes in where needed (this crate is single
/// threaded and doesn't stash trait objects it doesn't own).
pub struct Session {
    pub settings: Settings,
    pub mcs: MCSContext,
    pub security: Option<SecurityContext>,
    pub state: ConnectionStateMachine,
    pub decompressor: Decompressor,
    /// Flags staged for the next outbound frame; consumed and cleared by
    /// every successful `SendPipeline` call.
    sec_flags: SecurityFlags,
    /// Set by a `DisconnectProviderUltimatum` or external tear-down;
    /// observed at the top of each receive iteration.
    pub disconnect: bool,
    pub error_info: ErrorInfo,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            mcs: MCSContext::default(),
            security: None,
            state: ConnectionStateMachine::new(),
            decompressor: Decompressor::new(CompressionType::K8),
            sec_flags: SecurityFlags::empty(),
            disconnect: false,
            error_info: ErrorInfo::NONE,
        }
    }

    pub fn stage_flags(&mut self, flags: SecurityFlags) {
        self.sec_flags |= flags;
    }

    pub fn staged_flags(&self) -> SecurityFlags {
        self.sec_flags
    }

    /// Consumes and clears the staged flags; called once per successful
    /// outbound frame.
    pub fn take_staged_flags(&mut self) -> SecurityFlags {
        std::mem::replace(&mut self.sec_flags, SecurityFlags::empty())
    }
}
