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

//! Wire-exact RDP PDU framing, security envelope, and connection state
//! machine.
//!
//! This crate owns the wire format and the phase sequencing of an RDP
//! client connection: TPKT/MCS framing, the Basic Security Header and its
//! two encryption schemes, the Share Control/Share Data envelopes, the
//! fast-path alternative, MPPC decompression, and the phase state machine
//! that sequences the handshake. It does not open sockets, parse
//! capability sets, render anything, or multiplex virtual channels; those
//! are all embedder concerns, reached through the [`transport::Transport`],
//! [`state::PhaseHandlers`], and [`handlers::Collaborators`] traits.
//!
//! A typical embedder holds one [`session::Session`], implements
//! [`handlers::Collaborators`] for its own connection object, and drives
//! the handshake and steady-state traffic through
//! [`pipeline::ReceivePipeline::process`] and [`pipeline::SendPipeline`].

mod compression;
mod error_info;
mod errors;
mod handlers;
mod packer;
pub mod pdu;
mod pipeline;
mod session;
mod state;
mod transport;

pub use compression::{CompressionType, Decompressor, COMPRESSED_LENGTH_HEADER_OFFSET};
pub use error_info::ErrorInfo;
pub use errors::{CryptoError, DecompressError, FrameError, PhaseError, RdpError, Result};
pub use handlers::{Collaborators, ShareDataHandler};
pub use packer::BytePacker;
pub use pipeline::{
    send_channel_data, send_frame_ack, send_invalidate, send_suppress_output, Envelope,
    ReceivePipeline, SendPipeline, RDP_PACKET_HEADER_MAX,
};
pub use session::{EncryptionMethod, MCSContext, SecurityContext, Session, Settings};
pub use state::{ConnectionStateMachine, FinalizeSc, Phase, PhaseHandlers};
pub use transport::Transport;
