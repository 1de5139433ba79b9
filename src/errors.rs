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

//! Error taxonomy for the pipeline. One `thiserror` enum per concern, folded
//! into [`RdpError`] at the API boundary. Transport errors are carried
//! opaquely (this crate does not know or care what kind of transport it's
//! given) rather than interpreted.

use crate::state::Phase;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("declared length {declared} exceeds {remaining} remaining bytes")]
    DeclaredLengthExceedsBuffer { declared: usize, remaining: usize },

    #[error("invalid PER length determinant")]
    PerLength,

    #[error("unrecognized MCS PDU choice {0:#04x}")]
    UnknownMcsChoice(u8),

    #[error("share control header declares implausible length {0}")]
    ShortShareControlHeader(usize),

    #[error("unrecognized fast-path action {0:#04x}")]
    UnknownFastPathAction(u8),

    #[error("TPKT header version byte {0:#04x} is not 3")]
    BadTpktVersion(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("FIPS signature verification failed")]
    FipsSignatureMismatch,

    #[error("FIPS ciphertext length {0} is not a multiple of 8")]
    FipsUnalignedCiphertext(usize),

    #[error("legacy MAC verification failed")]
    LegacyMacMismatch,

    #[error("encryption requested with no security context established")]
    NoSecurityContext,
}

#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("copy offset {offset} exceeds history size {history_len}")]
    OffsetOutOfRange { offset: usize, history_len: usize },

    #[error("decompressed output would exceed the history buffer")]
    OutputOverflow,

    #[error("bitstream exhausted while decoding a tuple")]
    BitstreamUnderrun,

    #[error("unrecognized compression type flags {0:#04x}")]
    UnknownCompressionType(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("no handler registered for phase {phase:?}")]
    NoHandler { phase: Phase },

    #[error("handler rejected a frame during phase {phase:?}: {reason}")]
    Rejected { phase: Phase, reason: String },

    #[error("phase transitions must move forward: {from:?} -> {to:?}")]
    NonMonotonic { from: Phase, to: Phase },
}

/// The crate-wide error type. Transport errors are boxed rather than
/// interpreted: we don't know whether the embedder is backed by a TCP
/// socket, a TLS stream, or something else, and the protocol layer has no
/// business trying to recover from I/O failures on its own.
#[derive(Debug, thiserror::Error)]
pub enum RdpError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Decompress(#[from] DecompressError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl RdpError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RdpError::Transport(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RdpError>;
