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

//! Decode table for the `errorInfo` field of the Set-Error-Info Data PDU.
//!
//! The codes are grouped the way the protocol documents them: a handful of
//! protocol-independent disconnect reasons, a licensing block, a connection
//! broker block, and a large RDP-specific block. The framer only stores the
//! raw code on the session (§4.8); `description()` is a convenience for
//! embedders that want to log or surface it without maintaining their own
//! copy of the table.

/// A server-reported disconnect/error code, as seen in the Set-Error-Info
/// Data PDU (`pduType2 = 0x2F`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorInfo(pub u32);

impl ErrorInfo {
    pub const NONE: ErrorInfo = ErrorInfo(0x0000_0000);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// A human-readable description, matching the layout (if not the exact
    /// wording) of the protocol's own error-info table: protocol-independent
    /// codes first, then licensing, then connection-broker, then the large
    /// RDP-specific block.
    pub fn description(&self) -> &'static str {
        match self.0 {
            0x0000_0000 => "no error",

            // Protocol-independent disconnect reasons.
            0x0000_0001 => "the server initiated an RPC disconnect",
            0x0000_0002 => "the server initiated an RPC logoff",
            0x0000_0003 => "the client's idle timeout elapsed",
            0x0000_0004 => "the client's logon timeout elapsed",
            0x0000_0005 => "another connection preempted this session",
            0x0000_0006 => "the server ran out of memory",
            0x0000_0007 => "the server denied the connection",
            0x0000_0009 => "the server denied the connection for insufficient privileges",
            0x0000_000A => "fresh credentials are required to reconnect",
            0x0000_000B => "the RPC channel was disconnected by the user",
            0x0000_000C => "the user logged off",

            // Licensing codes.
            0x0000_0100 => "internal licensing error",
            0x0000_0101 => "no license server was available",
            0x0000_0102 => "no license was available for this connection",
            0x0000_0103 => "the license server received a malformed client message",
            0x0000_0104 => "the hardware id does not match the license",
            0x0000_0105 => "the client's license is invalid",
            0x0000_0106 => "the licensing protocol could not be completed",
            0x0000_0107 => "the client ended the licensing protocol",
            0x0000_0108 => "the client's license encryption is unsupported",
            0x0000_0109 => "the license could not be upgraded",
            0x0000_010A => "the license server does not allow remote connections",

            // Connection-broker / session-directory codes.
            0x0000_0400 => "the connection broker session redirection failed",
            0x0000_0401 => "the target farm is not online",
            0x0000_0402 => "the destination endpoint could not be found",
            0x0000_0403 => "the target session is not accepting new connections",
            0x0000_0404 => "the connection broker failed to load balance the session",

            // RDP-specific errors (large block starting at 0x1000).
            0x0000_1001 => "an unrecognized Data PDU type was received",
            0x0000_1002 => "an unrecognized Share Control PDU type was received",
            0x0000_1003 => "a PDU arrived in the wrong connection phase",
            0x0000_1004 => "a data compression type was unsupported",
            0x0000_1005 => "a capability set was malformed",
            0x0000_1006 => "the client rejected a server-initiated graphics mode change",
            0x0000_1007 => "the client's color depth is not supported by the server",
            0x0000_1008 => "an update PDU declared an invalid rectangle",
            0x0000_1009 => "the server rejected the client's security capabilities",
            0x0000_100A => "the security commencement handshake failed",
            0x0000_100B => "the multitransport request failed",

            _ => "unrecognized error-info code",
        }
    }
}

impl From<u32> for ErrorInfo {
    fn from(code: u32) -> Self {
        ErrorInfo(code)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x} ({})", self.0, self.description())
    }
}
