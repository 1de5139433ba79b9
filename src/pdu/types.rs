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

//! PDU type enumerations for the Share Control and Share Data envelopes.

use num_derive::{FromPrimitive, ToPrimitive};

/// The low nibble of the Share Control Header's `pduType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ShareControlPduType {
    DemandActive = 0x1,
    ConfirmActive = 0x3,
    DeactivateAll = 0x6,
    Data = 0x7,
    ServerRedirect = 0xa,
}

/// The Share Data Header's `pduType2` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ShareDataPduType {
    Update = 0x02,
    Control = 0x14,
    Pointer = 0x1B,
    Input = 0x1C,
    Synchronize = 0x1F,
    RefreshRect = 0x21,
    PlaySound = 0x22,
    SuppressOutput = 0x23,
    ShutdownRequest = 0x24,
    ShutdownDenied = 0x25,
    SaveSessionInfo = 0x26,
    FontList = 0x27,
    FontMap = 0x28,
    SetErrorInfo = 0x2F,
    MonitorLayout = 0x37,
}

/// A human-readable name for a `pduType2` value, for logging. This is a
/// plain table, not the concatenated-string table from the original source
/// (whose missing comma after the "Monitor Layout" entry made every index
/// from 0x38 through 0x40 resolve to the same mis-joined string); every
/// entry here names exactly one PDU type, known or not.
pub fn share_data_pdu_type_name(pdu_type2: u8) -> &'static str {
    match pdu_type2 {
        0x02 => "Update",
        0x14 => "Control",
        0x1B => "Pointer",
        0x1C => "Input",
        0x1F => "Synchronize",
        0x21 => "Refresh Rect",
        0x22 => "Play Sound",
        0x23 => "Suppress Output",
        0x24 => "Shutdown Request",
        0x25 => "Shutdown Denied",
        0x26 => "Save Session Info",
        0x27 => "Font List",
        0x28 => "Font Map",
        0x2F => "Set Error Info",
        0x37 => "Monitor Layout",
        _ => "Unknown",
    }
}
