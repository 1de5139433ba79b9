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

//! The transport boundary. This crate never touches a socket directly;
//! an embedder implements [`Transport`] over whatever reliable byte stream
//! it has (TCP, TLS, an in-memory pipe for tests) and hands it to the
//! send/receive pipelines.

use crate::packer::BytePacker;

/// A reliable, ordered byte-stream transport. Blocking/non-blocking mode is
/// entirely the transport's concern; this crate only toggles it.
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Hands out a packer with at least `min_cap` bytes of writable space,
    /// for the caller to fill before [`Transport::write`].
    fn send_stream_init(&mut self, min_cap: usize) -> BytePacker;

    /// Hands out a packer with at least `min_cap` bytes of capacity, for
    /// [`Transport::read`] to fill.
    fn recv_stream_init(&mut self, min_cap: usize) -> BytePacker;

    /// Writes the packer's logical contents. One call is one transport
    /// write; this crate never splits a frame across multiple writes.
    fn write(&mut self, packer: &BytePacker) -> Result<(), Self::Error>;

    /// Fills `packer` with exactly one inbound frame's worth of bytes and
    /// returns the number of bytes read.
    fn read(&mut self, packer: &mut BytePacker) -> Result<usize, Self::Error>;

    fn set_blocking_mode(&mut self, blocking: bool);

    /// Non-blocking integration point: drains any ready file descriptors
    /// and returns how many were serviced.
    fn check_fds(&mut self) -> Result<usize, Self::Error>;
}
