// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Deadline-bounded polling

use std::time::{Duration, Instant};

use crate::abort::AbortFlag;
use crate::error::TransferError;

/// What a state machine was waiting for when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    HeaderAck,
    BlockAck,
    EotAck,
    BatchEndAck,
    FileHeader,
    DataBlock,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Handshake => "waiting for handshake",
            Phase::HeaderAck => "waiting for header ACK",
            Phase::BlockAck => "waiting for block ACK",
            Phase::EotAck => "waiting for EOT ACK",
            Phase::BatchEndAck => "waiting for batch-end ACK",
            Phase::FileHeader => "waiting for file header",
            Phase::DataBlock => "waiting for data block",
        };
        f.write_str(s)
    }
}

/// Call `attempt` until it yields a value, the deadline passes, or an abort
/// is requested.
///
/// `attempt` does its own idling (a sleep or a timed queue take) when no
/// data is available, so each iteration is one polling interval at most.
pub(crate) fn poll_until<T>(
    abort: &AbortFlag,
    timeout: Duration,
    phase: Phase,
    mut attempt: impl FnMut() -> Result<Option<T>, TransferError>,
) -> Result<T, TransferError> {
    let deadline = Instant::now() + timeout;
    loop {
        if abort.is_abort_requested() {
            return Err(TransferError::AbortRequested);
        }
        if let Some(value) = attempt()? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(TransferError::Timeout { phase });
        }
    }
}
