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

use thiserror::Error;

use crate::wait::Phase;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out {phase}")]
    Timeout { phase: Phase },

    #[error("too many retries {phase}")]
    TooManyRetries { phase: Phase },

    #[error("too many duplicate blocks, link appears stuck")]
    TooManyDuplicates,

    #[error("transfer cancelled by remote")]
    PeerCancelled,

    #[error("block sequence error: expected {expected}, got {got}")]
    OutOfSequence { expected: u8, got: u8 },

    #[error("corrupted block {block} on a streaming transfer")]
    CorruptBlock { block: u8 },

    #[error("invalid file header: {0}")]
    BadHeader(String),

    #[error("{name}: announced {declared} bytes but received {received}")]
    LengthMismatch { name: String, declared: u64, received: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("streaming reader stopped")]
    PipelineClosed,

    /// Local abort seen by a wait; the state machine turns this into `Cancelled`
    #[error("abort requested")]
    AbortRequested,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer complete")]
    TransferComplete,
}

impl TransferError {
    /// Protocol failures after which the peer should be told to stop
    pub(crate) fn warrants_cancel(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout { .. }
                | TransferError::TooManyRetries { .. }
                | TransferError::TooManyDuplicates
                | TransferError::OutOfSequence { .. }
                | TransferError::CorruptBlock { .. }
                | TransferError::BadHeader(_)
                | TransferError::LengthMismatch { .. }
        )
    }
}
