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

use std::time::Duration;

use crate::protocol::MAX_FRAME;
use crate::transcode::LineEnding;

/// Timeouts, retry limits and tuning knobs shared by every variant.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Sender: how long to wait for the receiver's handshake byte
    pub handshake_timeout: Duration,
    /// Sender: how long to wait for a block or header ACK
    pub ack_timeout: Duration,
    /// Sender: how long to wait for the ACK of EOT or of the batch-end block
    pub eot_timeout: Duration,
    /// Sleep between polls of an idle port
    pub poll_interval: Duration,
    /// NAKs (or receive timeouts) tolerated per block
    pub max_retries: u32,
    /// Duplicate blocks tolerated per file
    pub max_duplicates: u32,
    /// Receiver: handshake attempts before giving up on the sender
    pub connect_attempts: u32,
    /// Receiver: wait after each handshake byte
    pub connect_window: Duration,
    /// Receiver: wait for the rest of a block, or the next one
    pub block_timeout: Duration,
    /// YMODEM-G sender pause between blocks
    pub stream_block_delay: Duration,
    /// Pause between bytes when writing a block
    pub inter_byte_delay: Duration,
    /// Newline convention for text-mode receives
    pub line_ending: LineEnding,
    /// YMODEM-G: queued chunks before the queue grows
    pub queue_capacity: usize,
    /// YMODEM-G: hard limit on queued chunks
    pub queue_max_capacity: usize,
    /// Largest single read from the port
    pub read_chunk: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            handshake_timeout: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(60),
            eot_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            max_retries: 10,
            max_duplicates: 10,
            connect_attempts: 10,
            connect_window: Duration::from_secs(3),
            block_timeout: Duration::from_secs(10),
            stream_block_delay: if cfg!(windows) {
                Duration::from_millis(250)
            } else {
                Duration::from_millis(200)
            },
            inter_byte_delay: Duration::ZERO,
            line_ending: LineEnding::native(),
            queue_capacity: 64,
            queue_max_capacity: 4096,
            read_chunk: MAX_FRAME,
        }
    }
}

#[cfg(test)]
impl TransferConfig {
    /// Short timeouts and no pacing, for tests over in-memory ports
    pub fn fast() -> Self {
        TransferConfig {
            handshake_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            eot_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            connect_window: Duration::from_millis(500),
            block_timeout: Duration::from_secs(2),
            stream_block_delay: Duration::ZERO,
            line_ending: LineEnding::Lf,
            ..TransferConfig::default()
        }
    }
}
