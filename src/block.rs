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

//! Block framing and validation
//!
//! ```text
//! +--------+-----+------+----------------+---------------+
//! | SOH/STX| blk | ~blk | payload 128/1K | checksum/CRC  |
//! +--------+-----+------+----------------+---------------+
//! ```

use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::checksum::Verification;
use crate::error::TransferError;
use crate::protocol::*;

// ============================================================================
// Construction
// ============================================================================

/// Build a data block, padding a short payload with SUB.
pub fn data_block(profile: &ProtocolProfile, block_num: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= profile.payload_len);
    let mut frame = Vec::with_capacity(profile.frame_len());
    frame.push(profile.data_header());
    frame.push(block_num);
    frame.push(!block_num);
    frame.extend_from_slice(payload);
    frame.resize(FRAME_OVERHEAD + profile.payload_len, SUB);
    let field = profile.verification.compute(&frame[FRAME_OVERHEAD..]);
    frame.extend_from_slice(&field);
    frame
}

/// Build block 0 carrying `info`. Uses a 128-byte frame when the fields fit.
pub fn header_block(info: &FileInfo) -> Result<Vec<u8>, TransferError> {
    let fields = info.encode();
    let payload_len = if fields.len() <= SHORT_PAYLOAD {
        SHORT_PAYLOAD
    } else if fields.len() <= LONG_PAYLOAD {
        LONG_PAYLOAD
    } else {
        return Err(TransferError::BadHeader(format!(
            "file name too long for a header block: {}",
            info.name
        )));
    };
    Ok(zero_block(payload_len, &fields))
}

/// The all-zero block 0 that closes a YMODEM batch.
pub fn batch_end_block() -> Vec<u8> {
    zero_block(SHORT_PAYLOAD, &[])
}

fn zero_block(payload_len: usize, fields: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload_len + 2);
    frame.push(if payload_len == LONG_PAYLOAD { STX } else { SOH });
    frame.push(0x00);
    frame.push(0xFF);
    frame.extend_from_slice(fields);
    frame.resize(FRAME_OVERHEAD + payload_len, 0x00);
    let field = Verification::Crc16.compute(&frame[FRAME_OVERHEAD..]);
    frame.extend_from_slice(&field);
    frame
}

// ============================================================================
// Extraction from the inbound byte stream
// ============================================================================

/// One unit recognised at the front of the inbound byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Block(Vec<u8>),
    Eot,
    /// Two consecutive CAN bytes
    Cancel,
}

/// Pull the next complete frame off the front of `inbox`.
///
/// Bytes that cannot start a frame are discarded as line noise. Returns
/// `None` when more data is needed; any partial frame stays in `inbox`.
pub fn take_frame(inbox: &mut Vec<u8>, verification: Verification) -> Option<Frame> {
    loop {
        let first = *inbox.first()?;
        match first {
            SOH | STX => {
                let len = FRAME_OVERHEAD + payload_len_for(first)? + verification.len();
                if inbox.len() < len {
                    return None;
                }
                let frame: Vec<u8> = inbox.drain(..len).collect();
                return Some(Frame::Block(frame));
            }
            EOT => {
                inbox.remove(0);
                return Some(Frame::Eot);
            }
            CAN => match inbox.get(1) {
                None => return None,
                Some(&CAN) => {
                    inbox.drain(..2);
                    return Some(Frame::Cancel);
                }
                Some(_) => {
                    inbox.remove(0);
                }
            },
            _ => {
                inbox.remove(0);
            }
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Outcome of validating a candidate block against the expected number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    Accepted,
    /// Retransmission of the block before the expected one
    Duplicate,
    Corrupted,
    OutOfSequence { got: u8 },
}

/// Validate `frame` as a data block numbered `expected`.
///
/// Header, complement and verification are checked before the sequence
/// number, so a damaged frame is never mistaken for a duplicate.
pub fn check_block(frame: &[u8], expected: u8, verification: Verification) -> BlockCheck {
    let Some(payload_len) = frame.first().and_then(|&h| payload_len_for(h)) else {
        return BlockCheck::Corrupted;
    };
    if frame.len() != FRAME_OVERHEAD + payload_len + verification.len() {
        return BlockCheck::Corrupted;
    }

    let num = frame[1];
    if num != !frame[2] {
        return BlockCheck::Corrupted;
    }

    let (payload, field) = frame[FRAME_OVERHEAD..].split_at(payload_len);
    if !verification.matches(payload, field) {
        return BlockCheck::Corrupted;
    }

    if num == expected {
        BlockCheck::Accepted
    } else if num == expected.wrapping_sub(1) {
        BlockCheck::Duplicate
    } else {
        BlockCheck::OutOfSequence { got: num }
    }
}

/// Payload bytes of a frame already accepted by [`check_block`].
pub fn payload(frame: &[u8]) -> &[u8] {
    let len = frame.first().and_then(|&h| payload_len_for(h)).unwrap_or(0);
    &frame[FRAME_OVERHEAD..FRAME_OVERHEAD + len]
}

// ============================================================================
// File metadata (block 0 payload)
// ============================================================================

/// File metadata carried in YMODEM block 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub name: String,
    pub length: Option<u64>,
    /// Seconds since the Unix epoch
    pub modified: Option<u64>,
    pub mode: Option<u32>,
}

impl FileInfo {
    pub fn from_path(path: &Path) -> std::io::Result<FileInfo> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file: {}", path.display()),
                )
            })?;

        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());

        Ok(FileInfo {
            name,
            length: Some(meta.len()),
            modified,
            mode: Some(file_mode(&meta)),
        })
    }

    /// `name NUL length SP mtime SP mode SP`, numbers decimal/octal/octal
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + 32);
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(format!("{} ", self.length.unwrap_or(0)).as_bytes());
        out.extend_from_slice(format!("{:o} ", self.modified.unwrap_or(0)).as_bytes());
        out.extend_from_slice(format!("{:o} ", self.mode.unwrap_or(0)).as_bytes());
        out
    }

    /// Parse a block 0 payload. `Ok(None)` is the batch-end marker.
    pub fn parse(payload: &[u8]) -> Result<Option<FileInfo>, TransferError> {
        if payload.first().is_none_or(|&b| b == 0) {
            return Ok(None);
        }

        let name_end = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| TransferError::BadHeader("file name is not terminated".to_string()))?;
        let name = String::from_utf8_lossy(&payload[..name_end]).into_owned();

        let rest = &payload[name_end + 1..];
        let rest_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let rest = String::from_utf8_lossy(&rest[..rest_end]);
        let mut fields = rest.split_ascii_whitespace();

        let length = match fields.next() {
            Some(s) => Some(s.parse::<u64>().map_err(|_| {
                TransferError::BadHeader(format!("invalid file length '{}'", s))
            })?),
            None => None,
        };
        let modified = fields.next().and_then(|s| u64::from_str_radix(s, 8).ok()).filter(|&t| t != 0);
        let mode = fields.next().and_then(|s| u32::from_str_radix(s, 8).ok()).filter(|&m| m != 0);

        Ok(Some(FileInfo { name, length, modified, mode }))
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0
}

// ============================================================================
// Tests
// ============================================================================
