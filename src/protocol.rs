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

//! XMODEM / YMODEM protocol constants and per-variant profiles

use crate::checksum::Verification;

/// Start of header - begins a 128-byte block
pub const SOH: u8 = 0x01;

/// Start of text - begins a 1024-byte block
pub const STX: u8 = 0x02;

/// End of transmission - sender has no more data for the current file
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the last block or EOT
pub const ACK: u8 = 0x06;

/// Backspace - trailing half of the cancel sequence
pub const BS: u8 = 0x08;

/// Line feed
pub const LF: u8 = 0x0A;

/// Carriage return
pub const CR: u8 = 0x0D;

/// Negative acknowledge - resend, or checksum-mode handshake
pub const NAK: u8 = 0x15;

/// Cancel - two in a row abort the transfer
pub const CAN: u8 = 0x18;

/// Substitute (Ctrl-Z) - pads the last block of a file
pub const SUB: u8 = 0x1A;

/// CRC-mode handshake
pub const CRC_MODE: u8 = b'C';

/// Streaming (YMODEM-G) handshake
pub const STREAM_MODE: u8 = b'G';

/// Sent by either side to abandon a transfer
pub const CANCEL_SEQUENCE: [u8; 10] = [CAN, CAN, CAN, CAN, CAN, BS, BS, BS, BS, BS];

/// Payload size of an SOH block
pub const SHORT_PAYLOAD: usize = 128;

/// Payload size of an STX block
pub const LONG_PAYLOAD: usize = 1024;

/// Header, block number and its complement
pub const FRAME_OVERHEAD: usize = 3;

/// Largest frame on the wire (STX + 1024 + CRC)
pub const MAX_FRAME: usize = FRAME_OVERHEAD + LONG_PAYLOAD + 2;

/// Payload size implied by a block header byte
pub fn payload_len_for(header: u8) -> Option<usize> {
    match header {
        SOH => Some(SHORT_PAYLOAD),
        STX => Some(LONG_PAYLOAD),
        _ => None,
    }
}

/// The supported members of the XMODEM family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    /// Original XMODEM: 128-byte blocks, 8-bit checksum, NAK handshake
    Xmodem,
    /// XMODEM with CRC-16: 128-byte blocks, 'C' handshake
    XmodemCrc,
    /// YMODEM batch, 128-byte data blocks
    YmodemCrc,
    /// YMODEM batch, 1024-byte data blocks
    Ymodem1k,
    /// YMODEM-G streaming, 1024-byte blocks, no per-block ACK
    YmodemG,
}

impl ProtocolVariant {
    pub fn profile(self) -> ProtocolProfile {
        match self {
            ProtocolVariant::Xmodem => ProtocolProfile {
                name: "XMODEM",
                handshake: NAK,
                payload_len: SHORT_PAYLOAD,
                verification: Verification::Checksum,
                has_header_block: false,
                ack_per_block: true,
            },
            ProtocolVariant::XmodemCrc => ProtocolProfile {
                name: "XMODEM-CRC",
                handshake: CRC_MODE,
                payload_len: SHORT_PAYLOAD,
                verification: Verification::Crc16,
                has_header_block: false,
                ack_per_block: true,
            },
            ProtocolVariant::YmodemCrc => ProtocolProfile {
                name: "YMODEM",
                handshake: CRC_MODE,
                payload_len: SHORT_PAYLOAD,
                verification: Verification::Crc16,
                has_header_block: true,
                ack_per_block: true,
            },
            ProtocolVariant::Ymodem1k => ProtocolProfile {
                name: "YMODEM-1K",
                handshake: CRC_MODE,
                payload_len: LONG_PAYLOAD,
                verification: Verification::Crc16,
                has_header_block: true,
                ack_per_block: true,
            },
            ProtocolVariant::YmodemG => ProtocolProfile {
                name: "YMODEM-G",
                handshake: STREAM_MODE,
                payload_len: LONG_PAYLOAD,
                verification: Verification::Crc16,
                has_header_block: true,
                ack_per_block: false,
            },
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.profile().name)
    }
}

/// Everything that distinguishes one variant from another on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolProfile {
    pub name: &'static str,
    /// Byte the receiver sends to start (and, for YMODEM, to pace) a file
    pub handshake: u8,
    /// Fixed payload size of every data block
    pub payload_len: usize,
    pub verification: Verification,
    /// YMODEM family: a metadata block 0 precedes each file
    pub has_header_block: bool,
    /// False only for the streaming variant
    pub ack_per_block: bool,
}

impl ProtocolProfile {
    /// Header byte used for data blocks
    pub fn data_header(&self) -> u8 {
        if self.payload_len == LONG_PAYLOAD { STX } else { SOH }
    }

    /// Total frame length of a data block
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_len + self.verification.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let x = ProtocolVariant::Xmodem.profile();
        assert_eq!(x.handshake, NAK);
        assert_eq!(x.frame_len(), 132);
        assert_eq!(x.data_header(), SOH);
        assert!(!x.has_header_block);

        let y = ProtocolVariant::YmodemCrc.profile();
        assert_eq!(y.handshake, b'C');
        assert_eq!(y.frame_len(), 133);

        let k = ProtocolVariant::Ymodem1k.profile();
        assert_eq!(k.data_header(), STX);
        assert_eq!(k.frame_len(), 1029);
        assert!(k.ack_per_block);

        let g = ProtocolVariant::YmodemG.profile();
        assert_eq!(g.handshake, b'G');
        assert!(!g.ack_per_block);
        assert!(g.has_header_block);
    }

    #[test]
    fn test_profiles_are_distinct() {
        let all = [
            ProtocolVariant::Xmodem,
            ProtocolVariant::XmodemCrc,
            ProtocolVariant::YmodemCrc,
            ProtocolVariant::Ymodem1k,
            ProtocolVariant::YmodemG,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.profile(), b.profile(), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_payload_len_for() {
        assert_eq!(payload_len_for(SOH), Some(128));
        assert_eq!(payload_len_for(STX), Some(1024));
        assert_eq!(payload_len_for(EOT), None);
        assert_eq!(MAX_FRAME, 1029);
    }
}
