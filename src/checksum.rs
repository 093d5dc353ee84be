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

//! Block verification codes

/// How a block's trailing verification field is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Sum of payload bytes mod 256
    Checksum,
    /// CRC-16-CCITT (XMODEM flavour), high byte first
    Crc16,
}

impl Verification {
    /// Size of the verification field in bytes
    pub fn len(self) -> usize {
        match self {
            Verification::Checksum => 1,
            Verification::Crc16 => 2,
        }
    }

    /// Compute the verification field for `payload`
    pub fn compute(self, payload: &[u8]) -> Vec<u8> {
        match self {
            Verification::Checksum => vec![checksum(payload)],
            Verification::Crc16 => crc16_ccitt(payload).to_be_bytes().to_vec(),
        }
    }

    /// Check `field` against `payload`
    pub fn matches(self, payload: &[u8], field: &[u8]) -> bool {
        match self {
            Verification::Checksum => field.len() == 1 && field[0] == checksum(payload),
            Verification::Crc16 => {
                field.len() == 2 && u16::from_be_bytes([field[0], field[1]]) == crc16_ccitt(payload)
            }
        }
    }
}

pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Polynomial 0x1021, initial value 0
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}
