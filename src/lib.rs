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

//! XMODEM, XMODEM-CRC, YMODEM, YMODEM-1K and YMODEM-G file transfer over
//! a serial link.
//!
//! Both directions run as typed state machines over a [`SerialPort`];
//! [`send_files`] and [`receive_files`] drive them to completion.

pub mod abort;
pub mod block;
pub mod checksum;
pub mod config;
pub mod error;
mod output;
pub mod progress;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod serial;
mod streaming;
pub mod transcode;
pub mod transfer;
mod wait;

pub use abort::AbortFlag;
pub use config::TransferConfig;
pub use error::TransferError;
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use protocol::ProtocolVariant;
pub use serial::{RealSerialPort, SerialPort};
pub use transcode::LineEnding;
pub use transfer::{receive_files, send_files, TransferOptions};
pub use wait::Phase;
