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

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use crate::abort::AbortFlag;
use crate::block::{self, BlockCheck, FileInfo, Frame};
use crate::checksum::Verification;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::output::OutputFile;
use crate::progress::ProgressSink;
use crate::protocol::*;
use crate::serial::{read_or_idle, SerialPort};
use crate::transfer::TransferOptions;
use crate::wait::{poll_until, Phase};

// ============================================================================
// Link
// ============================================================================

/// Where the receiver gets its bytes from and sends its replies to.
///
/// Usually the port itself; YMODEM-G reads through a queue fed by a
/// separate reader thread.
pub(crate) trait Link: Send {
    /// Whatever has arrived, waiting up to `idle` if nothing has
    fn poll(&mut self, idle: Duration) -> Result<Vec<u8>, TransferError>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransferError>;

    /// Drop anything received but not yet consumed
    fn clear(&mut self) -> Result<(), TransferError>;
}

pub(crate) struct DirectLink {
    serial: Box<dyn SerialPort>,
    read_chunk: usize,
}

impl DirectLink {
    pub fn new(serial: Box<dyn SerialPort>, read_chunk: usize) -> Self {
        DirectLink { serial, read_chunk }
    }
}

impl Link for DirectLink {
    fn poll(&mut self, idle: Duration) -> Result<Vec<u8>, TransferError> {
        Ok(read_or_idle(self.serial.as_mut(), self.read_chunk, idle)?)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        Ok(self.serial.write_bytes(bytes, Duration::ZERO)?)
    }

    fn clear(&mut self) -> Result<(), TransferError> {
        Ok(self.serial.clear_buffers()?)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Connect;
pub struct ReceiveHeader;
pub struct ReceiveData;
pub struct Verify;
pub struct WriteBlock;
pub struct EndOfFile;
pub struct Aborted;

// ============================================================================
// FSM Structure
// ============================================================================

struct Session {
    link: Box<dyn Link>,
    profile: ProtocolProfile,
    config: TransferConfig,
    abort: AbortFlag,
    progress: Arc<dyn ProgressSink>,
    text_mode: bool,
    /// Directory for batch variants, destination file for XMODEM
    output: PathBuf,
    file: Option<OutputFile>,
    inbox: Vec<u8>,
    /// Block under verification
    frame: Vec<u8>,
    expected: u8,
    blocks: u64,
    /// A data frame has arrived for the current file
    framed: bool,
    errors: u32,
    duplicates: u32,
    attempts: u32,
    cleared: bool,
    files_received: u32,
}

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    s: Session,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError>;
}

/// Step `state` to completion. `Ok(false)` means the local side aborted.
pub fn run_receiver(mut state: Box<dyn ReceiverState>) -> Result<bool, TransferError> {
    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(TransferError::TransferComplete) => return Ok(true),
            Err(TransferError::Cancelled) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            s: self.s,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    /// Route an error out of a state. A local abort moves to `Aborted`;
    /// fatal protocol errors also tell the sender to stop.
    fn bail(mut self, err: TransferError) -> Result<Box<dyn ReceiverState>, TransferError> {
        match err {
            TransferError::AbortRequested => Ok(self.transition::<Aborted>()),
            TransferError::Io(e) => Err(TransferError::Io(std::io::Error::new(
                e.kind(),
                format!("{} (in state: {})", e, Self::state_name()),
            ))),
            e => {
                if e.warrants_cancel() {
                    warn!("{} in state {}, cancelling", e, Self::state_name());
                    let _ = self.s.link.send(&CANCEL_SEQUENCE);
                }
                Err(e)
            }
        }
    }

    fn reply(&mut self, byte: u8) -> Result<(), TransferError> {
        trace!("Reply: 0x{:02X}", byte);
        self.s.link.send(&[byte])
    }

    /// Wait for the next frame. A frame already in the inbox is returned
    /// without touching the link.
    fn await_frame(&mut self, timeout: Duration, phase: Phase) -> Result<Frame, TransferError> {
        let Session { link, abort, config, profile, inbox, .. } = &mut self.s;
        let verification = profile.verification;
        poll_until(abort, timeout, phase, || {
            if let Some(frame) = block::take_frame(inbox, verification) {
                return Ok(Some(frame));
            }
            let data = link.poll(config.poll_interval)?;
            inbox.extend_from_slice(&data);
            Ok(block::take_frame(inbox, verification))
        })
    }

    /// Wait for any inbound byte at all
    fn await_activity(&mut self, timeout: Duration) -> Result<(), TransferError> {
        let Session { link, abort, config, inbox, .. } = &mut self.s;
        poll_until(abort, timeout, Phase::Handshake, || {
            if inbox.is_empty() {
                let data = link.poll(config.poll_interval)?;
                inbox.extend_from_slice(&data);
            }
            Ok((!inbox.is_empty()).then_some(()))
        })
    }

    /// Count a NAKed block against the retry budget
    fn note_error(&mut self, phase: Phase) -> Result<(), TransferError> {
        self.s.errors += 1;
        if self.s.errors > self.s.config.max_retries {
            return Err(TransferError::TooManyRetries { phase });
        }
        Ok(())
    }

    fn open_output(&mut self, path: PathBuf, info: Option<FileInfo>) -> Result<(), TransferError> {
        let text = self.s.text_mode.then_some(self.s.config.line_ending);
        let file = OutputFile::create(path, info, text)?;
        info!("Receiving {} ({})", file.name(), self.s.profile.name);
        self.s.file = Some(file);
        self.s.expected = 1;
        self.s.blocks = 0;
        self.s.framed = false;
        self.s.errors = 0;
        self.s.duplicates = 0;
        Ok(())
    }
}

/// Keep only the final path component of a received name, so a header
/// can't place files outside the output directory.
fn sanitize_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?;
    match base {
        "" | "." | ".." => None,
        base => Some(base.to_string()),
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<Connect> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;

        // Stale bytes from before the transfer would confuse the first frame
        if !fsm.s.cleared {
            fsm.s.cleared = true;
            fsm.s.inbox.clear();
            if let Err(e) = fsm.s.link.clear() {
                return fsm.bail(e);
            }
        }

        let handshake = fsm.s.profile.handshake;
        if let Err(e) = fsm.reply(handshake) {
            return fsm.bail(e);
        }
        fsm.s.attempts += 1;
        debug!("Sent: handshake 0x{:02X} (attempt {})", handshake, fsm.s.attempts);

        let window = fsm.s.config.connect_window;
        match fsm.await_activity(window) {
            Ok(()) => {}
            Err(TransferError::Timeout { phase }) => {
                if fsm.s.attempts >= fsm.s.config.connect_attempts {
                    return fsm.bail(TransferError::Timeout { phase });
                }
                return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
            }
            Err(e) => return fsm.bail(e),
        }

        fsm.s.attempts = 0;
        if fsm.s.profile.has_header_block {
            return Ok(fsm.transition::<ReceiveHeader>());
        }

        let path = fsm.s.output.clone();
        if let Err(e) = fsm.open_output(path, None) {
            return fsm.bail(e);
        }
        Ok(fsm.transition::<ReceiveData>())
    }
}

impl ReceiverState for ReceiverFsm<ReceiveHeader> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.block_timeout;

        let frame = match fsm.await_frame(timeout, Phase::FileHeader) {
            Ok(Frame::Block(frame)) => frame,
            Ok(Frame::Eot) => {
                // Our ACK of the previous EOT was lost
                debug!("Received: repeated EOT");
                if let Err(e) = fsm.reply(ACK) {
                    return fsm.bail(e);
                }
                return Ok(fsm.transition::<Connect>());
            }
            Ok(Frame::Cancel) => return fsm.bail(TransferError::PeerCancelled),
            Err(TransferError::Timeout { .. }) => {
                warn!("No file header, retrying handshake");
                return Ok(fsm.transition::<Connect>());
            }
            Err(e) => return fsm.bail(e),
        };
        fsm.s.inbox.clear();

        if block::check_block(&frame, 0, Verification::Crc16) != BlockCheck::Accepted {
            warn!("Bad header block, NAK");
            if let Err(e) = fsm.note_error(Phase::FileHeader) {
                return fsm.bail(e);
            }
            if let Err(e) = fsm.reply(NAK) {
                return fsm.bail(e);
            }
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        }
        fsm.s.errors = 0;

        let info = match FileInfo::parse(block::payload(&frame)) {
            Ok(Some(info)) => info,
            Ok(None) => {
                if let Err(e) = fsm.reply(ACK) {
                    return fsm.bail(e);
                }
                info!("Batch complete, {} file(s) received", fsm.s.files_received);
                return Err(TransferError::TransferComplete);
            }
            Err(e) => return fsm.bail(e),
        };
        debug!("Header: {:?}", info);

        let Some(name) = sanitize_name(&info.name) else {
            return fsm.bail(TransferError::BadHeader(format!("unusable file name '{}'", info.name)));
        };
        let path = fsm.s.output.join(&name);
        if let Err(e) = fsm.open_output(path, Some(FileInfo { name, ..info })) {
            return fsm.bail(e);
        }

        let handshake = fsm.s.profile.handshake;
        if let Err(e) = fsm.reply(ACK).and_then(|_| fsm.reply(handshake)) {
            return fsm.bail(e);
        }
        Ok(fsm.transition::<ReceiveData>())
    }
}

impl ReceiverState for ReceiverFsm<ReceiveData> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.block_timeout;

        match fsm.await_frame(timeout, Phase::DataBlock) {
            Ok(Frame::Block(frame)) => {
                fsm.s.frame = frame;
                fsm.s.framed = true;
                if fsm.s.profile.ack_per_block {
                    fsm.s.inbox.clear();
                }
                Ok(fsm.transition::<Verify>())
            }
            Ok(Frame::Eot) => Ok(fsm.transition::<EndOfFile>()),
            Ok(Frame::Cancel) => fsm.bail(TransferError::PeerCancelled),
            Err(TransferError::Timeout { phase }) if fsm.s.profile.ack_per_block => {
                if let Err(e) = fsm.note_error(phase) {
                    return fsm.bail(e);
                }
                fsm.s.inbox.clear();
                let byte = if fsm.s.framed {
                    warn!("Timed out {}, NAK", phase);
                    NAK
                } else {
                    // Sender is still waiting to be started
                    warn!("Timed out {} with no data yet, repeating handshake", phase);
                    fsm.s.profile.handshake
                };
                if let Err(e) = fsm.reply(byte) {
                    return fsm.bail(e);
                }
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            Err(e) => fsm.bail(e),
        }
    }
}

impl ReceiverState for ReceiverFsm<Verify> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;
        let expected = fsm.s.expected;

        match block::check_block(&fsm.s.frame, expected, fsm.s.profile.verification) {
            BlockCheck::Accepted => {
                fsm.s.errors = 0;
                Ok(fsm.transition::<WriteBlock>())
            }
            BlockCheck::Duplicate => {
                fsm.s.duplicates += 1;
                warn!("Duplicate block {}", expected.wrapping_sub(1));
                if fsm.s.duplicates > fsm.s.config.max_duplicates {
                    return fsm.bail(TransferError::TooManyDuplicates);
                }
                if fsm.s.profile.ack_per_block {
                    if let Err(e) = fsm.reply(ACK) {
                        return fsm.bail(e);
                    }
                }
                Ok(fsm.transition::<ReceiveData>())
            }
            BlockCheck::Corrupted => {
                if !fsm.s.profile.ack_per_block {
                    return fsm.bail(TransferError::CorruptBlock { block: expected });
                }
                warn!("Bad block {}, NAK", expected);
                if let Err(e) = fsm.note_error(Phase::DataBlock) {
                    return fsm.bail(e);
                }
                fsm.s.inbox.clear();
                if let Err(e) = fsm.s.link.clear().and_then(|_| fsm.reply(NAK)) {
                    return fsm.bail(e);
                }
                Ok(fsm.transition::<ReceiveData>())
            }
            BlockCheck::OutOfSequence { got } => fsm.bail(TransferError::OutOfSequence { expected, got }),
        }
    }
}

impl ReceiverState for ReceiverFsm<WriteBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;

        if fsm.s.profile.ack_per_block {
            if let Err(e) = fsm.reply(ACK) {
                return fsm.bail(e);
            }
        }

        let Session { file, frame, .. } = &mut fsm.s;
        let written = match file.as_mut() {
            Some(file) => file.write_payload(block::payload(frame)),
            None => Ok(()),
        };
        if let Err(e) = written {
            return fsm.bail(e.into());
        }

        debug!("Received: block {}", fsm.s.expected);
        fsm.s.expected = fsm.s.expected.wrapping_add(1);
        fsm.s.blocks += 1;
        if let Some(file) = &fsm.s.file {
            fsm.s.progress.on_received(Some(file.name()), fsm.s.blocks, file.percent());
        }
        Ok(fsm.transition::<ReceiveData>())
    }
}

impl ReceiverState for ReceiverFsm<EndOfFile> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;
        debug!("Received: EOT");

        if let Some(file) = fsm.s.file.take() {
            let name = file.name().to_string();
            let path = file.path().to_path_buf();
            match file.finish() {
                Ok(bytes) => info!("Received {} ({} bytes) -> {}", name, bytes, path.display()),
                Err(e) => return fsm.bail(e),
            }
        }
        if let Err(e) = fsm.reply(ACK) {
            return fsm.bail(e);
        }
        fsm.s.files_received += 1;

        if fsm.s.profile.has_header_block {
            Ok(fsm.transition::<Connect>())
        } else {
            Err(TransferError::TransferComplete)
        }
    }
}

impl ReceiverState for ReceiverFsm<Aborted> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;
        // Dropping the writer flushes what we have
        if let Some(file) = fsm.s.file.take() {
            warn!("Abandoning partial file {}", file.path().display());
        }
        fsm.s.link.send(&CANCEL_SEQUENCE)?;
        warn!("Transfer aborted");
        Err(TransferError::Cancelled)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<Connect> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        variant: ProtocolVariant,
        output: &Path,
        options: &TransferOptions,
    ) -> Box<dyn ReceiverState> {
        let link = DirectLink::new(serial, options.config.read_chunk);
        Self::with_link(Box::new(link), variant, output, options)
    }

    pub(crate) fn with_link(
        link: Box<dyn Link>,
        variant: ProtocolVariant,
        output: &Path,
        options: &TransferOptions,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Connect>,
            s: Session {
                link,
                profile: variant.profile(),
                config: options.config.clone(),
                abort: options.abort.clone(),
                progress: options.progress.clone(),
                text_mode: options.text_mode,
                output: output.to_path_buf(),
                file: None,
                inbox: Vec::new(),
                frame: Vec::new(),
                expected: 1,
                blocks: 0,
                framed: false,
                errors: 0,
                duplicates: 0,
                attempts: 0,
                cleared: false,
                files_received: 0,
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
