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

use std::collections::VecDeque;
use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use crate::abort::AbortFlag;
use crate::block::{self, FileInfo};
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::progress::{percent, ProgressSink};
use crate::protocol::*;
use crate::serial::{read_or_idle, SerialPort};
use crate::transcode::{BinarySource, BlockSource, TextEncoder};
use crate::transfer::TransferOptions;
use crate::wait::{poll_until, Phase};

// ============================================================================
// States
// ============================================================================

pub struct Connect;
pub struct SendHeader;
pub struct AwaitDataStart;
pub struct BeginFile;
pub struct SendNext;
pub struct WaitAck;
pub struct EndOfFile;
pub struct FinishBatch;
pub struct Aborted;

// ============================================================================
// FSM Structure
// ============================================================================

/// A receiver response, after CAN handling and noise filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nak,
    Handshake,
}

struct CurrentFile {
    name: String,
    length: u64,
    source: Box<dyn BlockSource>,
}

/// Everything one send operation owns, moved from state to state.
struct Session {
    serial: Box<dyn SerialPort>,
    profile: ProtocolProfile,
    config: TransferConfig,
    abort: AbortFlag,
    progress: Arc<dyn ProgressSink>,
    text_mode: bool,
    files: VecDeque<PathBuf>,
    header: Option<FileInfo>,
    current: Option<CurrentFile>,
    inbox: VecDeque<u8>,
    /// Last block written, kept for retransmission
    frame: Vec<u8>,
    block_num: u8,
    blocks_sent: u64,
    retries: u32,
    last_was_can: bool,
}

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    s: Session,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError>;
}

/// Step `state` to completion. `Ok(false)` means the local side aborted.
pub fn run_sender(mut state: Box<dyn SenderState>) -> Result<bool, TransferError> {
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

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            s: self.s,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    /// Route an error out of a state. A local abort moves to `Aborted`;
    /// fatal protocol errors also tell the receiver to stop.
    fn bail(mut self, err: TransferError) -> Result<Box<dyn SenderState>, TransferError> {
        match err {
            TransferError::AbortRequested => Ok(self.transition::<Aborted>()),
            TransferError::Io(e) => Err(TransferError::Io(std::io::Error::new(
                e.kind(),
                format!("{} (in state: {})", e, Self::state_name()),
            ))),
            e => {
                if e.warrants_cancel() {
                    warn!("{} in state {}, cancelling", e, Self::state_name());
                    let _ = self.s.serial.write_bytes(&CANCEL_SEQUENCE, Duration::ZERO);
                }
                Err(e)
            }
        }
    }

    fn write_frame(&mut self) -> Result<(), TransferError> {
        trace!("Frame: {:02X?}", &self.s.frame[..FRAME_OVERHEAD]);
        self.s.serial.write_bytes(&self.s.frame, self.s.config.inter_byte_delay)?;
        Ok(())
    }

    /// Wait for one of `accept`, skipping anything else. Two consecutive
    /// CANs are a remote abort; a CAN followed by ACK counts as a NAK.
    fn await_reply(&mut self, timeout: Duration, phase: Phase, accept: &[Reply]) -> Result<Reply, TransferError> {
        let Session { serial, abort, config, profile, inbox, last_was_can, .. } = &mut self.s;
        let handshake = profile.handshake;
        poll_until(abort, timeout, phase, || {
            if inbox.is_empty() {
                inbox.extend(read_or_idle(serial.as_mut(), config.read_chunk, config.poll_interval)?);
            }
            while let Some(byte) = inbox.pop_front() {
                let reply = match byte {
                    CAN if *last_was_can => return Err(TransferError::PeerCancelled),
                    CAN => {
                        *last_was_can = true;
                        continue;
                    }
                    b if b == handshake && accept.contains(&Reply::Handshake) => Reply::Handshake,
                    ACK if *last_was_can => Reply::Nak,
                    ACK => Reply::Ack,
                    NAK => Reply::Nak,
                    other => {
                        trace!("Ignoring 0x{:02X}", other);
                        *last_was_can = false;
                        continue;
                    }
                };
                *last_was_can = false;
                if accept.contains(&reply) {
                    return Ok(Some(reply));
                }
                trace!("Ignoring {:?}", reply);
            }
            Ok(None)
        })
    }

    /// Count a NAK against the retry budget
    fn note_retry(&mut self, phase: Phase) -> Result<(), TransferError> {
        self.s.retries += 1;
        if self.s.retries > self.s.config.max_retries {
            return Err(TransferError::TooManyRetries { phase });
        }
        warn!("NAK while {} (retry {})", phase, self.s.retries);
        Ok(())
    }

    fn report_progress(&mut self) {
        self.s.blocks_sent += 1;
        if let Some(current) = &self.s.current {
            let pct = percent(current.source.consumed(), Some(current.length));
            self.s.progress.on_sent(Some(&current.name), self.s.blocks_sent, pct);
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<Connect> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.handshake_timeout;
        if let Err(e) = fsm.await_reply(timeout, Phase::Handshake, &[Reply::Handshake]) {
            return fsm.bail(e);
        }
        debug!("Received: handshake 0x{:02X}", fsm.s.profile.handshake);

        // Repeated handshakes queued before we started would read as NAKs of block 1
        fsm.s.inbox.clear();
        if let Err(e) = fsm.s.serial.clear_buffers() {
            return fsm.bail(e.into());
        }

        if !fsm.s.profile.has_header_block {
            return Ok(fsm.transition::<BeginFile>());
        }
        if fsm.s.files.is_empty() {
            Ok(fsm.transition::<FinishBatch>())
        } else {
            Ok(fsm.transition::<SendHeader>())
        }
    }
}

impl SenderState for SenderFsm<SendHeader> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let Some(path) = fsm.s.files.front().cloned() else {
            return Ok(fsm.transition::<FinishBatch>());
        };

        let info = match FileInfo::from_path(&path) {
            Ok(info) => info,
            Err(e) => return fsm.bail(e.into()),
        };
        fsm.s.frame = match block::header_block(&info) {
            Ok(frame) => frame,
            Err(e) => return fsm.bail(e),
        };
        debug!("Header: {:?}", info);
        fsm.s.header = Some(info);
        fsm.s.retries = 0;
        fsm.s.last_was_can = false;

        let timeout = fsm.s.config.ack_timeout;
        loop {
            if let Err(e) = fsm.write_frame() {
                return fsm.bail(e);
            }
            debug!("Sent: block 0");
            match fsm.await_reply(timeout, Phase::HeaderAck, &[Reply::Ack, Reply::Nak]) {
                Ok(Reply::Ack) => {
                    debug!("Received: ACK (header)");
                    return Ok(fsm.transition::<AwaitDataStart>());
                }
                Ok(_) => {
                    if let Err(e) = fsm.note_retry(Phase::HeaderAck) {
                        return fsm.bail(e);
                    }
                }
                Err(e) => return fsm.bail(e),
            }
        }
    }
}

impl SenderState for SenderFsm<AwaitDataStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.handshake_timeout;
        match fsm.await_reply(timeout, Phase::Handshake, &[Reply::Handshake]) {
            Ok(_) => {
                debug!("Received: handshake, starting data");
                Ok(fsm.transition::<BeginFile>())
            }
            Err(e) => fsm.bail(e),
        }
    }
}

impl SenderState for SenderFsm<BeginFile> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let Some(path) = fsm.s.files.front().cloned() else {
            return fsm.bail(TransferError::InvalidRequest("no files to send".to_string()));
        };

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => return fsm.bail(e.into()),
        };
        let length = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => return fsm.bail(e.into()),
        };
        let name = fsm
            .s
            .header
            .take()
            .map(|h| h.name)
            .unwrap_or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());

        let source: Box<dyn BlockSource> = if fsm.s.text_mode {
            Box::new(TextEncoder::new(file))
        } else {
            Box::new(BinarySource::new(file))
        };

        info!("Sending {} ({} bytes, {})", name, length, fsm.s.profile.name);
        fsm.s.current = Some(CurrentFile { name, length, source });
        fsm.s.block_num = 1;
        fsm.s.blocks_sent = 0;
        Ok(fsm.transition::<SendNext>())
    }
}

impl SenderState for SenderFsm<SendNext> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        if fsm.s.abort.is_abort_requested() {
            return Ok(fsm.transition::<Aborted>());
        }

        let payload_len = fsm.s.profile.payload_len;
        let next = match fsm.s.current.as_mut() {
            Some(current) => current.source.next_payload(payload_len),
            None => Ok(None),
        };
        let payload = match next {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(fsm.transition::<EndOfFile>()),
            Err(e) => return fsm.bail(e.into()),
        };

        fsm.s.frame = block::data_block(&fsm.s.profile, fsm.s.block_num, &payload);
        fsm.s.retries = 0;
        fsm.s.last_was_can = false;
        if let Err(e) = fsm.write_frame() {
            return fsm.bail(e);
        }
        debug!("Sent: block {}", fsm.s.block_num);

        if fsm.s.profile.ack_per_block {
            return Ok(fsm.transition::<WaitAck>());
        }

        // Streaming: no ACK, just pace the line and watch for a CAN CAN
        fsm.report_progress();
        fsm.s.block_num = fsm.s.block_num.wrapping_add(1);
        if !fsm.s.config.stream_block_delay.is_zero() {
            std::thread::sleep(fsm.s.config.stream_block_delay);
        }
        match check_remote_cancel(&mut fsm.s) {
            Ok(()) => Ok(fsm.transition::<SendNext>()),
            Err(e) => fsm.bail(e),
        }
    }
}

impl SenderState for SenderFsm<WaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.ack_timeout;
        match fsm.await_reply(timeout, Phase::BlockAck, &[Reply::Ack, Reply::Nak]) {
            Ok(Reply::Ack) => {
                debug!("Received: ACK (block {})", fsm.s.block_num);
                fsm.report_progress();
                fsm.s.block_num = fsm.s.block_num.wrapping_add(1);
                Ok(fsm.transition::<SendNext>())
            }
            Ok(_) => {
                if let Err(e) = fsm.note_retry(Phase::BlockAck) {
                    return fsm.bail(e);
                }
                if let Err(e) = fsm.write_frame() {
                    return fsm.bail(e);
                }
                debug!("Resent: block {}", fsm.s.block_num);
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            Err(e) => fsm.bail(e),
        }
    }
}

impl SenderState for SenderFsm<EndOfFile> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.s.config.eot_timeout;
        fsm.s.retries = 0;
        fsm.s.last_was_can = false;
        loop {
            if let Err(e) = fsm.s.serial.write_byte(EOT) {
                return fsm.bail(e.into());
            }
            debug!("Sent: EOT");
            match fsm.await_reply(timeout, Phase::EotAck, &[Reply::Ack, Reply::Nak]) {
                Ok(Reply::Ack) => break,
                Ok(_) => {
                    if let Err(e) = fsm.note_retry(Phase::EotAck) {
                        return fsm.bail(e);
                    }
                }
                Err(e) => return fsm.bail(e),
            }
        }

        if let Some(current) = fsm.s.current.take() {
            info!("Sent {} ({} blocks)", current.name, fsm.s.blocks_sent);
        }
        fsm.s.files.pop_front();

        if fsm.s.profile.has_header_block {
            debug!("{} files remaining", fsm.s.files.len());
            Ok(fsm.transition::<Connect>())
        } else {
            Err(TransferError::TransferComplete)
        }
    }
}

impl SenderState for SenderFsm<FinishBatch> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        fsm.s.frame = block::batch_end_block();
        fsm.s.retries = 0;
        fsm.s.last_was_can = false;

        let timeout = fsm.s.config.eot_timeout;
        loop {
            if let Err(e) = fsm.write_frame() {
                return fsm.bail(e);
            }
            debug!("Sent: batch end");
            match fsm.await_reply(timeout, Phase::BatchEndAck, &[Reply::Ack, Reply::Nak]) {
                Ok(Reply::Ack) => {
                    info!("Batch complete");
                    return Err(TransferError::TransferComplete);
                }
                Ok(_) => {
                    if let Err(e) = fsm.note_retry(Phase::BatchEndAck) {
                        return fsm.bail(e);
                    }
                }
                Err(e) => return fsm.bail(e),
            }
        }
    }
}

impl SenderState for SenderFsm<Aborted> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, TransferError> {
        let mut fsm = *self;
        fsm.s.current = None;
        fsm.s.serial.write_bytes(&CANCEL_SEQUENCE, Duration::ZERO)?;
        warn!("Transfer aborted");
        Err(TransferError::Cancelled)
    }
}

/// Non-blocking look for CAN CAN from a streaming receiver. Anything else
/// arriving mid-stream is stale handshake noise.
fn check_remote_cancel(s: &mut Session) -> Result<(), TransferError> {
    let data = s.serial.read_bytes(s.config.read_chunk)?;
    for byte in data {
        if byte == CAN {
            if s.last_was_can {
                return Err(TransferError::PeerCancelled);
            }
            s.last_was_can = true;
        } else {
            s.last_was_can = false;
        }
    }
    Ok(())
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<Connect> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        variant: ProtocolVariant,
        files: Vec<PathBuf>,
        options: &TransferOptions,
    ) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<Connect>,
            s: Session {
                serial,
                profile: variant.profile(),
                config: options.config.clone(),
                abort: options.abort.clone(),
                progress: options.progress.clone(),
                text_mode: options.text_mode,
                files: files.into(),
                header: None,
                current: None,
                inbox: VecDeque::new(),
                frame: Vec::new(),
                block_num: 1,
                blocks_sent: 0,
                retries: 0,
                last_was_can: false,
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
