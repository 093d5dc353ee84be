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

//! YMODEM-G receive pipeline.
//!
//! A streaming sender never waits for us, so one thread does nothing but
//! drain the port into a [`ChunkQueue`] while the receiver state machine
//! assembles and writes blocks from the other end of the queue. Replies
//! still go straight to the port. Whichever side stops first closes the
//! queue, which stops the other.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::TransferError;
use crate::protocol::ProtocolVariant;
use crate::queue::ChunkQueue;
use crate::receiver::{run_receiver, Link, ReceiverFsm};
use crate::serial::SerialPort;
use crate::transfer::TransferOptions;

const COLLECTOR_IDLE: Duration = Duration::from_millis(1);

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Receiver side of the pipeline: reads come off the queue, writes go to
/// the shared port.
struct QueuedLink {
    serial: SharedPort,
    queue: Arc<ChunkQueue>,
}

impl Link for QueuedLink {
    fn poll(&mut self, idle: Duration) -> Result<Vec<u8>, TransferError> {
        match self.queue.take(idle) {
            Ok(chunk) => Ok(chunk.unwrap_or_default()),
            Err(_) => Err(TransferError::PipelineClosed),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        Ok(self.serial.lock().write_bytes(bytes, Duration::ZERO)?)
    }

    /// The port is cleared before the reader starts, and anything queued
    /// since then is genuine traffic.
    fn clear(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Move everything the port delivers onto the queue until it is closed.
fn collect(serial: &SharedPort, queue: &ChunkQueue, read_chunk: usize) -> Result<(), TransferError> {
    loop {
        if queue.is_closed() {
            return Ok(());
        }

        // The lock is held only for the read so replies are never starved
        let data = serial.lock().read_bytes(read_chunk);
        match data {
            Ok(data) if data.is_empty() => thread::sleep(COLLECTOR_IDLE),
            Ok(data) => {
                if queue.put(data).is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                error!("Port read failed: {}", e);
                queue.close();
                return Err(e.into());
            }
        }
    }
}

fn thread_panicked(role: &str) -> TransferError {
    TransferError::Io(std::io::Error::other(format!("{} thread panicked", role)))
}

/// Run a YMODEM-G batch receive into `output`.
pub fn receive_streaming(
    mut serial: Box<dyn SerialPort>,
    output: &Path,
    options: &TransferOptions,
) -> Result<bool, TransferError> {
    serial.clear_buffers()?;
    let serial: SharedPort = Arc::new(Mutex::new(serial));
    let queue = Arc::new(ChunkQueue::new(
        options.config.queue_capacity,
        options.config.queue_max_capacity,
    ));
    let read_chunk = options.config.read_chunk;

    thread::scope(|scope| {
        let collector = thread::Builder::new()
            .name("ymodem-g-reader".to_string())
            .spawn_scoped(scope, || collect(&serial, &queue, read_chunk))?;

        let link = QueuedLink {
            serial: serial.clone(),
            queue: queue.clone(),
        };
        let processor = thread::Builder::new()
            .name("ymodem-g-receiver".to_string())
            .spawn_scoped(scope, || {
                let fsm = ReceiverFsm::with_link(Box::new(link), ProtocolVariant::YmodemG, output, options);
                let result = run_receiver(fsm);
                queue.close();
                result
            });
        let processor = match processor {
            Ok(handle) => handle,
            Err(e) => {
                queue.close();
                return Err(e.into());
            }
        };

        let processed = processor.join().unwrap_or_else(|_| {
            queue.close();
            Err(thread_panicked("receiver"))
        });
        let collected = collector.join().unwrap_or_else(|_| Err(thread_panicked("reader")));
        debug!("Pipeline finished: {:?} / {:?}", processed, collected);
        let unread = queue.drain();
        if !unread.is_empty() {
            debug!("Discarded {} unread chunks", unread.len());
        }

        match (processed, collected) {
            // The reader failing is what closed the queue under the receiver
            (Err(TransferError::PipelineClosed), Err(e)) => Err(e),
            (result, _) => result,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{self, FileInfo};
    use crate::config::TransferConfig;
    use crate::protocol::*;
    use crate::serial::{replies, MockSerialPort};
    use std::io;

    fn options() -> TransferOptions {
        TransferOptions::new().config(TransferConfig::fast())
    }

    #[test]
    fn test_streamed_batch() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ProtocolVariant::YmodemG.profile();
        let content: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();

        let info = FileInfo {
            name: "stream.bin".to_string(),
            length: Some(content.len() as u64),
            modified: None,
            mode: None,
        };
        let mut stream = Vec::new();
        for (i, chunk) in content.chunks(1024).enumerate() {
            stream.extend(block::data_block(&profile, (i + 1) as u8, chunk));
        }
        stream.push(EOT);

        let responses = replies(&[&block::header_block(&info).unwrap(), &stream, &block::batch_end_block()]);
        let expected_writes = vec![STREAM_MODE, ACK, STREAM_MODE, ACK, STREAM_MODE, ACK];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        assert!(receive_streaming(mock_serial, dir.path(), &options()).unwrap());
        assert_eq!(std::fs::read(dir.path().join("stream.bin")).unwrap(), content);
    }

    #[test]
    fn test_corrupt_block_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ProtocolVariant::YmodemG.profile();
        let info = FileInfo {
            name: "bad.bin".to_string(),
            length: Some(2048),
            modified: None,
            mode: None,
        };

        let mut bad = block::data_block(&profile, 1, &[0x11; 1024]);
        bad[500] ^= 0x01;

        let responses = replies(&[&block::header_block(&info).unwrap(), &bad]);
        let mut expected_writes = vec![STREAM_MODE, ACK, STREAM_MODE];
        expected_writes.extend_from_slice(&CANCEL_SEQUENCE);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        match receive_streaming(mock_serial, dir.path(), &options()) {
            Err(TransferError::CorruptBlock { block: 1 }) => {}
            other => panic!("expected corrupt block, got {:?}", other),
        }
    }

    struct FailingPort;

    impl SerialPort for FailingPort {
        fn read_bytes(&mut self, _max_len: usize) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
        }

        fn write_bytes(&mut self, _buf: &[u8], _inter_byte_delay: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reader_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = receive_streaming(Box::new(FailingPort), dir.path(), &options()).unwrap_err();
        match err {
            TransferError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected the reader's I/O error, got {:?}", other),
        }
    }
}
