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

//! Entry points for sending and receiving over any [`SerialPort`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::abort::AbortFlag;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::progress::{NoProgress, ProgressSink};
use crate::protocol::ProtocolVariant;
use crate::receiver::{run_receiver, ReceiverFsm};
use crate::sender::{run_sender, SenderFsm};
use crate::serial::SerialPort;
use crate::streaming::receive_streaming;

/// Per-transfer settings besides the protocol itself.
#[derive(Clone)]
pub struct TransferOptions {
    pub config: TransferConfig,
    /// Convert line endings and pad with SUB
    pub text_mode: bool,
    pub abort: AbortFlag,
    pub progress: Arc<dyn ProgressSink>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            config: TransferConfig::default(),
            text_mode: false,
            abort: AbortFlag::new(),
            progress: Arc::new(NoProgress),
        }
    }
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn text_mode(mut self, text_mode: bool) -> Self {
        self.text_mode = text_mode;
        self
    }

    pub fn abort(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

/// Send `files` with `variant`.
///
/// XMODEM carries exactly one file; the YMODEM variants send the whole list
/// as one batch. Returns `Ok(false)` if the transfer was aborted locally.
pub fn send_files(
    serial: Box<dyn SerialPort>,
    variant: ProtocolVariant,
    files: &[PathBuf],
    options: &TransferOptions,
) -> Result<bool, TransferError> {
    let profile = variant.profile();
    if files.is_empty() {
        return Err(TransferError::InvalidRequest("no files to send".to_string()));
    }
    if !profile.has_header_block && files.len() != 1 {
        return Err(TransferError::InvalidRequest(format!(
            "{} sends exactly one file, got {}",
            profile.name,
            files.len()
        )));
    }
    for file in files {
        if !file.is_file() {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {}", file.display()),
            )));
        }
    }

    info!("Sending {} file(s) with {}", files.len(), profile.name);
    run_sender(SenderFsm::new(serial, variant, files.to_vec(), options))
}

/// Receive with `variant`.
///
/// For XMODEM `output` is the file to write; the YMODEM variants take the
/// file names from the sender and write them into the `output` directory.
pub fn receive_files(
    serial: Box<dyn SerialPort>,
    variant: ProtocolVariant,
    output: &Path,
    options: &TransferOptions,
) -> Result<bool, TransferError> {
    let profile = variant.profile();
    if profile.has_header_block {
        if !output.is_dir() {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Output directory not found: {}", output.display()),
            )));
        }
    } else if output.is_dir() {
        return Err(TransferError::InvalidRequest(format!(
            "{} needs an output file, {} is a directory",
            profile.name,
            output.display()
        )));
    }

    info!("Receiving with {} into {}", profile.name, output.display());
    if variant == ProtocolVariant::YmodemG {
        receive_streaming(serial, output, options)
    } else {
        run_receiver(ReceiverFsm::new(serial, variant, output, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use crate::progress::LogProgress;
    use crate::protocol::*;
    use crate::serial::{pipe, replies, MockSerialPort};
    use parking_lot::Mutex;
    use std::thread;

    fn options() -> TransferOptions {
        TransferOptions::new().config(TransferConfig::fast())
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    /// Send `files` from one thread and receive them on another over a pipe.
    fn round_trip(
        variant: ProtocolVariant,
        files: Vec<PathBuf>,
        output: PathBuf,
        send_opts: TransferOptions,
        recv_opts: TransferOptions,
    ) -> (Result<bool, TransferError>, Result<bool, TransferError>) {
        let (a, b) = pipe();
        let receiver = thread::spawn(move || receive_files(Box::new(b), variant, &output, &recv_opts));
        let sent = send_files(Box::new(a), variant, &files, &send_opts);
        (sent, receiver.join().unwrap())
    }

    #[test]
    fn test_xmodem_round_trip_pads_to_block() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let content = sample(300);
        let path = src.path().join("data.bin");
        std::fs::write(&path, &content).unwrap();

        for variant in [ProtocolVariant::Xmodem, ProtocolVariant::XmodemCrc] {
            let output = dst.path().join(format!("{:?}.bin", variant));
            let (sent, received) = round_trip(variant, vec![path.clone()], output.clone(), options(), options());
            assert!(sent.unwrap());
            assert!(received.unwrap());

            // No length on the wire: the last block keeps everything but its
            // trailing SUB padding
            assert_eq!(std::fs::read(&output).unwrap(), content);
        }
    }

    #[test]
    fn test_ymodem_round_trip_exact_length() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let mut files = Vec::new();
        let mut contents = Vec::new();
        for (name, len) in [("empty.bin", 0), ("small.bin", 5), ("exact.bin", 1024), ("long.bin", 5000)] {
            let mut content = sample(len);
            // a file that really ends in SUB must survive
            if len == 5 {
                content[4] = SUB;
            }
            let path = src.path().join(name);
            std::fs::write(&path, &content).unwrap();
            files.push(path);
            contents.push((name, content));
        }

        for variant in [ProtocolVariant::YmodemCrc, ProtocolVariant::Ymodem1k, ProtocolVariant::YmodemG] {
            let out = dst.path().join(variant.to_string());
            std::fs::create_dir(&out).unwrap();
            let (sent, received) = round_trip(variant, files.clone(), out.clone(), options(), options());
            assert!(sent.unwrap(), "{}", variant);
            assert!(received.unwrap(), "{}", variant);

            for (name, content) in &contents {
                assert_eq!(&std::fs::read(out.join(name)).unwrap(), content, "{} {}", variant, name);
            }
        }
    }

    #[test]
    fn test_ymodem_preserves_modification_time() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("dated.txt");
        std::fs::write(&path, b"dated").unwrap();
        let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_500_000_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let (sent, received) = round_trip(
            ProtocolVariant::YmodemCrc,
            vec![path],
            dst.path().to_path_buf(),
            options(),
            options(),
        );
        assert!(sent.unwrap());
        assert!(received.unwrap());

        let received_mtime = std::fs::metadata(dst.path().join("dated.txt")).unwrap().modified().unwrap();
        assert_eq!(received_mtime, mtime);
    }

    #[test]
    fn test_text_mode_round_trip() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("notes.txt");
        let content = b"first line\nsecond line\n\nlast".to_vec();
        std::fs::write(&path, &content).unwrap();

        let output = dst.path().join("notes.txt");
        let opts = options().text_mode(true);
        let (sent, received) =
            round_trip(ProtocolVariant::XmodemCrc, vec![path], output.clone(), opts.clone(), opts);
        assert!(sent.unwrap());
        assert!(received.unwrap());
        assert_eq!(std::fs::read(&output).unwrap(), content);
    }

    #[test]
    fn test_text_mode_ymodem_round_trip() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let mut straddle = vec![b'a'; 1023];
        straddle.extend_from_slice(b"\ntail\n");
        let samples: [(&str, Vec<u8>); 3] = [
            ("empty.txt", Vec::new()),
            ("exact.txt", b"0123456789abcde\n".repeat(64)),
            // CR LF lands on bytes 1023 and 1024 of the wire stream
            ("straddle.txt", straddle),
        ];

        let mut files = Vec::new();
        for (name, content) in &samples {
            let path = src.path().join(name);
            std::fs::write(&path, content).unwrap();
            files.push(path);
        }

        let opts = options().text_mode(true);
        for variant in [ProtocolVariant::YmodemCrc, ProtocolVariant::Ymodem1k, ProtocolVariant::YmodemG] {
            let out = dst.path().join(variant.to_string());
            std::fs::create_dir(&out).unwrap();
            let (sent, received) = round_trip(variant, files.clone(), out.clone(), opts.clone(), opts.clone());
            assert!(sent.unwrap(), "{}", variant);
            assert!(received.unwrap(), "{}", variant);

            for (name, content) in &samples {
                assert_eq!(&std::fs::read(out.join(name)).unwrap(), content, "{} {}", variant, name);
            }
        }
    }

    /// Raises the abort flag once a given number of blocks have gone by.
    struct AbortAfter {
        abort: AbortFlag,
        blocks: u64,
        seen: Mutex<u64>,
    }

    impl ProgressSink for AbortAfter {
        fn on_sent(&self, _file: Option<&str>, blocks: u64, _percent: u8) {
            *self.seen.lock() = blocks;
            if blocks >= self.blocks {
                self.abort.request_abort();
            }
        }

        fn on_received(&self, file: Option<&str>, blocks: u64, percent: u8) {
            self.on_sent(file, blocks, percent);
        }
    }

    #[test]
    fn test_sender_abort_mid_transfer() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("big.bin");
        std::fs::write(&path, sample(128 * 40)).unwrap();

        let abort = AbortFlag::new();
        let sink = Arc::new(AbortAfter { abort: abort.clone(), blocks: 3, seen: Mutex::new(0) });
        let send_opts = options().abort(abort).progress(sink.clone());

        let (sent, received) = round_trip(
            ProtocolVariant::XmodemCrc,
            vec![path],
            dst.path().join("big.bin"),
            send_opts,
            options(),
        );
        assert!(!sent.unwrap());
        assert!(matches!(received, Err(TransferError::PeerCancelled)));
        assert_eq!(*sink.seen.lock(), 3);
    }

    #[test]
    fn test_receiver_abort_mid_transfer() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("big.bin");
        std::fs::write(&path, sample(1024 * 20)).unwrap();

        let abort = AbortFlag::new();
        let sink = Arc::new(AbortAfter { abort: abort.clone(), blocks: 2, seen: Mutex::new(0) });
        let recv_opts = options().abort(abort).progress(sink);

        let (sent, received) = round_trip(
            ProtocolVariant::Ymodem1k,
            vec![path],
            dst.path().to_path_buf(),
            options(),
            recv_opts,
        );
        assert!(!received.unwrap());
        assert!(matches!(sent, Err(TransferError::PeerCancelled)));
    }

    #[test]
    fn test_duplicate_block_written_once() {
        let dst = tempfile::tempdir().unwrap();
        let output = dst.path().join("dup.bin");
        let profile = ProtocolVariant::Xmodem.profile();

        let one = block::data_block(&profile, 1, &[1u8; 128]);
        let two = block::data_block(&profile, 2, &[2u8; 128]);
        let responses = replies(&[&one, &one, &two, &[EOT]]);
        let expected_writes = vec![NAK, ACK, ACK, ACK, ACK];

        let port = Box::new(MockSerialPort::new(responses, expected_writes));
        assert!(receive_files(port, ProtocolVariant::Xmodem, &output, &options()).unwrap());

        let mut expected = vec![1u8; 128];
        expected.extend_from_slice(&[2u8; 128]);
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }

    #[test]
    fn test_progress_reaches_full() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("p.bin");
        std::fs::write(&path, sample(1000)).unwrap();

        #[derive(Default)]
        struct Record(Mutex<Vec<u8>>);
        impl ProgressSink for Record {
            fn on_sent(&self, _file: Option<&str>, _blocks: u64, percent: u8) {
                self.0.lock().push(percent);
            }
            fn on_received(&self, _file: Option<&str>, _blocks: u64, _percent: u8) {}
        }

        let record = Arc::new(Record::default());
        let (sent, received) = round_trip(
            ProtocolVariant::YmodemCrc,
            vec![path],
            dst.path().to_path_buf(),
            options().progress(record.clone()),
            options().progress(Arc::new(LogProgress::default())),
        );
        assert!(sent.unwrap());
        assert!(received.unwrap());

        let seen = record.0.lock();
        assert_eq!(seen.len(), 8);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_request_validation() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a");
        let b = src.path().join("b");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let (port, _peer) = pipe();
        let err = send_files(Box::new(port), ProtocolVariant::Xmodem, &[a.clone(), b], &options()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));

        let (port, _peer) = pipe();
        let err = send_files(Box::new(port), ProtocolVariant::YmodemCrc, &[], &options()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));

        let (port, _peer) = pipe();
        let missing = src.path().join("missing");
        let err = send_files(Box::new(port), ProtocolVariant::YmodemCrc, &[missing], &options()).unwrap_err();
        assert!(matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));

        let (port, _peer) = pipe();
        let err = receive_files(Box::new(port), ProtocolVariant::Ymodem1k, &a, &options()).unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));

        let (port, _peer) = pipe();
        let err = receive_files(Box::new(port), ProtocolVariant::Xmodem, src.path(), &options()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
    }
}
