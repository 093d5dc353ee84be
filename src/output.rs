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

//! Destination file for a receive, turning block payloads into file bytes

use std::fs::{File, FileTimes};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::block::FileInfo;
use crate::error::TransferError;
use crate::progress::percent;
use crate::protocol::SUB;
use crate::transcode::{LineEnding, TextDecoder};

enum Mode {
    Text(TextDecoder),
    /// Length announced: writes are cut off at the announced size
    Sized { declared: u64, overrun: bool },
    /// No length: the newest block is held back so its SUB padding can be
    /// trimmed at EOT
    Unsized { held: Option<Vec<u8>> },
}

pub(crate) struct OutputFile {
    path: PathBuf,
    name: String,
    writer: BufWriter<File>,
    info: Option<FileInfo>,
    mode: Mode,
    received: u64,
    written: u64,
}

impl OutputFile {
    /// Create (or truncate) `path`. `text` selects text-mode decoding.
    pub fn create(path: PathBuf, info: Option<FileInfo>, text: Option<LineEnding>) -> io::Result<Self> {
        let file = File::create(&path)?;
        let name = info
            .as_ref()
            .map(|i| i.name.clone())
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let mode = match (text, info.as_ref().and_then(|i| i.length)) {
            (Some(ending), _) => Mode::Text(TextDecoder::new(ending)),
            (None, Some(declared)) => Mode::Sized { declared, overrun: false },
            (None, None) => Mode::Unsized { held: None },
        };

        debug!("Created file: {:?}", path);
        Ok(OutputFile {
            path,
            name,
            writer: BufWriter::new(file),
            info,
            mode,
            received: 0,
            written: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn percent(&self) -> u8 {
        percent(self.received, self.info.as_ref().and_then(|i| i.length))
    }

    /// Store one accepted block payload
    pub fn write_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        self.received += payload.len() as u64;
        match &mut self.mode {
            Mode::Text(decoder) => {
                let mut out = Vec::with_capacity(payload.len() + 16);
                decoder.decode(payload, &mut out);
                self.writer.write_all(&out)?;
                self.written += out.len() as u64;
            }
            Mode::Sized { declared, overrun } => {
                let remaining = declared.saturating_sub(self.written);
                if remaining == 0 {
                    *overrun = true;
                    return Ok(());
                }
                let n = (payload.len() as u64).min(remaining) as usize;
                self.writer.write_all(&payload[..n])?;
                self.written += n as u64;
            }
            Mode::Unsized { held } => {
                if let Some(previous) = held.replace(payload.to_vec()) {
                    self.writer.write_all(&previous)?;
                    self.written += previous.len() as u64;
                }
            }
        }
        Ok(())
    }

    /// Flush, close and apply metadata. Returns bytes written.
    pub fn finish(mut self) -> Result<u64, TransferError> {
        match &mut self.mode {
            Mode::Text(decoder) => {
                let mut out = Vec::new();
                decoder.finish(&mut out);
                self.writer.write_all(&out)?;
                self.written += out.len() as u64;
            }
            Mode::Unsized { held } => {
                if let Some(last) = held.take() {
                    let end = last.iter().rposition(|&b| b != SUB).map_or(0, |i| i + 1);
                    self.writer.write_all(&last[..end])?;
                    self.written += end as u64;
                }
            }
            Mode::Sized { .. } => {}
        }

        self.writer.flush()?;

        if let Mode::Sized { declared, overrun } = self.mode {
            if self.written < declared || overrun {
                warn!("{}: announced {} bytes, received {}", self.name, declared, self.received);
                return Err(TransferError::LengthMismatch {
                    name: self.name,
                    declared,
                    received: self.received,
                });
            }
        }

        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        if let Some(info) = &self.info {
            apply_metadata(&file, info)?;
        }
        Ok(self.written)
    }
}

fn apply_metadata(file: &File, info: &FileInfo) -> io::Result<()> {
    if let Some(secs) = info.modified {
        let times = FileTimes::new().set_modified(UNIX_EPOCH + Duration::from_secs(secs));
        file.set_times(times)?;
    }

    #[cfg(unix)]
    if let Some(mode) = info.mode {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode & 0o777))?;
    }

    Ok(())
}
