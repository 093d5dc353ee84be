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

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort as SerialPortTrait, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte transport the transfer state machines run over.
///
/// Reads never block: an idle line returns an empty buffer immediately and
/// the caller decides how long to sleep before polling again.
pub trait SerialPort: Send {
    fn read_bytes(&mut self, max_len: usize) -> io::Result<Vec<u8>>;

    fn write_bytes(&mut self, buf: &[u8], inter_byte_delay: Duration) -> io::Result<()>;

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_bytes(&[byte], Duration::ZERO)
    }

    /// Discard anything buffered in either direction
    fn clear_buffers(&mut self) -> io::Result<()>;
}

/// Read whatever is waiting; if nothing is, sleep for `idle` first.
pub(crate) fn read_or_idle(
    port: &mut dyn SerialPort,
    max_len: usize,
    idle: Duration,
) -> io::Result<Vec<u8>> {
    let data = port.read_bytes(max_len)?;
    if data.is_empty() && !idle.is_zero() {
        std::thread::sleep(idle);
    }
    Ok(data)
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(10))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn read_bytes(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let available = self.port.bytes_to_read().map_err(io::Error::other)? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available.min(max_len)];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, buf: &[u8], inter_byte_delay: Duration) -> io::Result<()> {
        if inter_byte_delay.is_zero() {
            self.port.write_all(buf)?;
        } else {
            // Byte-by-byte with a pause so slow receivers don't overflow
            for byte in buf {
                self.port.write_all(std::slice::from_ref(byte))?;
                self.port.flush()?;
                std::thread::sleep(inter_byte_delay);
            }
        }
        self.port.flush()
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All).map_err(io::Error::other)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = nothing available on that poll)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

/// Script where each chunk arrives on its own read.
#[cfg(test)]
pub fn replies(chunks: &[&[u8]]) -> Vec<Option<u8>> {
    let mut script = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            script.push(None);
        }
        script.extend(chunk.iter().map(|&b| Some(b)));
    }
    script
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn read_bytes(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        // Out of responses = idle line
        if self.read_pos >= self.read_buffer.len() {
            return Ok(Vec::new());
        }

        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        while out.len() < max_len && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    out.push(byte);
                    self.read_pos += 1;
                }
                None => break, // Stop at idle marker
            }
        }

        Ok(out)
    }

    fn write_bytes(&mut self, buf: &[u8], _inter_byte_delay: Duration) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Loopback pipe for sender <-> receiver tests
// ============================================================================

#[cfg(test)]
pub struct PipeEnd {
    inbound: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<u8>>>,
    outbound: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<u8>>>,
    written: std::sync::Arc<parking_lot::Mutex<Vec<u8>>>,
}

/// Two connected ends of a lossless in-memory link.
#[cfg(test)]
pub fn pipe() -> (PipeEnd, PipeEnd) {
    use std::sync::Arc;
    let a_to_b = Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::new()));
    let b_to_a = Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::new()));
    let a = PipeEnd {
        inbound: b_to_a.clone(),
        outbound: a_to_b.clone(),
        written: Arc::default(),
    };
    let b = PipeEnd {
        inbound: a_to_b,
        outbound: b_to_a,
        written: Arc::default(),
    };
    (a, b)
}

#[cfg(test)]
impl PipeEnd {
    /// Handle on everything this end has written
    pub fn write_log(&self) -> std::sync::Arc<parking_lot::Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

#[cfg(test)]
impl SerialPort for PipeEnd {
    fn read_bytes(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut inbound = self.inbound.lock();
        let n = inbound.len().min(max_len);
        Ok(inbound.drain(..n).collect())
    }

    fn write_bytes(&mut self, buf: &[u8], _inter_byte_delay: Duration) -> io::Result<()> {
        self.outbound.lock().extend(buf.iter().copied());
        self.written.lock().extend_from_slice(buf);
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.inbound.lock().clear();
        Ok(())
    }
}
