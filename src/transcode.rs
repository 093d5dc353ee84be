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

//! Payload sources for the sender and text-mode line ending conversion.
//!
//! On the wire, text is CR LF terminated and the final block is padded with
//! SUB. The encoder converts any of CR, LF, CR LF or LF CR into CR LF; the
//! decoder converts back into the local convention and strips SUB padding.
//! Both carry a few bytes across block boundaries since a line ending can
//! be split between two blocks.

use std::collections::VecDeque;
use std::io::{self, BufReader, Bytes, Read};
use std::iter::Peekable;

use crate::protocol::{CR, LF, SUB};

/// Newline convention written by the receiver in text mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn native() -> Self {
        if cfg!(windows) { LineEnding::CrLf } else { LineEnding::Lf }
    }

    fn bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => &[LF],
            LineEnding::CrLf => &[CR, LF],
        }
    }
}

// ============================================================================
// Sender side
// ============================================================================

/// Produces the payload of successive data blocks.
pub trait BlockSource: Send {
    /// Next payload of at most `size` bytes, or `None` when the file is done.
    /// A short payload is padded with SUB by the framer.
    fn next_payload(&mut self, size: usize) -> io::Result<Option<Vec<u8>>>;

    /// Bytes consumed from the underlying file so far
    fn consumed(&self) -> u64;
}

/// Raw file bytes, no conversion.
pub struct BinarySource<R> {
    reader: R,
    consumed: u64,
}

impl<R: Read> BinarySource<R> {
    pub fn new(reader: R) -> Self {
        BinarySource { reader, consumed: 0 }
    }
}

impl<R: Read + Send> BlockSource for BinarySource<R> {
    fn next_payload(&mut self, size: usize) -> io::Result<Option<Vec<u8>>> {
        let mut block = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        block.truncate(filled);
        self.consumed += filled as u64;
        Ok(Some(block))
    }

    fn consumed(&self) -> u64 {
        self.consumed
    }
}

/// Converts local text into CR LF form, block by block.
pub struct TextEncoder<R: Read> {
    bytes: Peekable<Bytes<BufReader<R>>>,
    /// Converted bytes that did not fit in the previous block (at most 3)
    carry: VecDeque<u8>,
    consumed: u64,
    last_padded: bool,
    sent_any: bool,
}

impl<R: Read> TextEncoder<R> {
    pub fn new(reader: R) -> Self {
        TextEncoder {
            bytes: BufReader::new(reader).bytes().peekable(),
            carry: VecDeque::with_capacity(4),
            consumed: 0,
            last_padded: false,
            sent_any: false,
        }
    }

    fn take(&mut self) -> io::Result<Option<u8>> {
        match self.bytes.next() {
            Some(Ok(b)) => {
                self.consumed += 1;
                Ok(Some(b))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        match self.bytes.peek() {
            None => Ok(None),
            Some(Ok(b)) => Ok(Some(*b)),
            Some(Err(_)) => match self.bytes.next() {
                Some(Err(e)) => Err(e),
                _ => Ok(None),
            },
        }
    }

    /// Convert one source step into `carry`. False at end of file.
    fn encode_step(&mut self) -> io::Result<bool> {
        let Some(b) = self.take()? else {
            return Ok(false);
        };

        match b {
            CR | LF => {
                let other = if b == CR { LF } else { CR };
                match self.peek()? {
                    Some(p) if p == other => {
                        self.take()?;
                        self.carry.extend([CR, LF]);
                    }
                    Some(p) if p == b => {
                        self.take()?;
                        self.carry.extend([CR, LF, CR, LF]);
                    }
                    _ => self.carry.extend([CR, LF]),
                }
            }
            _ => self.carry.push_back(b),
        }
        Ok(true)
    }
}

impl<R: Read + Send> BlockSource for TextEncoder<R> {
    fn next_payload(&mut self, size: usize) -> io::Result<Option<Vec<u8>>> {
        let mut block = Vec::with_capacity(size);
        loop {
            while block.len() < size {
                match self.carry.pop_front() {
                    Some(c) => block.push(c),
                    None => break,
                }
            }
            if block.len() == size || !self.encode_step()? {
                break;
            }
        }

        if block.len() == size {
            self.last_padded = false;
            self.sent_any = true;
            return Ok(Some(block));
        }

        // End of file. The receiver needs at least one SUB to find the end,
        // unless nothing was sent at all.
        if block.is_empty() && (self.last_padded || !self.sent_any) {
            return Ok(None);
        }
        block.resize(size, SUB);
        self.last_padded = true;
        self.sent_any = true;
        Ok(Some(block))
    }

    fn consumed(&self) -> u64 {
        self.consumed
    }
}

// ============================================================================
// Receiver side
// ============================================================================

/// Converts CR LF text back to the local convention, dropping SUB padding.
#[derive(Debug)]
pub struct TextDecoder {
    ending: LineEnding,
    /// CR or LF at the end of the previous block, waiting for its partner
    held: Option<u8>,
}

impl TextDecoder {
    pub fn new(ending: LineEnding) -> Self {
        TextDecoder { ending, held: None }
    }

    pub fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let mut data = Vec::with_capacity(payload.len() + 1);
        data.extend(self.held.take());
        data.extend_from_slice(payload);

        let newline = self.ending.bytes();
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            match b {
                CR | LF => {
                    let Some(&next) = data.get(i + 1) else {
                        self.held = Some(b);
                        break;
                    };
                    let other = if b == CR { LF } else { CR };
                    if next == other || next == SUB {
                        out.extend_from_slice(newline);
                        i += 2;
                    } else if next == b {
                        out.extend_from_slice(newline);
                        out.extend_from_slice(newline);
                        i += 2;
                    } else {
                        out.extend_from_slice(newline);
                        i += 1;
                    }
                }
                SUB => i += 1,
                _ => {
                    out.push(b);
                    i += 1;
                }
            }
        }
    }

    /// Resolve a line ending held back from the last block.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.held.take().is_some() {
            out.extend_from_slice(self.ending.bytes());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(input: &[u8], size: usize) -> Vec<Vec<u8>> {
        let mut enc = TextEncoder::new(input);
        let mut blocks = Vec::new();
        while let Some(block) = enc.next_payload(size).unwrap() {
            assert_eq!(block.len(), size, "text blocks are always full");
            blocks.push(block);
        }
        assert_eq!(enc.consumed(), input.len() as u64);
        blocks
    }

    fn decode_all(blocks: &[Vec<u8>], ending: LineEnding) -> Vec<u8> {
        let mut dec = TextDecoder::new(ending);
        let mut out = Vec::new();
        for block in blocks {
            dec.decode(block, &mut out);
        }
        dec.finish(&mut out);
        out
    }

    #[test]
    fn test_encode_rules() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"a\r\nb", b"a\r\nb"),
            (b"a\n\rb", b"a\r\nb"),
            (b"a\nb", b"a\r\nb"),
            (b"a\rb", b"a\r\nb"),
            (b"a\n\nb", b"a\r\n\r\nb"),
            (b"a\r\rb", b"a\r\n\r\nb"),
            (b"ab", b"ab"),
            (b"a\n", b"a\r\n"),
        ];
        for (input, wire) in cases {
            let blocks = encode_all(input, 128);
            assert_eq!(blocks.len(), 1);
            assert_eq!(&blocks[0][..wire.len()], *wire, "input {:?}", input);
            assert!(blocks[0][wire.len()..].iter().all(|&b| b == SUB));
        }
    }

    #[test]
    fn test_decode_rules() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"a\r\nb", b"a\nb"),
            (b"a\n\rb", b"a\nb"),
            (b"a\r\rb", b"a\n\nb"),
            (b"a\n\nb", b"a\n\nb"),
            (b"a\r\x1a", b"a\n"),
            (b"a\rb", b"a\nb"),
            (b"\x1a\nb", b"\nb"),
            (b"a\x1a\x1a\x1a", b"a"),
            (b"\x1ab", b"b"),
            (b"xy", b"xy"),
        ];
        for (wire, text) in cases {
            let mut dec = TextDecoder::new(LineEnding::Lf);
            let mut out = Vec::new();
            dec.decode(wire, &mut out);
            dec.finish(&mut out);
            assert_eq!(&out, text, "wire {:?}", wire);
        }
    }

    #[test]
    fn test_decode_crlf_platform() {
        let mut dec = TextDecoder::new(LineEnding::CrLf);
        let mut out = Vec::new();
        dec.decode(b"one\r\ntwo\r\n\x1a\x1a", &mut out);
        dec.finish(&mut out);
        assert_eq!(out, b"one\r\ntwo\r\n");
    }

    #[test]
    fn test_encoder_carry_bounded() {
        // every source newline doubles, so carry fills up at each boundary
        let input = vec![b'\n'; 300];
        let mut enc = TextEncoder::new(&input[..]);
        while enc.next_payload(128).unwrap().is_some() {
            assert!(enc.carry.len() <= 3);
        }
    }

    #[test]
    fn test_newline_straddling_block_boundary() {
        for size in [128usize, 1024] {
            let mut straddled = vec![b'x'; size - 1];
            straddled.extend_from_slice(b"\r\nrest of line\r\n");

            let mut plain = vec![b'x'; size - 1];
            plain.extend_from_slice(b"\nrest of line\n");

            let a = decode_all(&encode_all(&straddled, size), LineEnding::Lf);
            let b = decode_all(&encode_all(&plain, size), LineEnding::Lf);
            assert_eq!(a, b);

            let mut expected = vec![b'x'; size - 1];
            expected.extend_from_slice(b"\nrest of line\n");
            assert_eq!(a, expected);
        }
    }

    #[test]
    fn test_decoder_holds_trailing_newline() {
        let mut dec = TextDecoder::new(LineEnding::Lf);
        let mut out = Vec::new();

        let mut first = vec![b'a'; 127];
        first.push(CR);
        dec.decode(&first, &mut out);
        assert_eq!(out.len(), 127);

        let mut second = vec![LF, b'b'];
        second.resize(128, SUB);
        dec.decode(&second, &mut out);
        dec.finish(&mut out);

        let mut expected = vec![b'a'; 127];
        expected.extend_from_slice(b"\nb");
        assert_eq!(out, expected);
    }

    #[test]
    fn test_exact_block_gets_padding_block() {
        let input = vec![b'z'; 128];
        let blocks = encode_all(&input, 128);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].iter().all(|&b| b == SUB));
        assert_eq!(decode_all(&blocks, LineEnding::Lf), input);
    }

    #[test]
    fn test_empty_text_sends_nothing() {
        assert!(encode_all(b"", 128).is_empty());
    }

    #[test]
    fn test_text_round_trip() {
        let input = b"line one\nline two\r\n\r\nlast".repeat(40);
        let blocks = encode_all(&input, 128);
        let out = decode_all(&blocks, LineEnding::Lf);
        let expected = b"line one\nline two\n\nlast".repeat(40);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_binary_source() {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let mut src = BinarySource::new(&data[..]);
        assert_eq!(src.next_payload(128).unwrap().unwrap(), &data[..128]);
        assert_eq!(src.next_payload(128).unwrap().unwrap(), &data[128..256]);
        assert_eq!(src.next_payload(128).unwrap().unwrap(), &data[256..]);
        assert_eq!(src.next_payload(128).unwrap(), None);
        assert_eq!(src.consumed(), 300);

        let mut empty = BinarySource::new(&b""[..]);
        assert_eq!(empty.next_payload(128).unwrap(), None);
    }
}
