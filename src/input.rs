// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::{
    fmt::{self, Debug, Formatter},
    fs::File,
    io::{self, Read},
    path::Path,
};

use bstr::ByteSlice;
use memchr::memchr_iter;
use static_assertions::assert_impl_all;

/// The number of bytes kept loaded after the cursor until the source is
/// exhausted. It bounds how much input a single token can match.
pub const BUFFER_AHEAD: usize = 64 * 1024;

/// Bytes requested from the source per read call. The buffer itself grows
/// geometrically through `Vec`.
const READ_CHUNK: usize = 8 * 1024;

/// The lifecycle of an [`Input`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Created, cursor never relocated.
    Init,
    /// The cursor is inside the buffered data and the source may have more.
    Processing,
    /// The source is exhausted, but buffered data remains at the cursor.
    InputEnded,
    /// The source is exhausted and the cursor sits at the end of the data.
    Ended,
}

impl Status {
    /// The single-character tag used when a textual form is needed.
    #[inline]
    pub fn tag(self) -> char {
        match self {
            Status::Init => '-',
            Status::Processing => '~',
            Status::InputEnded => '.',
            Status::Ended => 'E',
        }
    }
}

/// A cursor over an input stream, buffering bytes as they are acquired.
///
/// The iteration unit is the byte. The buffer head is never trimmed, so the
/// cursor offset doubles as an index into the buffer and any slice of already
/// seen input can be revisited, which backtracking relies on. At least
/// [`BUFFER_AHEAD`] bytes are kept loaded past the cursor until the source
/// runs dry.
pub struct Input {
    status: Status,
    /// All bytes acquired from the source so far.
    buf: Vec<u8>,
    /// The cursor, an absolute offset into the stream (and into `buf`).
    pos: usize,
    /// Line separators crossed before the cursor.
    line: usize,
    separator: u8,
    ahead: usize,
    /// The source, dropped once it reports end of input.
    src: Option<Box<dyn Read + Send>>,
}

assert_impl_all!(Input: Send);

impl Input {
    /// Opens the file at `path` and preloads the buffer.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Input> {
        Input::from_source(File::open(path)?)
    }

    /// Creates an input over an arbitrary reader and preloads the buffer.
    pub fn from_source(src: impl Read + Send + 'static) -> io::Result<Input> {
        let mut input = Input {
            status: Status::Init,
            buf: Vec::new(),
            pos: 0,
            line: 0,
            separator: b'\n',
            ahead: BUFFER_AHEAD,
            src: Some(Box::new(src)),
        };
        input.fill(0)?;
        Ok(input)
    }

    /// Creates an input over bytes already in memory. There is no source to
    /// exhaust, so the whole stream is resident from the start.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Input {
        Input {
            status: Status::Init,
            buf: bytes.into(),
            pos: 0,
            line: 0,
            separator: b'\n',
            ahead: BUFFER_AHEAD,
            src: None,
        }
    }

    /// Overrides the read-ahead amount. Mostly useful to exercise buffer
    /// management with small windows.
    pub fn with_read_ahead(mut self, ahead: usize) -> Input {
        self.ahead = ahead;
        self
    }

    /// Sets the byte counted as a line separator (`\n` by default).
    pub fn set_separator(&mut self, separator: u8) {
        self.separator = separator;
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }

    /// The absolute offset of the cursor.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Line separators crossed before the cursor. Advisory, for diagnostics.
    #[inline(always)]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Whether any data remains at or after the cursor. This does not probe
    /// the source, so it can report `true` when the source turns out to be
    /// empty on the next read.
    #[inline]
    pub fn has_more(&self) -> bool {
        self.pos < self.buf.len() || self.src.is_some()
    }

    /// The number of buffered bytes from the cursor forward. At least the
    /// read-ahead amount once topped up, unless the source is exhausted.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Tops up the buffer so that at least `min` bytes (or the read-ahead
    /// amount, whichever is larger) are available past the cursor, stopping
    /// early when the source ends.
    fn fill(&mut self, min: usize) -> io::Result<()> {
        let target = self.pos + min.max(self.ahead);
        while self.buf.len() < target {
            let Some(src) = self.src.as_mut() else { break };
            let start = self.buf.len();
            self.buf.resize(start + READ_CHUNK, 0);
            let n = match src.read(&mut self.buf[start..]) {
                Ok(n) => n,
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(err);
                }
            };
            self.buf.truncate(start + n);
            if n == 0 {
                self.src = None;
            }
        }
        Ok(())
    }

    /// Repositions the cursor to an absolute offset. Moving forwards preloads
    /// on demand; moving backwards works for any offset, since the head is
    /// never trimmed. Returns `false`, without relocating, when the offset is
    /// past the end of the stream.
    pub fn move_to(&mut self, offset: usize) -> io::Result<bool> {
        if offset > self.buf.len() {
            self.fill(offset - self.pos)?;
            if offset > self.buf.len() {
                return Ok(false);
            }
        }
        if offset > self.pos {
            self.line += count_separators(&self.buf[self.pos..offset], self.separator);
        } else {
            self.line -= count_separators(&self.buf[offset..self.pos], self.separator);
        }
        self.pos = offset;
        // Keep the read-ahead window loaded from the new position.
        self.fill(0)?;
        self.status = if self.src.is_none() && self.pos == self.buf.len() {
            Status::Ended
        } else if self.src.is_none() {
            Status::InputEnded
        } else {
            Status::Processing
        };
        Ok(true)
    }

    /// Relocates the cursor by a signed distance. Negative distances rewind,
    /// which backtracking uses. Returns `false` when the target offset falls
    /// outside the stream.
    pub fn advance(&mut self, n: isize) -> io::Result<bool> {
        let target = if n >= 0 {
            self.pos + n as usize
        } else {
            match self.pos.checked_sub(n.unsigned_abs()) {
                Some(target) => target,
                None => return Ok(false),
            }
        };
        self.move_to(target)
    }

    /// Returns the buffered window at the cursor, topped up to at least `min`
    /// bytes when the source still has them. Conditions peek at upcoming
    /// input through this.
    pub fn lookahead(&mut self, min: usize) -> io::Result<&[u8]> {
        self.fill(min)?;
        Ok(&self.buf[self.pos..])
    }

    /// Slices already acquired input by absolute offset.
    #[inline]
    pub(crate) fn slice(&self, offset: usize, length: usize) -> &[u8] {
        debug_assert!(offset + length <= self.buf.len(), "slice of unacquired input");
        &self.buf[offset..offset + length]
    }
}

fn count_separators(buf: &[u8], separator: u8) -> usize {
    memchr_iter(separator, buf).count()
}

impl Debug for Input {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("status", &self.status.tag())
            .field("offset", &self.pos)
            .field("line", &self.line)
            .field("ahead", &self.buf[self.pos..].as_bstr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};

    use super::*;

    /// A reader that trickles its contents a few bytes at a time.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(self.data.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn relocation_and_lines() {
        let mut input = Input::from_bytes(&b"one\ntwo\nthree\n"[..]);
        assert_eq!(input.status(), Status::Init);
        assert!(input.has_more());
        assert_eq!(input.remaining(), 14);

        assert!(input.move_to(4).unwrap());
        assert_eq!(input.offset(), 4);
        assert_eq!(input.line(), 1);
        assert!(input.advance(4).unwrap());
        assert_eq!(input.line(), 2);
        assert!(input.advance(-8).unwrap());
        assert_eq!(input.offset(), 0);
        assert_eq!(input.line(), 0);

        assert!(input.move_to(14).unwrap());
        assert_eq!(input.status(), Status::Ended);
        assert_eq!(input.line(), 3);
        assert!(!input.has_more());

        assert!(!input.move_to(15).unwrap());
        assert_eq!(input.offset(), 14, "failed relocation must not move the cursor");
    }

    #[test]
    fn rewind_before_start_fails() {
        let mut input = Input::from_bytes(&b"abc"[..]);
        assert!(!input.advance(-1).unwrap());
        assert_eq!(input.offset(), 0);
    }

    #[test]
    fn preloads_from_slow_source() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let src = Trickle {
            data: data.clone(),
            pos: 0,
            step: 3,
        };
        let mut input = Input::from_source(src).unwrap().with_read_ahead(16);
        assert!(input.remaining() >= 16 || input.remaining() == data.len());

        assert!(input.move_to(997).unwrap());
        assert_eq!(input.lookahead(0).unwrap(), &data[997..]);
        assert!(input.move_to(data.len()).unwrap());
        assert_eq!(input.status(), Status::Ended);
        assert!(!input.move_to(data.len() + 1).unwrap());

        assert!(input.move_to(0).unwrap());
        assert_eq!(input.status(), Status::InputEnded);
        assert_eq!(input.remaining(), data.len());
    }

    #[test]
    fn custom_separator() {
        let mut input = Input::from_bytes(&b"a|b|c"[..]);
        input.set_separator(b'|');
        assert!(input.move_to(5).unwrap());
        assert_eq!(input.line(), 2);
        assert!(input.move_to(1).unwrap());
        assert_eq!(input.line(), 0);
    }
}
