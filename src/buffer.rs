//! Segmented input buffering and the wait-mode / immediate-mode line
//! framer built on top of it.
//!
//! Grounded on `data.c`/`data.h`: `new_sbuf`/`struct sbuf` become
//! [`Segment`]; `try_output`/`do_output` become [`Buffer::fill_and_emit`];
//! the intrusive `sbuf.next` linked list becomes a `VecDeque<Segment>`.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

use crate::message::{Message, NONL, PLAIN};

/// Segment payload size (`SBISIZ` in the original; there it is the size of
/// the whole allocation including the struct header, here it is just the
/// payload capacity).
const SEGMENT_CAP: usize = 0x2000;
/// Minimum free space wanted in the tail segment before a read (`SBIMIN`).
const MIN_READ: usize = 80;

struct Segment {
    data: Box<[u8; SEGMENT_CAP]>,
    start: usize,
    end: usize,
}

impl Segment {
    fn new() -> Self {
        Segment {
            data: Box::new([0u8; SEGMENT_CAP]),
            start: 0,
            end: 0,
        }
    }

    fn free(&self) -> usize {
        SEGMENT_CAP - self.end
    }

    fn filled(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Outcome of a single non-blocking read attempt.
pub enum ReadOutcome {
    /// `n` bytes were read and appended to the buffer.
    Data(usize),
    /// Zero-byte read: end of file.
    Eof,
}

/// Ordered byte accumulator spanning possibly many fixed-size segments.
pub struct SegmentedBuffer {
    segments: VecDeque<Segment>,
}

impl SegmentedBuffer {
    pub fn new() -> Self {
        let mut segments = VecDeque::new();
        segments.push_back(Segment::new());
        SegmentedBuffer { segments }
    }

    fn ensure_tail_capacity(&mut self) {
        let need_new = match self.segments.back() {
            Some(seg) => seg.free() < MIN_READ,
            None => true,
        };
        if need_new {
            self.segments.push_back(Segment::new());
        }
    }

    /// Perform a single non-blocking `read(2)` into the tail segment's
    /// free space. Must only be called after readiness has been reported
    /// by the scheduler; a `WouldBlock` here would indicate the caller
    /// polled incorrectly.
    pub fn fill_from_fd(&mut self, fd: RawFd) -> io::Result<ReadOutcome> {
        self.ensure_tail_capacity();
        let seg = self.segments.back_mut().expect("tail segment always exists");
        let free = seg.free();
        let dst = &mut seg.data[seg.end..seg.end + free];

        let n = unsafe {
            libc::read(fd, dst.as_mut_ptr() as *mut libc::c_void, dst.len())
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        seg.end += n;

        if n == 0 {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::Data(n))
        }
    }

    /// Total bytes currently buffered, across all segments.
    fn buffered_len(&self) -> usize {
        self.segments.iter().map(|s| s.filled().len()).sum()
    }

    /// Length (including the newline) of the next complete line at the
    /// front of the buffer, if any.
    fn find_newline(&self) -> Option<usize> {
        let mut len = 0;
        for seg in &self.segments {
            for &b in seg.filled() {
                len += 1;
                if b == b'\n' {
                    return Some(len);
                }
            }
        }
        None
    }

    /// Remove and return the first `n` buffered bytes, freeing any segment
    /// emptied in the process (resetting, rather than dropping, the sole
    /// remaining segment).
    fn drain_front(&mut self, mut n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        while n > 0 {
            let seg = self.segments.front_mut().expect("drain_front: buffer underrun");
            let avail = seg.filled().len();
            let take = avail.min(n);
            out.extend_from_slice(&seg.data[seg.start..seg.start + take]);
            seg.start += take;
            n -= take;

            if seg.is_empty() {
                if self.segments.len() > 1 {
                    self.segments.pop_front();
                } else {
                    let seg = self.segments.front_mut().unwrap();
                    seg.start = 0;
                    seg.end = 0;
                }
            }
        }
        out
    }
}

impl Default for SegmentedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Line framer sitting on a [`SegmentedBuffer`]: decides when a read's
/// bytes become one or more [`Message`]s.
///
/// `wait_for_newline == true` ("wait mode", used for the shared input
/// stream): emit only complete lines, keep partial trailing bytes
/// buffered.
///
/// `wait_for_newline == false` ("immediate mode", used for channel fds):
/// emit complete lines too, but additionally flush any partial trailing
/// bytes as a `NONL`-flagged message after every read.
pub struct Buffer {
    inner: SegmentedBuffer,
    wait_for_newline: bool,
    /// If true, emitted messages carry no prefix (payload only, `PLAIN`
    /// set); if false, the first 5 bytes of each line are left in place
    /// for the caller (`demux`) to validate as a prefix.
    plain: bool,
}

impl Buffer {
    pub fn new(wait_for_newline: bool, plain: bool) -> Self {
        Buffer {
            inner: SegmentedBuffer::new(),
            wait_for_newline,
            plain,
        }
    }

    fn flags(&self, nonl: bool) -> u8 {
        let mut f = 0;
        if nonl {
            f |= NONL;
        }
        if self.plain {
            f |= PLAIN;
        }
        f
    }

    fn make_message(&self, bytes: Vec<u8>, nonl: bool) -> Message {
        if self.plain {
            // `Message::plain` appends '\n' itself when NONL is requested;
            // a complete line already carries its own trailing '\n'.
            if nonl {
                Message::plain(bytes, NONL)
            } else {
                Message::plain(bytes, 0)
            }
        } else {
            Message::with_prefix(bytes, self.flags(nonl) & !PLAIN)
        }
    }

    fn drain_complete_lines(&mut self, emit: &mut impl FnMut(Message)) {
        while let Some(len) = self.inner.find_newline() {
            let bytes = self.inner.drain_front(len);
            emit(self.make_message(bytes, false));
        }
    }

    /// Read once from `fd` and emit whatever messages that read produces,
    /// per the configured mode. Mirrors `data_buf_input`/`try_output`.
    pub fn read_and_emit(
        &mut self,
        fd: RawFd,
        mut emit: impl FnMut(Message),
    ) -> io::Result<ReadOutcome> {
        let outcome = self.inner.fill_from_fd(fd)?;
        if matches!(outcome, ReadOutcome::Eof) {
            return Ok(outcome);
        }

        self.drain_complete_lines(&mut emit);

        if !self.wait_for_newline {
            let rem = self.inner.buffered_len();
            if rem > 0 {
                let bytes = self.inner.drain_front(rem);
                emit(self.make_message(bytes, true));
            }
        }

        Ok(outcome)
    }
}
