//! The queueable unit of data moving between framer, mux/demux and the
//! per-fd write queue.
//!
//! The original keeps `prefix` glued directly in front of `data` in one
//! flexible-array-member allocation so that a single `write()` can cover
//! both. Here `mux()`/serialization builds one `Vec<u8>` up front instead,
//! which gives the same "one contiguous slice to write" property without
//! gluing two struct fields together by hand. The partial-write cursor
//! itself is *not* stored here (see `scheduler::FdIo`) so a message can be
//! logged as a whole once fully written.

pub const PREFIX_LEN: usize = 5;

/// Ignore any prefix; the whole buffer is payload.
pub const PLAIN: u8 = 0x01;
/// The payload did not end with `\n` at the source; a synthetic newline
/// was appended.
pub const NONL: u8 = 0x02;
/// This is an error/diagnostic message.
pub const ERR: u8 = 0x04;
/// Channel-closed notification.
pub const EOF: u8 = 0x08;

/// Framing character for a set of message flags, as used both by `mux()`
/// and by the emergency writer.
pub fn frame_char(flags: u8) -> u8 {
    if flags & EOF != 0 {
        b'.'
    } else if flags & ERR != 0 {
        b'!'
    } else if flags & NONL != 0 {
        b'_'
    } else {
        b'>'
    }
}

/// A single queued unit of output (or, before `demux`, of unrouted input).
#[derive(Debug, Clone)]
pub struct Message {
    pub flags: u8,
    bytes: Vec<u8>,
}

impl Message {
    /// Build a message directly from payload bytes, flagged `PLAIN`
    /// (no prefix yet). Used by the framer and by `mlpx_printf`-style
    /// formatted diagnostics.
    pub fn plain(mut payload: Vec<u8>, extra_flags: u8) -> Self {
        debug_assert_eq!(extra_flags & PLAIN, 0, "PLAIN is implicit here");
        if extra_flags & NONL != 0 {
            payload.push(b'\n');
        }
        Message {
            flags: extra_flags | PLAIN,
            bytes: payload,
        }
    }

    /// Build a message straight from a line already carrying its 5-byte
    /// prefix (used for inbound lines before `demux` validates them).
    pub fn with_prefix(bytes: Vec<u8>, flags: u8) -> Self {
        debug_assert_eq!(flags & PLAIN, 0);
        Message { flags, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_plain(&self) -> bool {
        self.flags & PLAIN != 0
    }

    /// Prefix bytes if not plain, else `None`.
    pub fn prefix(&self) -> Option<&[u8]> {
        if self.is_plain() {
            None
        } else {
            Some(&self.bytes[..PREFIX_LEN])
        }
    }

    /// The payload, excluding any prefix.
    pub fn payload(&self) -> &[u8] {
        if self.is_plain() {
            &self.bytes
        } else {
            &self.bytes[PREFIX_LEN..]
        }
    }

    /// The full wire representation: prefix (if any) plus payload, as one
    /// contiguous slice ready for a single `write()`.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Apply the `mux()` transform: compute and prepend a 5-byte prefix
    /// for `id`, clearing `PLAIN`. `self` must currently be `PLAIN`.
    pub fn mux(&mut self, id: u8) {
        debug_assert!(self.is_plain(), "mux(): message already has a prefix");
        let tc = frame_char(self.flags);
        let [hi, lo] = crate::util::upper_hex_byte(id);
        let mut framed = Vec::with_capacity(PREFIX_LEN + self.bytes.len());
        framed.extend_from_slice(&[tc, hi, lo, tc, b' ']);
        framed.extend_from_slice(&self.bytes);
        self.bytes = framed;
        self.flags &= !PLAIN;
    }

    /// Apply the `demux()` transform: strip and discard the already
    /// validated 5-byte prefix, marking the message `PLAIN`.
    pub fn strip_prefix_as_demuxed(&mut self) {
        debug_assert!(!self.is_plain());
        self.bytes.drain(..PREFIX_LEN);
        self.flags |= PLAIN;
    }
}
