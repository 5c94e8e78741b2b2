//! Best-effort append-only logging of messages read from / written to a
//! channel. Grounded on `tesc.c`'s `tesc_log`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn marker(self) -> &'static [u8] {
        match self {
            Direction::In => b"<",
            Direction::Out => b">",
        }
    }
}

pub fn open(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// Append `m` to `log`, prefixed with a one-byte direction marker. A
/// write error here is the caller's to flag on the channel (`ERR_L`); it
/// never closes the channel -- see `DESIGN.md` open question 1.
pub fn log(log: &mut File, m: &Message, dir: Direction) -> io::Result<()> {
    let bufs = [io::IoSlice::new(dir.marker()), io::IoSlice::new(m.bytes())];
    log.write_vectored(&bufs)?;
    Ok(())
}
