//! Channel state and the channel id -> `Channel` map.
//!
//! Grounded on `data.h`'s `chn_t`/`mlpx.h`'s channel flag bits and
//! `mlpx.c`'s `chmap`/`mlpx_setup_ch`/`mlpx_cleanup_ch`.

use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::config::ChannelConfig;

pub const RD: u16 = 0x0001;
pub const WR: u16 = 0x0002;
pub const ACTIVE: u16 = RD | WR;
pub const OIP: u16 = 0x0010;
pub const CIP: u16 = 0x0020;
pub const IN_PROGRESS: u16 = OIP | CIP;
pub const PROC: u16 = 0x0040;
pub const ERR_R: u16 = 0x0100;
pub const ERR_W: u16 = 0x0200;
pub const ERR_L: u16 = 0x0400;
pub const ERR_P: u16 = 0x0800;
pub const ERROR: u16 = ERR_R | ERR_W | ERR_L | ERR_P;
pub const EOF: u16 = 0x1000;
pub const NEED_UPDATE: u16 = ERROR | EOF;

// The shared stdin/stdout pair is not addressable as a channel id; it is
// represented by `scheduler::FdSource::{MainIn,MainOut}` instead of the
// original's sentinel `CHN_MAIN = -1`, making it structurally impossible
// for that pseudo-channel to end up in the `0..=255` channel map below.

/// A live or configured-but-closed channel.
pub struct Channel {
    pub id: u8,
    pub flags: u16,
    fd: Option<OwnedFd>,
    pub pid: Option<libc::pid_t>,
    /// Synthetic poll revents (`POLLERR`/`POLLHUP`) captured from the last
    /// failed poll-reported condition, kept only for diagnostics.
    pub pxfl: i16,
    pub config: Option<Arc<ChannelConfig>>,
    pub log_fd: Option<std::fs::File>,
}

impl Channel {
    /// A channel slot for an id not yet opened (as configured).
    pub fn closed(id: u8, config: Option<Arc<ChannelConfig>>) -> Self {
        Channel {
            id,
            flags: 0,
            fd: None,
            pid: None,
            pxfl: 0,
            config,
            log_fd: None,
        }
    }

    /// A fixed marker entry for `CHN_CMD`/`CHN_MSG`: never has a real fd,
    /// but must read as "open for writing" so `demux()` routes to it.
    pub fn reserved_marker(id: u8) -> Self {
        Channel {
            id,
            flags: WR,
            fd: None,
            pid: None,
            pxfl: 0,
            config: None,
            log_fd: None,
        }
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|f| {
            use std::os::unix::io::AsRawFd;
            f.as_raw_fd()
        })
    }

    /// Take ownership of a freshly opened fd, replacing any previous one
    /// (there should never be one).
    ///
    /// # Safety
    /// `fd` must be a valid, open, not-otherwise-owned file descriptor.
    pub unsafe fn set_fd(&mut self, fd: RawFd) {
        self.fd = Some(OwnedFd::from_raw_fd(fd));
    }

    /// Close and discard the fd (if any), matching `mlpx_cleanup_ch`'s
    /// "does not close the fd itself" contract at the call site: here the
    /// `OwnedFd`'s `Drop` performs the close.
    pub fn clear(&mut self) {
        self.flags = 0;
        self.fd = None;
        self.pid = None;
        self.log_fd = None;
    }

    pub fn is_active(&self) -> bool {
        self.flags & ACTIVE == ACTIVE
    }

    pub fn is_in_progress(&self) -> bool {
        self.flags & IN_PROGRESS != 0
    }

    pub fn needs_update(&self) -> bool {
        self.flags & NEED_UPDATE != 0
    }
}

/// `[Option<Channel>; 256]` indexed directly by channel id, as the base
/// spec recommends. `CHN_CMD`/`CHN_MSG` are always populated as routing
/// markers.
pub struct ChannelMap {
    slots: Box<[Option<Channel>; 256]>,
}

impl ChannelMap {
    pub fn new() -> Self {
        const NONE: Option<Channel> = None;
        let mut slots = Box::new([NONE; 256]);
        slots[crate::util::CHN_CMD as usize] = Some(Channel::reserved_marker(crate::util::CHN_CMD));
        slots[crate::util::CHN_MSG as usize] = Some(Channel::reserved_marker(crate::util::CHN_MSG));
        ChannelMap { slots }
    }

    /// Install the configured channels, in order, assigning ids densely
    /// starting at 1 and skipping the two reserved ids.
    pub fn install_configured(&mut self, channels: &[Arc<ChannelConfig>]) {
        let mut id: u16 = 0;
        for cfg in channels {
            while id as u8 == crate::util::CHN_CMD || id as u8 == crate::util::CHN_MSG {
                id += 1;
            }
            debug_assert!(id <= crate::util::CHN_MAX as u16);
            self.slots[id as usize] = Some(Channel::closed(id as u8, Some(cfg.clone())));
            id += 1;
        }
    }

    pub fn get(&self, id: u8) -> Option<&Channel> {
        self.slots[id as usize].as_ref()
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.slots[id as usize].as_mut()
    }

    /// Iterate ids in order, skipping the two reserved ones -- used for
    /// the startup banner and `status`.
    pub fn iter_configured(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter().enumerate().filter_map(|(id, slot)| {
            if id as u8 == crate::util::CHN_CMD || id as u8 == crate::util::CHN_MSG {
                None
            } else {
                slot.as_ref()
            }
        })
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::new()
    }
}
