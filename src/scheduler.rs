//! The event loop: fd readiness, timed events, write queues with
//! partial-write bookkeeping and stall detection, and the emergency
//! writer.
//!
//! Grounded on `tesc.c` (`tesc_main`, `tesc_timedev`, `tesc_emerg`,
//! `tesc_add_reader`, `tesc_enq_wq`, `tesc_log`) and `mlpx.c`
//! (`mlpx_update`, `mlpx_setup_ch`, `mlpx_cleanup_ch`, `mlpx_init`'s
//! banner). Built on `mio::Poll`/`Events`/`Token`/`Interest` the way
//! `mio`'s own `tcp_server.rs` example structures a poll loop,
//! generalized from one listener to many independently-typed channel
//! fds plus the shared stdin/stdout pair.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::buffer::{Buffer, ReadOutcome};
use crate::channel::{self, ChannelMap};
use crate::config::{ChannelConfig, Config};
use crate::logfile::{self, Direction};
use crate::message::{self, Message};
use crate::mux::{self, DemuxTarget};
use crate::util::{CHN_CMD, CHN_MSG};

/// Which fd a piece of scheduler state belongs to: one of the two halves
/// of the shared stdio pair, or a real, addressable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdSource {
    MainIn,
    MainOut,
    Channel(u8),
}

/// Hand-off from the scheduler to the command interpreter for a fd whose
/// non-blocking open/connect was in progress and just became ready.
pub struct OpenResultNotification {
    pub id: u8,
    pub readable: bool,
    pub writable: bool,
}

struct FdIo {
    source: FdSource,
    reader: Option<Buffer>,
    write_queue: VecDeque<Message>,
    bytes_written: usize,
    last_progress: Instant,
    /// Only ever `Some` for the shared output fd: stall-detection timeout
    /// is a property of main-out in practice (configured channels always
    /// have it disabled, matching `mlpx_init`'s `chmap[i]->timeout = 0`).
    timeout: Option<Duration>,
    /// If true, keep this entry alive even with no reader and an empty
    /// write queue (`tesc_keep`).
    keep: bool,
    registered_interest: Option<Interest>,
}

impl FdIo {
    fn new(source: FdSource) -> Self {
        FdIo {
            source,
            reader: None,
            write_queue: VecDeque::new(),
            bytes_written: 0,
            last_progress: Instant::now(),
            timeout: None,
            keep: false,
            registered_interest: None,
        }
    }
}

struct TimedEventEntry {
    deadline: Instant,
    seq: u64,
    callback: Box<dyn FnMut(&mut Scheduler)>,
}

impl PartialEq for TimedEventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimedEventEntry {}

impl Ord for TimedEventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so a std max-heap (BinaryHeap) pops the earliest
        // deadline first, ties broken by insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for TimedEventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

struct EventInfo {
    fd: RawFd,
    readable: bool,
    writable: bool,
    error: bool,
    read_closed: bool,
    write_closed: bool,
}

pub struct Scheduler {
    poll: Poll,
    events: Events,
    channels: ChannelMap,
    fdio: HashMap<RawFd, FdIo>,
    timed: BinaryHeap<TimedEventEntry>,
    timed_seq: u64,
    cmd_input: VecDeque<Message>,
    open_notifications: Vec<OpenResultNotification>,
    config: Config,
    stall_timeout_secs: u64,
    global_log: Option<std::fs::File>,
    main_in_eof: bool,
    main_out_fd: RawFd,
}

impl Scheduler {
    pub fn new(config: Config) -> io::Result<Scheduler> {
        let poll = Poll::new()?;
        let events = Events::with_capacity(128);

        let mut channels = ChannelMap::new();
        let channel_cfgs: Vec<Arc<ChannelConfig>> =
            config.channels.iter().cloned().map(Arc::new).collect();
        channels.install_configured(&channel_cfgs);

        let global_log = match &config.log {
            Some(path) => match logfile::open(path) {
                Ok(f) => Some(f),
                Err(e) => {
                    log::error!("logfile open: {}: {e}", path.display());
                    None
                }
            },
            None => None,
        };

        let stall_timeout_secs = config.timeout;

        set_nonblocking(1)?;

        let mut sched = Scheduler {
            poll,
            events,
            channels,
            fdio: HashMap::new(),
            timed: BinaryHeap::new(),
            timed_seq: 0,
            cmd_input: VecDeque::new(),
            open_notifications: Vec::new(),
            config,
            stall_timeout_secs,
            global_log,
            main_in_eof: false,
            main_out_fd: 1,
        };

        sched.ensure_fdio(0, FdSource::MainIn);
        sched.fdio.get_mut(&0).unwrap().reader = Some(Buffer::new(true, false));

        sched.ensure_fdio(1, FdSource::MainOut);
        {
            let fdio = sched.fdio.get_mut(&1).unwrap();
            fdio.keep = true;
            if sched.stall_timeout_secs > 0 {
                fdio.timeout = Some(Duration::from_secs(sched.stall_timeout_secs));
            }
        }

        sched.emit_banner();

        Ok(sched)
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelMap {
        &mut self.channels
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn take_open_notifications(&mut self) -> Vec<OpenResultNotification> {
        std::mem::take(&mut self.open_notifications)
    }

    pub(crate) fn take_cmd_input(&mut self) -> VecDeque<Message> {
        std::mem::take(&mut self.cmd_input)
    }

    fn ensure_fdio(&mut self, fd: RawFd, source: FdSource) {
        self.fdio.entry(fd).or_insert_with(|| FdIo::new(source));
    }

    /// Register a newly-created fd with the scheduler before its
    /// open/connect has completed, so readiness notifications reach
    /// `cmdi::handle_open_notification` (`tesc_enq_wq(ch, 0)` +
    /// `tesc_keep(ch)` in the original).
    pub(crate) fn track_connecting(&mut self, id: u8) {
        let fd = self
            .channels
            .get(id)
            .and_then(|c| c.fd())
            .expect("track_connecting: channel has no fd");
        self.ensure_fdio(fd, FdSource::Channel(id));
        self.fdio.get_mut(&fd).unwrap().keep = true;
    }

    /// Finish setting up a channel after a successful (immediate or
    /// completed-nonblocking) open: install a reader if readable, open
    /// its logfile, emit its startup message. Mirrors `mlpx_setup_ch`.
    pub(crate) fn setup_channel_io(&mut self, id: u8) {
        let (readable, cfg) = {
            let ch = self.channels.get(id).expect("setup_channel_io: no such channel");
            (ch.flags & channel::RD != 0, ch.config.clone())
        };
        let fd = self
            .channels
            .get(id)
            .and_then(|c| c.fd())
            .expect("setup_channel_io: channel has no fd");

        self.ensure_fdio(fd, FdSource::Channel(id));
        if readable {
            self.fdio.get_mut(&fd).unwrap().reader = Some(Buffer::new(false, true));
        } else {
            self.fdio.get_mut(&fd).unwrap().keep = true;
        }

        if let Some(cfg) = &cfg {
            if let Some(path) = &cfg.log {
                match logfile::open(path) {
                    Ok(f) => {
                        self.channels.get_mut(id).unwrap().log_fd = Some(f);
                    }
                    Err(e) => {
                        self.enqueue_main_out(mux::printf(
                            CHN_MSG,
                            message::ERR,
                            format!("logfile open: {}: {e}\n", path.display()),
                        ));
                    }
                }
            }
            for line in cfg.msg.clone() {
                self.enqueue_main_out(mux::printf(CHN_CMD, 0, format!("# {line}\n")));
            }
        }
    }

    /// Tear down everything owned by a channel after its fd has been (or
    /// is about to be) closed: drop its reader/write-queue state and
    /// close its logfile. Mirrors `mlpx_cleanup_ch`.
    pub(crate) fn cleanup_channel(&mut self, id: u8) {
        if let Some(fd) = self.channels.get(id).and_then(|c| c.fd()) {
            self.fdio.remove(&fd);
            let mut s = SourceFd(&fd);
            let _ = self.poll.registry().deregister(&mut s);
        }
        if let Some(ch) = self.channels.get_mut(id) {
            ch.clear();
        }
    }

    pub(crate) fn schedule_timed_event(
        &mut self,
        delay: Duration,
        callback: impl FnMut(&mut Scheduler) + 'static,
    ) {
        let seq = self.timed_seq;
        self.timed_seq += 1;
        self.timed.push(TimedEventEntry {
            deadline: Instant::now() + delay,
            seq,
            callback: Box::new(callback),
        });
    }

    pub(crate) fn enqueue_main_out(&mut self, msg: Message) {
        let fd = self.main_out_fd;
        let fdio = self.fdio.get_mut(&fd).expect("main-out fdio always present");
        if fdio.write_queue.is_empty() && fdio.timeout.is_some() {
            fdio.last_progress = Instant::now();
        }
        fdio.write_queue.push_back(msg);
    }

    fn enqueue_channel_write(&mut self, id: u8, msg: Message) {
        let Some(fd) = self.channels.get(id).and_then(|c| c.fd()) else {
            return;
        };
        self.ensure_fdio(fd, FdSource::Channel(id));
        self.fdio.get_mut(&fd).unwrap().write_queue.push_back(msg);
    }

    fn emit_banner(&mut self) {
        self.enqueue_main_out(mux::printf(
            CHN_CMD,
            0,
            format!("### CHANMUX VERSION {} ###\n", env!("CARGO_PKG_VERSION")),
        ));
        self.enqueue_main_out(mux::printf(
            CHN_CMD,
            0,
            format!("CMD {CHN_CMD:02X} MSG {CHN_MSG:02X}\n"),
        ));
        self.enqueue_main_out(mux::printf(CHN_CMD, 0, "CHANNELS:\n".to_string()));

        let lines: Vec<(u8, String, String)> = self
            .channels
            .iter_configured()
            .filter_map(|c| {
                c.config
                    .as_ref()
                    .map(|cfg| (c.id, cfg.type_label.clone(), cfg.name.clone()))
            })
            .collect();
        for (id, ty, name) in lines {
            self.enqueue_main_out(mux::printf(CHN_CMD, 0, format!("{id:02X} {ty} \"{name}\"\n")));
        }
        self.enqueue_main_out(mux::printf(CHN_CMD, 0, "\n".to_string()));

        for line in self.config.msg.clone() {
            self.enqueue_main_out(mux::printf(CHN_CMD, 0, format!("# {line}\n")));
        }
        self.enqueue_main_out(mux::printf(CHN_CMD, 0, "READY\n".to_string()));

        if self.config.keepalive > 0 {
            self.schedule_timed_event(Duration::from_secs(self.config.keepalive), keepalive_tick);
        }
    }

    /// Synchronous, allocation-free, deadline-bounded writer on the shared
    /// output, used for fatal diagnostics before/after the scheduler can
    /// be trusted. Mirrors `tesc_emerg`.
    pub(crate) fn emergency_write(&mut self, id: u8, flags: u8, text: &str) {
        const BUF_CAP: usize = 1024;
        let mut buf = [0u8; BUF_CAP];
        let mut len = 0usize;

        let bw = self.fdio.get(&self.main_out_fd).map(|f| f.bytes_written).unwrap_or(0);
        if bw > 0 {
            let notice = format!("\n!{CHN_MSG:02X}! output interrupted\n");
            let n = notice.len().min(BUF_CAP);
            buf[..n].copy_from_slice(&notice.as_bytes()[..n]);
            len = n;
            if let Some(fdio) = self.fdio.get_mut(&self.main_out_fd) {
                fdio.bytes_written = 0;
            }
        }

        let tc = message::frame_char(flags) as char;
        let prefix = format!("{tc}{id:02X}{tc} ");
        let take = prefix.len().min(BUF_CAP - len);
        buf[len..len + take].copy_from_slice(&prefix.as_bytes()[..take]);
        len += take;

        let take = text.len().min(BUF_CAP - len);
        buf[len..len + take].copy_from_slice(&text.as_bytes()[..take]);
        len += take;

        let deadline_secs = if self.stall_timeout_secs > 0 {
            self.stall_timeout_secs
        } else {
            30
        };
        let deadline = Instant::now() + Duration::from_secs(deadline_secs);
        let mut off = 0;
        loop {
            if off >= len {
                break;
            }
            if Instant::now() > deadline {
                std::process::exit(1);
            }
            let n = unsafe {
                libc::write(
                    self.main_out_fd,
                    buf[off..len].as_ptr() as *const libc::c_void,
                    len - off,
                )
            };
            if n >= 0 {
                off += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                std::process::exit(1);
            }
        }
    }

    fn quit_on_main_eof(&mut self) {
        self.emergency_write(CHN_MSG, 0, "EOF on main input\n");
        self.emergency_write(CHN_MSG, message::EOF, "\n");
        self.emergency_write(CHN_CMD, message::EOF, "\n");
        std::process::exit(0);
    }

    fn is_in_progress(&self, source: FdSource) -> bool {
        match source {
            FdSource::Channel(id) => self.channels.get(id).map(|c| c.is_in_progress()).unwrap_or(false),
            _ => false,
        }
    }

    fn sync_registrations(&mut self) {
        let fds: Vec<RawFd> = self.fdio.keys().copied().collect();
        for fd in fds {
            let source = self.fdio[&fd].source;
            let in_progress = self.is_in_progress(source);

            let mut interest = None;
            {
                let fdio = &self.fdio[&fd];
                if in_progress {
                    interest = Some(Interest::READABLE | Interest::WRITABLE);
                } else {
                    if fdio.reader.is_some() {
                        interest = Some(Interest::READABLE);
                    }
                    if !fdio.write_queue.is_empty() {
                        interest = Some(match interest {
                            Some(i) => i.add(Interest::WRITABLE),
                            None => Interest::WRITABLE,
                        });
                    }
                }
            }

            let fdio = self.fdio.get_mut(&fd).unwrap();
            match (interest, fdio.registered_interest) {
                (None, None) => {}
                (None, Some(_)) => {
                    let mut s = SourceFd(&fd);
                    let _ = self.poll.registry().deregister(&mut s);
                    fdio.registered_interest = None;
                }
                (Some(i), None) => {
                    let mut s = SourceFd(&fd);
                    if self.poll.registry().register(&mut s, Token(fd as usize), i).is_ok() {
                        self.fdio.get_mut(&fd).unwrap().registered_interest = Some(i);
                    }
                }
                (Some(i), Some(prev)) if i != prev => {
                    let mut s = SourceFd(&fd);
                    if self.poll.registry().reregister(&mut s, Token(fd as usize), i).is_ok() {
                        self.fdio.get_mut(&fd).unwrap().registered_interest = Some(i);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_stalls(&mut self, now: Instant) -> Option<Duration> {
        let mut min_remaining = None;
        let candidates: Vec<RawFd> = self
            .fdio
            .iter()
            .filter(|(_, f)| f.timeout.is_some() && !f.write_queue.is_empty())
            .map(|(fd, _)| *fd)
            .collect();
        for fd in candidates {
            let (timeout, last_progress) = {
                let f = &self.fdio[&fd];
                (f.timeout.unwrap(), f.last_progress)
            };
            let elapsed = now.saturating_duration_since(last_progress);
            if elapsed >= timeout {
                self.emergency_write(CHN_MSG, message::ERR, "output stalled, giving up\n");
                std::process::exit(1);
            }
            let remaining = timeout - elapsed;
            min_remaining = Some(min_remaining.map_or(remaining, |m: Duration| m.min(remaining)));
        }
        min_remaining
    }

    fn run_due_timed_events(&mut self) {
        loop {
            let due = matches!(self.timed.peek(), Some(e) if e.deadline <= Instant::now());
            if !due {
                break;
            }
            let mut entry = self.timed.pop().unwrap();
            (entry.callback)(self);
        }
    }

    fn log_message(&mut self, source: FdSource, msg: &Message, dir: Direction) {
        match source {
            FdSource::Channel(id) => {
                if let Some(ch) = self.channels.get_mut(id) {
                    if let Some(log) = ch.log_fd.as_mut() {
                        if logfile::log(log, msg, dir).is_err() {
                            ch.flags |= channel::ERR_L;
                        }
                    }
                }
            }
            FdSource::MainIn | FdSource::MainOut => {
                if let Some(log) = self.global_log.as_mut() {
                    let _ = logfile::log(log, msg, dir);
                }
            }
        }
    }

    fn route_incoming(&mut self, source: FdSource, mut msg: Message) {
        match source {
            FdSource::Channel(id) => {
                msg.mux(id);
                self.enqueue_main_out(msg);
            }
            FdSource::MainIn => match mux::demux(msg, &self.channels) {
                Ok((DemuxTarget::Cmd, m)) => self.cmd_input.push_back(m),
                Ok((DemuxTarget::EchoMsg, mut m)) => {
                    m.mux(CHN_MSG);
                    self.enqueue_main_out(m);
                }
                Ok((DemuxTarget::Channel(id), m)) => self.enqueue_channel_write(id, m),
                Err(diag) => self.enqueue_main_out(diag),
            },
            FdSource::MainOut => unreachable!("main-out fd is never readable"),
        }
    }

    fn mark_eof(&mut self, source: FdSource) {
        match source {
            FdSource::Channel(id) => {
                if let Some(ch) = self.channels.get_mut(id) {
                    ch.flags |= channel::EOF;
                }
            }
            FdSource::MainIn => self.main_in_eof = true,
            FdSource::MainOut => {}
        }
    }

    fn mark_read_error(&mut self, source: FdSource, _err: io::Error) {
        if let FdSource::Channel(id) = source {
            if let Some(ch) = self.channels.get_mut(id) {
                ch.flags |= channel::ERR_R;
            }
        }
    }

    fn mark_write_error(&mut self, source: FdSource, _err: io::Error) {
        if let FdSource::Channel(id) = source {
            if let Some(ch) = self.channels.get_mut(id) {
                ch.flags |= channel::ERR_W;
            }
        }
    }

    fn service_readable(&mut self, fd: RawFd, source: FdSource) {
        let mut emitted = Vec::new();
        let outcome = {
            let fdio = self.fdio.get_mut(&fd).unwrap();
            let Some(reader) = fdio.reader.as_mut() else {
                return;
            };
            reader.read_and_emit(fd, |m| emitted.push(m))
        };
        match outcome {
            Ok(ReadOutcome::Data(_)) => {
                for msg in emitted {
                    self.log_message(source, &msg, Direction::In);
                    self.route_incoming(source, msg);
                }
            }
            Ok(ReadOutcome::Eof) => self.mark_eof(source),
            Err(e) => self.mark_read_error(source, e),
        }
    }

    fn service_writable(&mut self, fd: RawFd, source: FdSource) {
        let (bytes, start) = {
            let fdio = self.fdio.get(&fd).unwrap();
            match fdio.write_queue.front() {
                Some(head) => (head.bytes().to_vec(), fdio.bytes_written),
                None => return,
            }
        };
        let remaining = &bytes[start..];
        let n = unsafe { libc::write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            self.mark_write_error(source, err);
            return;
        }
        let n = n as usize;

        let has_timeout = self.fdio[&fd].timeout.is_some();
        if has_timeout {
            self.fdio.get_mut(&fd).unwrap().last_progress = Instant::now();
        }

        if start + n == bytes.len() {
            let head = self.fdio.get_mut(&fd).unwrap().write_queue.pop_front().unwrap();
            self.fdio.get_mut(&fd).unwrap().bytes_written = 0;
            self.log_message(source, &head, Direction::Out);
        } else {
            self.fdio.get_mut(&fd).unwrap().bytes_written = start + n;
        }
    }

    fn channel_update(&mut self, id: u8) {
        let (had_error, had_eof, is_proc, pid) = {
            let Some(ch) = self.channels.get(id) else { return };
            (
                ch.flags & channel::ERROR != 0,
                ch.flags & channel::EOF != 0,
                ch.flags & channel::PROC != 0,
                ch.pid,
            )
        };

        if had_error {
            if let Some(ch) = self.channels.get_mut(id) {
                ch.flags &= !channel::ERROR;
            }
        }

        if had_eof {
            if is_proc {
                if let Some(pid) = pid {
                    crate::cmdi::install_reaper(self, pid);
                }
            }
            self.enqueue_main_out(mux::printf(CHN_MSG, 0, format!("EOF on channel {id:02x}\n")));
            self.enqueue_main_out(mux::printf(id, message::EOF, "\n".to_string()));
            self.cleanup_channel(id);
        }
    }

    fn service_event(&mut self, info: EventInfo) {
        let fd = info.fd;
        let Some(source) = self.fdio.get(&fd).map(|f| f.source) else {
            return;
        };

        if info.error || info.read_closed || info.write_closed {
            if let FdSource::Channel(id) = source {
                if let Some(ch) = self.channels.get_mut(id) {
                    ch.flags |= channel::ERR_P;
                    // `mio::event::Event` exposes error/closed state as
                    // booleans rather than a raw revents bitmask; fold them
                    // back into the POLL* bits they stand for so `pxfl`
                    // keeps recording what tripped the error, the way
                    // `tesc.c` stashes `rev` on `CHN_ERR_P`.
                    let mut revents: i16 = 0;
                    if info.error {
                        revents |= libc::POLLERR as i16;
                    }
                    if info.read_closed || info.write_closed {
                        revents |= libc::POLLHUP as i16;
                    }
                    ch.pxfl = revents;
                }
            }
        }

        if self.is_in_progress(source) && (info.readable || info.writable) {
            if let FdSource::Channel(id) = source {
                self.open_notifications.push(OpenResultNotification {
                    id,
                    readable: info.readable,
                    writable: info.writable,
                });
            }
            return;
        }

        if info.readable {
            self.service_readable(fd, source);
        }
        if info.writable {
            self.service_writable(fd, source);
        }

        match source {
            FdSource::Channel(id) => {
                if self.channels.get(id).map(|c| c.needs_update()).unwrap_or(false) {
                    self.channel_update(id);
                }
            }
            FdSource::MainIn => {
                if self.main_in_eof {
                    self.main_in_eof = false;
                    self.quit_on_main_eof();
                }
            }
            FdSource::MainOut => {}
        }
    }

    /// Drop any `FdIo` entries that have no reader, an empty write queue,
    /// and are not `keep`-marked -- the Rust-side equivalent of
    /// `tesc_del_reader`/`tesc_del_wq` freeing the fdio structure once
    /// both halves are gone.
    fn reap_idle_fdio(&mut self) {
        let dead: Vec<RawFd> = self
            .fdio
            .iter()
            .filter(|(_, f)| f.reader.is_none() && f.write_queue.is_empty() && !f.keep)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in dead {
            self.fdio.remove(&fd);
            let mut s = SourceFd(&fd);
            let _ = self.poll.registry().deregister(&mut s);
        }
    }

    /// The scheduler main loop. Returns only if every fdio entry
    /// (including the permanently-`keep`-marked main-output one) has
    /// vanished; in practice `quit`/fatal paths exit the process directly
    /// long before that, matching the original's own structure.
    pub fn run(&mut self) -> ! {
        loop {
            self.sync_registrations();

            let now = Instant::now();
            let stall_timeout = self.check_stalls(now);
            let timed_timeout = self
                .timed
                .peek()
                .map(|e| e.deadline.saturating_duration_since(now));

            let poll_timeout = match (timed_timeout, stall_timeout) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            if let Err(e) = self.poll.poll(&mut self.events, poll_timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.emergency_write(CHN_MSG, message::ERR, &format!("poll(): {e}\n"));
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }

            self.run_due_timed_events();

            let infos: Vec<EventInfo> = self
                .events
                .iter()
                .map(|e| EventInfo {
                    fd: e.token().0 as RawFd,
                    readable: e.is_readable(),
                    writable: e.is_writable(),
                    error: e.is_error(),
                    read_closed: e.is_read_closed(),
                    write_closed: e.is_write_closed(),
                })
                .collect();
            for info in infos {
                self.service_event(info);
            }

            crate::cmdi::tick(self);
            self.reap_idle_fdio();

            if self.fdio.is_empty() {
                std::process::exit(0);
            }
        }
    }
}

fn keepalive_tick(sched: &mut Scheduler) {
    sched.enqueue_main_out(mux::printf(CHN_MSG, 0, "-keepalive-\n".to_string()));
    let interval = sched.config.keepalive;
    sched.schedule_timed_event(Duration::from_secs(interval), keepalive_tick);
}
