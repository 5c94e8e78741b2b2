//! Tiny UNIX-domain-socket echo server used only by integration tests and
//! manual exercises of the `unix` channel method.
//!
//! Ported from `usrv.c`: accept one connection, then fork -- the child
//! copies socket-to-stdout, the parent copies stdin-to-socket. Either side
//! seeing EOF tears down both and unlinks the socket path. Not part of the
//! multiplexer's own dependency graph.

use std::ffi::CString;
use std::os::unix::io::RawFd;

fn errxit(what: &str) -> ! {
    eprintln!("{what}: {}", std::io::Error::last_os_error());
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <socketpath>", args[0]);
        std::process::exit(1);
    }
    let path = &args[1];

    if path.len() >= std::mem::size_of::<libc::sockaddr_un>() - std::mem::size_of::<libc::sa_family_t>() {
        eprintln!("error: path too long");
        std::process::exit(1);
    }

    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, &src) in addr.sun_path.iter_mut().zip(path.as_bytes().iter()) {
        *dst = src as libc::c_char;
    }
    let len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;

    let listener = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if listener == -1 {
        errxit("socket()");
    }
    if unsafe { libc::bind(listener, &addr as *const _ as *const libc::sockaddr, len) } == -1 {
        errxit("bind()");
    }
    if unsafe { libc::listen(listener, 1) } == -1 {
        errxit("listen()");
    }

    let mut peer_addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    let mut peer_len = len;
    let fd = unsafe {
        libc::accept(
            listener,
            &mut peer_addr as *mut _ as *mut libc::sockaddr,
            &mut peer_len,
        )
    };
    if fd == -1 {
        errxit("accept()");
    }

    let pid = unsafe { libc::fork() };
    if pid == -1 {
        errxit("fork()");
    }

    let child = pid == 0;
    let read_fd: RawFd = if child { fd } else { 0 };
    let write_fd: RawFd = if child { 1 } else { fd };
    let signal_target = if child { unsafe { libc::getppid() } } else { pid };

    let mut buf = [0u8; 1024];
    loop {
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        match n {
            -1 => errxit("read()"),
            0 => {
                eprintln!("\n[EOF].");
                unsafe { libc::kill(signal_target, libc::SIGTERM) };
                if !child {
                    let cpath = CString::new(path.as_str()).unwrap();
                    unsafe { libc::unlink(cpath.as_ptr()) };
                }
                std::process::exit(0);
            }
            n => {
                let n = n as usize;
                let w = unsafe { libc::write(write_fd, buf[..n].as_ptr() as *const libc::c_void, n) };
                if w as usize != n {
                    if w == -1 {
                        errxit("write()");
                    } else {
                        eprintln!("write() failed.");
                        unsafe { libc::kill(signal_target, libc::SIGTERM) };
                        if !child {
                            let cpath = CString::new(path.as_str()).unwrap();
                            unsafe { libc::unlink(cpath.as_ptr()) };
                        }
                        std::process::exit(1);
                    }
                }
            }
        }
    }
}
