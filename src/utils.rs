use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;

use nix::libc;
use nix::sys::epoll::{Epoll, EpollFlags};

/// Adds or rearms a raw descriptor in the interest set. The safe
/// [`Epoll`] methods want an owning fd type, but poll handles only
/// carry the user's `RawFd`.
pub(crate) fn epoll_update(
    epoll: &Epoll,
    op: i32,
    fd: RawFd,
    interest: EpollFlags,
    token: u64,
) -> io::Result<()> {
    let mut event = libc::epoll_event {
        events: interest.bits() as u32,
        u64: token,
    };
    match unsafe { libc::epoll_ctl(epoll.0.as_raw_fd(), op, fd, &mut event) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Drops a raw descriptor from the interest set.
pub(crate) fn epoll_remove(epoll: &Epoll, fd: RawFd) -> io::Result<()> {
    let res =
        unsafe { libc::epoll_ctl(epoll.0.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) };
    match res {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Puts `fd` into non-blocking mode, preserving its other status flags.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
