use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use nix::libc;
use nix::sys::epoll::EpollFlags;

use crate::handle::{HandleKind, HandleRecord, Payload, INVALID_FD, RUNNING};
use crate::{poll_token, utils, Event, EventLoop, Handle, Interest, PollHandle};

impl EventLoop {
    /// Wraps an existing socket or other pollable descriptor in a poll
    /// handle.
    ///
    /// The descriptor is switched to non-blocking mode and registered in
    /// the loop's epoll with an empty interest mask; no events are
    /// delivered until [`poll_start`](EventLoop::poll_start). Ownership of
    /// the descriptor stays with the caller.
    ///
    /// On `fcntl` or `epoll_ctl` failure the error is returned and no
    /// handle is created.
    pub fn poll_init_socket(&self, fd: RawFd) -> io::Result<PollHandle> {
        utils::set_nonblocking(fd)?;
        let mut state = self.state.lock().unwrap();
        let slot = state.alloc_slot();
        utils::epoll_update(
            &self.epoll,
            libc::EPOLL_CTL_ADD,
            fd,
            EpollFlags::empty(),
            poll_token(slot),
        )?;
        state.handles.insert(slot, HandleRecord::new_poll(fd));
        state.num_events += 1;
        Ok(PollHandle(Handle {
            loop_index: self.index(),
            slot,
        }))
    }

    /// Starts delivering the requested readiness events to `cb`.
    ///
    /// The callback receives the handle, a status that is `-1` iff the
    /// kernel reported `EPOLLERR`, and the raw [`Event`] mask. Calling
    /// `poll_start` again replaces both the interest set and the callback.
    pub fn poll_start(
        &self,
        h: PollHandle,
        interest: Interest,
        cb: impl Fn(&EventLoop, PollHandle, i32, Event) + Send + Sync + 'static,
    ) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Poll);
        assert!(!rec.is_closing(), "poll_start on closing handle {:?}", h.0);
        rec.flags |= RUNNING;
        let fd = match &mut rec.payload {
            Payload::Poll {
                fd,
                interest: stored,
                cb: stored_cb,
            } => {
                *stored = interest;
                *stored_cb = Some(Arc::new(cb));
                *fd
            }
            _ => unreachable!(),
        };

        let flags = interest.bitflags();
        let token = poll_token(h.0.slot);
        match utils::epoll_update(&self.epoll, libc::EPOLL_CTL_MOD, fd, flags, token) {
            // A stopped poll was removed from the interest set entirely;
            // bring it back.
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                utils::epoll_update(&self.epoll, libc::EPOLL_CTL_ADD, fd, flags, token)
            }
            other => other,
        }
    }

    /// Stops event delivery and removes the descriptor from the epoll
    /// interest set. The handle can be started again later.
    pub fn poll_stop(&self, h: PollHandle) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Poll);
        rec.flags &= !RUNNING;
        let fd = match rec.payload {
            Payload::Poll { fd, .. } => fd,
            _ => unreachable!(),
        };
        if fd == INVALID_FD {
            return Ok(());
        }
        utils::epoll_remove(&self.epoll, fd)
    }
}
