use nix::sys::epoll::EpollFlags;

/// The readiness delivered to one poll callback.
///
/// Error conditions travel separately as the callback's status argument;
/// this mask answers what the descriptor is ready for.
#[derive(Copy, Clone, Debug)]
pub struct Event(pub(crate) EpollFlags);

impl Event {
    /// The raw mask reported by the kernel.
    pub const fn bits(&self) -> EpollFlags {
        self.0
    }

    /// Data can be read without blocking (`EPOLLIN`).
    pub const fn is_readable(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLIN)
    }

    /// Data can be written without blocking (`EPOLLOUT`).
    pub const fn is_writable(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLOUT)
    }

    /// The other end went away (`EPOLLHUP`), or shut down its writing
    /// half (`EPOLLRDHUP`).
    pub const fn is_hangup(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLHUP) || self.0.contains(EpollFlags::EPOLLRDHUP)
    }
}
