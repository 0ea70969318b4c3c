use nix::sys::epoll::EpollFlags;

/// A wrapper around [`EpollFlags`], represents interest in I/O readiness
/// events for a file descriptor.
///
/// Built incrementally: `interest().read().edge_triggered()`.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Interest(EpollFlags);

/// Creates an empty `Interest`, requesting no events.
pub fn interest() -> Interest {
    Interest::default()
}

impl Default for Interest {
    fn default() -> Self {
        Self(EpollFlags::empty())
    }
}

impl From<EpollFlags> for Interest {
    fn from(value: EpollFlags) -> Self {
        Self(value)
    }
}

impl From<Interest> for EpollFlags {
    fn from(value: Interest) -> Self {
        value.bitflags()
    }
}

impl Interest {
    /// Returns the underlying `EpollFlags` bitmask.
    pub const fn bitflags(&self) -> EpollFlags {
        self.0
    }

    const fn add(self, flags: EpollFlags) -> Self {
        Self(self.0.union(flags))
    }

    /// Adds interest in readable events (`EPOLLIN`).
    pub const fn read(self) -> Self {
        self.add(EpollFlags::EPOLLIN)
    }

    /// Adds interest in writable events (`EPOLLOUT`).
    pub const fn write(self) -> Self {
        self.add(EpollFlags::EPOLLOUT)
    }

    /// Adds interest in both readable and writable events.
    pub const fn read_write(self) -> Self {
        self.read().write()
    }

    /// Adds interest in the peer closing the write half of the connection
    /// (`EPOLLRDHUP`).
    pub const fn rdhup(self) -> Self {
        self.add(EpollFlags::EPOLLRDHUP)
    }

    /// Requests edge-triggered notification (`EPOLLET`). Level-triggered
    /// mode is the default.
    pub const fn edge_triggered(self) -> Self {
        self.add(EpollFlags::EPOLLET)
    }

    /// Requests one-shot notification (`EPOLLONESHOT`).
    pub const fn oneshot(self) -> Self {
        self.add(EpollFlags::EPOLLONESHOT)
    }
}
