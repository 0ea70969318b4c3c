use std::os::fd::RawFd;
use std::sync::Arc;

use nix::errno::Errno;

use crate::event::Event;
use crate::interest::Interest;
use crate::{EventLoop, LoopState};

/// Flag bits carried by every handle record.
pub(crate) const RUNNING: u8 = 1 << 0;
pub(crate) const CLOSING: u8 = 1 << 1;
pub(crate) const CLOSED: u8 = 1 << 2;
/// Set while a timer has an entry in the loop's timer queue. Guards
/// against a second enqueue when a callback restarts its own timer.
pub(crate) const QUEUED: u8 = 1 << 3;

/// The fd a poll handle reports once it is closing.
pub(crate) const INVALID_FD: RawFd = -1;

pub(crate) type PollCb = Arc<dyn Fn(&EventLoop, PollHandle, i32, Event) + Send + Sync>;
pub(crate) type TimerCb = Arc<dyn Fn(&EventLoop, TimerHandle) + Send + Sync>;
pub(crate) type AsyncCb = Arc<dyn Fn(&EventLoop, AsyncHandle) + Send + Sync>;
pub(crate) type IdleCb = Arc<dyn Fn(&EventLoop, IdleHandle) + Send + Sync>;
pub(crate) type CloseCb = Box<dyn FnOnce(&EventLoop, Handle) + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HandleKind {
    Poll,
    Timer,
    Async,
    Idle,
}

/// Identifies one handle of one event loop.
///
/// A `Handle` is a small `Copy` id: the index of the owning loop plus a
/// per-loop slot that is never reused, so stale ids are always detected.
/// The typed wrappers ([`PollHandle`], [`TimerHandle`], [`AsyncHandle`],
/// [`IdleHandle`]) convert into `Handle` for the kind-generic operations
/// ([`EventLoop::close`], [`EventLoop::is_closing`], [`EventLoop::fileno`]).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle {
    pub(crate) loop_index: u32,
    pub(crate) slot: u32,
}

impl Handle {
    /// The index of the loop this handle belongs to.
    pub const fn loop_index(&self) -> u32 {
        self.loop_index
    }
}

/// A handle dispatching readiness of one file descriptor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PollHandle(pub(crate) Handle);

/// A handle firing at a deadline, optionally repeating.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerHandle(pub(crate) Handle);

/// A handle whose callback can be requested from any thread via
/// [`EventLoop::async_send`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AsyncHandle(pub(crate) Handle);

/// A handle whose callback runs on every loop iteration while started.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IdleHandle(pub(crate) Handle);

impl From<PollHandle> for Handle {
    fn from(h: PollHandle) -> Handle {
        h.0
    }
}

impl From<TimerHandle> for Handle {
    fn from(h: TimerHandle) -> Handle {
        h.0
    }
}

impl From<AsyncHandle> for Handle {
    fn from(h: AsyncHandle) -> Handle {
        h.0
    }
}

impl From<IdleHandle> for Handle {
    fn from(h: IdleHandle) -> Handle {
        h.0
    }
}

pub(crate) struct HandleRecord {
    pub(crate) flags: u8,
    pub(crate) payload: Payload,
}

pub(crate) enum Payload {
    Poll {
        fd: RawFd,
        interest: Interest,
        cb: Option<PollCb>,
    },
    Timer {
        repeat_ms: u64,
        cb: Option<TimerCb>,
    },
    Async {
        cb: Option<AsyncCb>,
    },
    Idle {
        cb: Option<IdleCb>,
    },
}

impl HandleRecord {
    pub(crate) fn new_poll(fd: RawFd) -> Self {
        Self {
            flags: 0,
            payload: Payload::Poll {
                fd,
                interest: Interest::default(),
                cb: None,
            },
        }
    }

    pub(crate) fn new_timer() -> Self {
        Self {
            flags: 0,
            payload: Payload::Timer {
                repeat_ms: 0,
                cb: None,
            },
        }
    }

    pub(crate) fn new_async(cb: AsyncCb) -> Self {
        Self {
            flags: RUNNING,
            payload: Payload::Async { cb: Some(cb) },
        }
    }

    pub(crate) fn new_idle() -> Self {
        Self {
            flags: 0,
            payload: Payload::Idle { cb: None },
        }
    }

    pub(crate) fn kind(&self) -> HandleKind {
        match self.payload {
            Payload::Poll { .. } => HandleKind::Poll,
            Payload::Timer { .. } => HandleKind::Timer,
            Payload::Async { .. } => HandleKind::Async,
            Payload::Idle { .. } => HandleKind::Idle,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.flags & RUNNING != 0
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.flags & (CLOSING | CLOSED) != 0
    }

    /// Retired records stay in the table so `is_closing` keeps answering,
    /// but their callbacks are released.
    pub(crate) fn drop_callbacks(&mut self) {
        match &mut self.payload {
            Payload::Poll { cb, .. } => *cb = None,
            Payload::Timer { cb, .. } => *cb = None,
            Payload::Async { cb } => *cb = None,
            Payload::Idle { cb } => *cb = None,
        }
    }
}

/// One entry of the pending-close queue. The poll fd is captured here at
/// `close` time because the record's fd is wiped immediately.
pub(crate) struct CloseEntry {
    pub(crate) slot: u32,
    pub(crate) fd: Option<RawFd>,
    pub(crate) cb: CloseCb,
}

impl EventLoop {
    /// Returns `true` once [`close`](EventLoop::close) has been called on
    /// the handle, whether or not the close callback has fired yet.
    pub fn is_closing(&self, h: impl Into<Handle>) -> bool {
        let h = h.into();
        let state = self.state.lock().unwrap();
        self.record(&state, h).is_closing()
    }

    /// The file descriptor wrapped by a poll handle.
    ///
    /// Returns `Errno::EBADF` for a closing or closed poll and
    /// `Errno::EINVAL` for handles of any other kind.
    pub fn fileno(&self, h: impl Into<Handle>) -> Result<RawFd, Errno> {
        let h = h.into();
        let state = self.state.lock().unwrap();
        let rec = self.record(&state, h);
        match rec.payload {
            Payload::Poll { fd, .. } => {
                if rec.is_closing() {
                    Err(Errno::EBADF)
                } else {
                    Ok(fd)
                }
            }
            _ => Err(Errno::EINVAL),
        }
    }

    /// Requests that the handle be retired. The close callback fires in
    /// the close phase of the next loop iteration; afterwards the handle
    /// no longer counts towards keeping the loop alive.
    ///
    /// A closing poll reports `INVALID_FD`, so the user may `close(2)`
    /// the descriptor once the close callback has run. The loop never
    /// closes user descriptors.
    ///
    /// # Panics
    ///
    /// Panics on double close.
    pub fn close(&self, h: impl Into<Handle>, cb: impl FnOnce(&EventLoop, Handle) + Send + 'static) {
        let h = h.into();
        let mut state = self.state.lock().unwrap();
        let rec = self.record_mut(&mut state, h);
        assert!(!rec.is_closing(), "double close of handle {h:?}");
        rec.flags |= CLOSING;
        let is_async = rec.kind() == HandleKind::Async;
        let fd = match &mut rec.payload {
            Payload::Poll { fd, .. } => {
                let prev = *fd;
                *fd = INVALID_FD;
                (prev != INVALID_FD).then_some(prev)
            }
            _ => None,
        };
        state.pending_close.push(CloseEntry {
            slot: h.slot,
            fd,
            cb: Box::new(cb),
        });
        drop(state);

        // A closing async must not fire again: discard its pending bit.
        if is_async {
            self.async_state.lock().unwrap().pending.remove(&h.slot);
        }
    }

    pub(crate) fn record<'a>(&self, state: &'a LoopState, h: Handle) -> &'a HandleRecord {
        assert_eq!(
            h.loop_index,
            self.index(),
            "handle {h:?} belongs to a different event loop"
        );
        state
            .handles
            .get(&h.slot)
            .unwrap_or_else(|| panic!("unknown handle {h:?}"))
    }

    pub(crate) fn record_mut<'a>(&self, state: &'a mut LoopState, h: Handle) -> &'a mut HandleRecord {
        assert_eq!(
            h.loop_index,
            self.index(),
            "handle {h:?} belongs to a different event loop"
        );
        state
            .handles
            .get_mut(&h.slot)
            .unwrap_or_else(|| panic!("unknown handle {h:?}"))
    }

    pub(crate) fn record_kind_mut<'a>(
        &self,
        state: &'a mut LoopState,
        h: Handle,
        kind: HandleKind,
    ) -> &'a mut HandleRecord {
        let rec = self.record_mut(state, h);
        assert_eq!(rec.kind(), kind, "handle {h:?} is not a {kind:?} handle");
        rec
    }
}
