//! A single-threaded, epoll-backed event loop.
//!
//! One [`EventLoop`] multiplexes four handle kinds over one `epoll`
//! instance: polls (file-descriptor readiness), timers, idles, and asyncs
//! (cross-thread wakeups through an `eventfd`). Every loop iteration runs
//! a fixed phase schedule: close, wait, poll, async, idle, timer.
//!
//! All operations must be called from the loop's owner thread, with one
//! exception: [`EventLoop::async_send`] is safe from any thread.

mod event;
mod handle;
mod idle;
mod interest;
mod poll;
mod registry;
mod timer;
mod utils;
mod wakeup;

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use nix::sys::signal::{self, SigHandler, Signal};
use rustc_hash::{FxHashMap, FxHashSet};

pub use crate::event::Event;
pub use crate::handle::{AsyncHandle, Handle, IdleHandle, PollHandle, TimerHandle};
pub use crate::interest::{interest, Interest};
pub use crate::registry::{default_loop, delete_loop, new_loop, MAX_LOOPS};

use crate::handle::{CloseEntry, HandleKind, HandleRecord, Payload, CLOSED, CLOSING, QUEUED, RUNNING};
use crate::timer::TimerEntry;

/// Size of the `epoll_wait` output batch per iteration.
const EVENT_BATCH: usize = 64;

/// Safety net against pathological tight loops, not a scheduling feature.
const MAX_ITERATIONS: usize = 1_000_000;

/// Epoll user data of the wakeup eventfd. Poll entries carry `slot + 1`,
/// so zero is free to mark the loop's own descriptor.
pub(crate) const WAKEUP_TOKEN: u64 = 0;

pub(crate) fn poll_token(slot: u32) -> u64 {
    u64::from(slot) + 1
}

/// How [`EventLoop::run`] should drive the loop.
///
/// Accepted for interface compatibility; the loop always runs until no
/// handle keeps it alive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunMode {
    #[default]
    Default,
    Once,
    NoWait,
}

/// The reactor. Owns one epoll descriptor and one wakeup eventfd.
///
/// Created through [`default_loop`] or [`new_loop`] and addressed by a
/// process-wide index. Handles are created with the `*_init` methods and
/// retired with [`close`](EventLoop::close); the loop stores all handle
/// state itself, so handle values are plain `Copy` ids.
pub struct EventLoop {
    pub(crate) epoll: Epoll,
    pub(crate) wakeup: EventFd,
    index: u32,
    running: AtomicBool,
    pub(crate) state: Mutex<LoopState>,
    pub(crate) async_state: Mutex<AsyncState>,
}

pub(crate) struct LoopState {
    pub(crate) handles: FxHashMap<u32, HandleRecord>,
    next_slot: u32,
    pub(crate) num_events: usize,
    /// Sorted by deadline descending; expired timers pop off the back.
    pub(crate) timers: Vec<TimerEntry>,
    pub(crate) idlers: Vec<u32>,
    pub(crate) pending_close: Vec<CloseEntry>,
    /// Refreshed at the top of the wait and timer phases; timer deadlines
    /// are computed against this cached value, not a fresh clock read.
    pub(crate) timepoint: Instant,
}

#[derive(Default)]
pub(crate) struct AsyncState {
    pub(crate) pending: FxHashSet<u32>,
}

impl LoopState {
    pub(crate) fn new() -> Self {
        Self {
            handles: FxHashMap::default(),
            next_slot: 0,
            num_events: 0,
            timers: Vec::new(),
            idlers: Vec::new(),
            pending_close: Vec::new(),
            timepoint: Instant::now(),
        }
    }

    /// Slots are never reused within a loop, so a retired handle's id
    /// can't silently alias a newer one.
    pub(crate) fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot = self.next_slot.checked_add(1).expect("handle slots exhausted");
        slot
    }
}

impl EventLoop {
    pub(crate) fn with_index(index: u32) -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(io::Error::from)?;
        let wakeup = EventFd::from_flags(
            EfdFlags::EFD_SEMAPHORE | EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC,
        )
        .map_err(io::Error::from)?;
        let event = EpollEvent::new(
            EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLET,
            WAKEUP_TOKEN,
        );
        epoll.add(&wakeup, event).map_err(io::Error::from)?;

        Ok(Self {
            epoll,
            wakeup,
            index,
            running: AtomicBool::new(false),
            state: Mutex::new(LoopState::new()),
            async_state: Mutex::new(AsyncState::default()),
        })
    }

    /// The loop's registry index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of handles initialised on this loop whose close callback
    /// has not fired yet. The loop runs while this is non-zero.
    pub fn num_events(&self) -> usize {
        self.state.lock().unwrap().num_events
    }

    pub(crate) fn detach_wakeup(&self) {
        let _ = utils::epoll_remove(&self.epoll, self.wakeup.as_fd().as_raw_fd());
    }

    /// Drives the loop until no handle keeps it alive.
    ///
    /// Per iteration, strictly in order: retire closing handles, wait for
    /// readiness, dispatch polls, asyncs, idles, then expired timers.
    /// Broken-pipe signals are ignored process-wide on entry, so writes
    /// to dead peers surface as errors instead of killing the process.
    ///
    /// # Panics
    ///
    /// Panics when called re-entrantly from a callback of the same loop.
    pub fn run(&self, _mode: RunMode) {
        if self.running.swap(true, Ordering::Acquire) {
            panic!("recursive call to EventLoop::run");
        }
        unsafe {
            let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
        }
        debug!("loop {}: running", self.index);

        let mut buf = vec![EpollEvent::empty(); EVENT_BATCH];
        let mut iterations = 0usize;
        loop {
            self.close_phase();
            if self.state.lock().unwrap().num_events == 0 {
                break;
            }
            if iterations == MAX_ITERATIONS {
                warn!("loop {}: iteration cap hit, bailing out", self.index);
                break;
            }
            iterations += 1;

            let ready = self.wait_phase(&mut buf);
            self.poll_phase(&buf[..ready]);
            self.async_phase();
            self.idle_phase();
            self.timer_phase();
        }

        debug!("loop {}: finished after {iterations} iterations", self.index);
        self.running.store(false, Ordering::Release);
    }

    /// Retires every handle closed since the previous iteration. Close
    /// callbacks may close further handles; those wait for the next turn.
    fn close_phase(&self) {
        let entries: Vec<CloseEntry> = {
            let mut state = self.state.lock().unwrap();
            if state.pending_close.is_empty() {
                return;
            }
            mem::take(&mut state.pending_close)
        };
        for entry in entries {
            let kind = {
                let mut state = self.state.lock().unwrap();
                let kind = {
                    let rec = state
                        .handles
                        .get_mut(&entry.slot)
                        .expect("closing handle has no record");
                    rec.flags = (rec.flags & !(CLOSING | RUNNING | QUEUED)) | CLOSED;
                    rec.drop_callbacks();
                    rec.kind()
                };
                match kind {
                    HandleKind::Timer => state.timers.retain(|e| e.slot != entry.slot),
                    HandleKind::Idle => state.idlers.retain(|&s| s != entry.slot),
                    HandleKind::Poll | HandleKind::Async => {}
                }
                state.num_events -= 1;
                kind
            };
            if kind == HandleKind::Poll {
                if let Some(fd) = entry.fd {
                    // The epoll registration lives until here; the fd
                    // itself stays with the user.
                    let _ = utils::epoll_remove(&self.epoll, fd);
                }
            }
            let h = Handle {
                loop_index: self.index,
                slot: entry.slot,
            };
            (entry.cb)(self, h);
        }
    }

    /// Refreshes the loop timepoint and blocks in `epoll_wait`. The wait
    /// is zero while idles are active or closes are pending, bounded by
    /// the soonest timer deadline otherwise, and unbounded without either.
    fn wait_phase(&self, buf: &mut [EpollEvent]) -> usize {
        let timeout = {
            let mut state = self.state.lock().unwrap();
            state.timepoint = Instant::now();
            if !state.idlers.is_empty() || !state.pending_close.is_empty() {
                EpollTimeout::ZERO
            } else if let Some(next) = state.timers.last() {
                let ms = millis_until(next.deadline, state.timepoint).min(u64::from(u16::MAX));
                EpollTimeout::from(ms as u16)
            } else {
                EpollTimeout::NONE
            }
        };
        match self.epoll.wait(buf, timeout) {
            Ok(n) => n,
            Err(err) => {
                trace!("loop {}: transient epoll_wait error: {err}", self.index);
                0
            }
        }
    }

    fn poll_phase(&self, ready: &[EpollEvent]) {
        for ev in ready {
            if ev.data() == WAKEUP_TOKEN {
                // One semaphore decrement per observed wakeup, serialised
                // with async_send's write.
                let _async_state = self.async_state.lock().unwrap();
                let _ = self.wakeup.read();
                continue;
            }
            let slot = (ev.data() - 1) as u32;
            let cb = {
                let state = self.state.lock().unwrap();
                match state.handles.get(&slot) {
                    Some(rec) if rec.is_running() && !rec.is_closing() => match &rec.payload {
                        Payload::Poll { cb: Some(cb), .. } => Some(cb.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            let Some(cb) = cb else { continue };
            let status = if ev.events().contains(EpollFlags::EPOLLERR) {
                -1
            } else {
                0
            };
            let h = PollHandle(Handle {
                loop_index: self.index,
                slot,
            });
            cb(self, h, status, Event(ev.events()));
        }
    }

    /// Fires every async whose pending bit was set since the last drain.
    /// The snapshot-and-clear runs under the async mutex; callbacks don't.
    fn async_phase(&self) {
        let pending: Vec<u32> = {
            let mut async_state = self.async_state.lock().unwrap();
            if async_state.pending.is_empty() {
                return;
            }
            async_state.pending.drain().collect()
        };
        for slot in pending {
            let cb = {
                let state = self.state.lock().unwrap();
                match state.handles.get(&slot) {
                    Some(rec) if rec.is_running() && !rec.is_closing() => match &rec.payload {
                        Payload::Async { cb: Some(cb) } => Some(cb.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            if let Some(cb) = cb {
                let h = AsyncHandle(Handle {
                    loop_index: self.index,
                    slot,
                });
                cb(self, h);
            }
        }
    }

    fn idle_phase(&self) {
        let snapshot: Vec<u32> = {
            let state = self.state.lock().unwrap();
            if state.idlers.is_empty() {
                return;
            }
            state.idlers.clone()
        };
        for slot in snapshot {
            let cb = {
                let state = self.state.lock().unwrap();
                match state.handles.get(&slot) {
                    Some(rec) if rec.is_running() && !rec.is_closing() => match &rec.payload {
                        Payload::Idle { cb: Some(cb) } => Some(cb.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            if let Some(cb) = cb {
                let h = IdleHandle(Handle {
                    loop_index: self.index,
                    slot,
                });
                cb(self, h);
            }
        }
    }

    /// Extracts every expired timer before firing any of them, so
    /// callbacks are free to start, stop or close timers. A repeating
    /// timer re-arms relative to this phase's refreshed timepoint;
    /// drift is accepted in exchange for simple bookkeeping.
    fn timer_phase(&self) {
        let expired: Vec<u32> = {
            let mut state = self.state.lock().unwrap();
            state.timepoint = Instant::now();
            let now = state.timepoint;
            let mut expired = Vec::new();
            while state.timers.last().is_some_and(|e| e.deadline <= now) {
                let entry = state.timers.pop().unwrap();
                if let Some(rec) = state.handles.get_mut(&entry.slot) {
                    rec.flags &= !QUEUED;
                }
                expired.push(entry.slot);
            }
            expired
        };
        for slot in expired {
            let cb = {
                let state = self.state.lock().unwrap();
                match state.handles.get(&slot) {
                    Some(rec) if rec.is_running() && !rec.is_closing() => match &rec.payload {
                        Payload::Timer { cb: Some(cb), .. } => Some(cb.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            let Some(cb) = cb else { continue };
            let h = TimerHandle(Handle {
                loop_index: self.index,
                slot,
            });
            cb(self, h);

            // Re-arm a repeater unless the callback stopped, closed or
            // already restarted this timer.
            let mut state = self.state.lock().unwrap();
            let rearm = match state.handles.get(&slot) {
                Some(rec)
                    if rec.is_running() && !rec.is_closing() && rec.flags & QUEUED == 0 =>
                {
                    match rec.payload {
                        Payload::Timer { repeat_ms, .. } if repeat_ms != 0 => Some(repeat_ms),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(repeat_ms) = rearm {
                let deadline = state.timepoint + Duration::from_millis(repeat_ms);
                timer::enqueue(&mut state, slot, deadline);
            }
        }
    }
}

/// Milliseconds from `now` until `deadline`, rounded up so a bounded
/// `epoll_wait` never returns just short of the deadline and spins.
fn millis_until(deadline: Instant, now: Instant) -> u64 {
    let nanos = deadline.saturating_duration_since(now).as_nanos();
    nanos.div_ceil(1_000_000) as u64
}
