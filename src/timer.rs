use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::handle::{HandleKind, HandleRecord, Payload, QUEUED, RUNNING};
use crate::{EventLoop, Handle, LoopState, TimerHandle};

/// One slot of the loop's timer queue.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) slot: u32,
}

/// Inserts a queue entry keeping the queue sorted by deadline descending,
/// so the soonest timers sit at the back and batch extraction of expired
/// ones is O(k). An equal deadline inserts behind the existing run of
/// equals, matching back-to-front extraction order.
pub(crate) fn enqueue(state: &mut LoopState, slot: u32, deadline: Instant) {
    let at = state.timers.partition_point(|e| e.deadline >= deadline);
    state.timers.insert(at, TimerEntry { deadline, slot });
    if let Some(rec) = state.handles.get_mut(&slot) {
        rec.flags |= QUEUED;
    }
}

impl EventLoop {
    /// Creates a timer handle. It does nothing until
    /// [`timer_start`](EventLoop::timer_start).
    pub fn timer_init(&self) -> TimerHandle {
        let mut state = self.state.lock().unwrap();
        state.timepoint = Instant::now();
        let slot = state.alloc_slot();
        state.handles.insert(slot, HandleRecord::new_timer());
        state.num_events += 1;
        TimerHandle(Handle {
            loop_index: self.index(),
            slot,
        })
    }

    /// Arms the timer to fire `cb` after `timeout_ms` milliseconds,
    /// measured from the loop's cached timepoint. A non-zero `repeat_ms`
    /// re-arms the timer after each firing until it is stopped or closed.
    ///
    /// Starting an already armed timer restarts it with the new deadline,
    /// callback and repeat.
    pub fn timer_start(
        &self,
        h: TimerHandle,
        cb: impl Fn(&EventLoop, TimerHandle) + Send + Sync + 'static,
        timeout_ms: u64,
        repeat_ms: u64,
    ) {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Timer);
        assert!(!rec.is_closing(), "timer_start on closing handle {:?}", h.0);
        rec.flags |= RUNNING;
        let restart = rec.flags & QUEUED != 0;
        match &mut rec.payload {
            Payload::Timer {
                repeat_ms: stored,
                cb: stored_cb,
            } => {
                *stored = repeat_ms;
                *stored_cb = Some(Arc::new(cb));
            }
            _ => unreachable!(),
        }
        if restart {
            state.timers.retain(|e| e.slot != h.0.slot);
        }
        let deadline = state.timepoint + Duration::from_millis(timeout_ms);
        enqueue(&mut state, h.0.slot, deadline);
    }

    /// Disarms the timer. Safe to call from the timer's own callback and
    /// on a closing timer; a timer stopped mid-iteration does not fire
    /// again in that iteration.
    pub fn timer_stop(&self, h: TimerHandle) {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Timer);
        rec.flags &= !(RUNNING | QUEUED);
        state.timers.retain(|e| e.slot != h.0.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_sorted_descending() {
        let mut state = LoopState::new();
        let base = Instant::now();
        enqueue(&mut state, 1, base + Duration::from_millis(30));
        enqueue(&mut state, 2, base + Duration::from_millis(10));
        enqueue(&mut state, 3, base + Duration::from_millis(50));
        enqueue(&mut state, 4, base + Duration::from_millis(20));
        let order: Vec<u32> = state.timers.iter().map(|e| e.slot).collect();
        assert_eq!(order, [3, 1, 4, 2], "farthest deadline sits at the front");
    }

    #[test]
    fn equal_deadlines_sit_behind_their_run() {
        let mut state = LoopState::new();
        let base = Instant::now();
        let deadline = base + Duration::from_millis(10);
        enqueue(&mut state, 1, deadline);
        enqueue(&mut state, 2, deadline);
        enqueue(&mut state, 3, base + Duration::from_millis(20));
        let order: Vec<u32> = state.timers.iter().map(|e| e.slot).collect();
        // Back-to-front extraction pops 2 before 1.
        assert_eq!(order, [3, 1, 2]);
    }

    #[test]
    fn expired_timers_pop_off_the_back() {
        let mut state = LoopState::new();
        let base = Instant::now();
        enqueue(&mut state, 1, base + Duration::from_millis(50));
        enqueue(&mut state, 2, base);
        enqueue(&mut state, 3, base);
        let now = base + Duration::from_millis(1);
        let mut fired = Vec::new();
        while state.timers.last().is_some_and(|e| e.deadline <= now) {
            fired.push(state.timers.pop().unwrap().slot);
        }
        assert_eq!(fired, [3, 2]);
        assert_eq!(state.timers.len(), 1);
    }
}
