use std::sync::Arc;

use crate::handle::{HandleKind, HandleRecord, Payload, RUNNING};
use crate::{EventLoop, Handle, IdleHandle};

impl EventLoop {
    /// Creates an idle handle. While one or more idles are started the
    /// loop polls with a zero timeout instead of blocking.
    pub fn idle_init(&self) -> IdleHandle {
        let mut state = self.state.lock().unwrap();
        let slot = state.alloc_slot();
        state.handles.insert(slot, HandleRecord::new_idle());
        state.num_events += 1;
        IdleHandle(Handle {
            loop_index: self.index(),
            slot,
        })
    }

    /// Starts running `cb` once per loop iteration.
    pub fn idle_start(&self, h: IdleHandle, cb: impl Fn(&EventLoop, IdleHandle) + Send + Sync + 'static) {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Idle);
        assert!(!rec.is_closing(), "idle_start on closing handle {:?}", h.0);
        rec.flags |= RUNNING;
        match &mut rec.payload {
            Payload::Idle { cb: stored } => *stored = Some(Arc::new(cb)),
            _ => unreachable!(),
        }
        if !state.idlers.contains(&h.0.slot) {
            state.idlers.push(h.0.slot);
        }
    }

    /// Stops the idle. It stops firing immediately, including for the
    /// rest of the current iteration.
    pub fn idle_stop(&self, h: IdleHandle) {
        let mut state = self.state.lock().unwrap();
        let rec = self.record_kind_mut(&mut state, h.0, HandleKind::Idle);
        rec.flags &= !RUNNING;
        state.idlers.retain(|&s| s != h.0.slot);
    }
}
