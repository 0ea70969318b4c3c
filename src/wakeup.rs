use std::sync::Arc;

use crate::handle::HandleRecord;
use crate::{AsyncHandle, EventLoop, Handle};

impl EventLoop {
    /// Creates an async handle: a cross-thread doorbell whose callback
    /// runs on the loop thread.
    pub fn async_init(
        &self,
        cb: impl Fn(&EventLoop, AsyncHandle) + Send + Sync + 'static,
    ) -> AsyncHandle {
        let mut state = self.state.lock().unwrap();
        let slot = state.alloc_slot();
        state.handles.insert(slot, HandleRecord::new_async(Arc::new(cb)));
        state.num_events += 1;
        AsyncHandle(Handle {
            loop_index: self.index(),
            slot,
        })
    }

    /// Requests the async callback from any thread.
    ///
    /// Sends coalesce: any number of calls between two loop iterations
    /// produce at least one and at most one callback invocation in the
    /// next async phase. A send from inside the callback itself arms the
    /// handle again for the following iteration.
    ///
    /// This is the only operation that may be called off the loop thread.
    pub fn async_send(&self, h: AsyncHandle) {
        assert_eq!(
            h.0.loop_index,
            self.index(),
            "handle {:?} belongs to a different event loop",
            h.0
        );
        let mut async_state = self.async_state.lock().unwrap();
        // The write forces epoll_wait to return; the pending bit is what
        // actually schedules the callback.
        let _ = self.wakeup.write(1);
        async_state.pending.insert(h.0.slot);
    }
}
