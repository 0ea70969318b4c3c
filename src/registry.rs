use std::io;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::EventLoop;

/// Upper bound on loops created over the lifetime of the process.
/// Indices are never reused, so this caps creations, not live loops.
pub const MAX_LOOPS: usize = 128;

static LOOPS: Mutex<Vec<Option<Arc<EventLoop>>>> = Mutex::new(Vec::new());

fn create(loops: &mut Vec<Option<Arc<EventLoop>>>) -> io::Result<Arc<EventLoop>> {
    assert!(
        loops.len() < MAX_LOOPS,
        "event loop registry is full ({MAX_LOOPS} loops)"
    );
    let index = loops.len() as u32;
    let lp = Arc::new(EventLoop::with_index(index)?);
    loops.push(Some(lp.clone()));
    debug!("created event loop {index}");
    Ok(lp)
}

/// Returns the process-wide default loop (index 0), creating it lazily.
///
/// # Panics
///
/// Panics if the loop cannot be created (fatal to the caller), or if the
/// default loop has been deleted.
pub fn default_loop() -> Arc<EventLoop> {
    let mut loops = LOOPS.lock().unwrap();
    if loops.is_empty() {
        create(&mut loops).expect("failed to create the default event loop");
    }
    loops[0].clone().expect("the default event loop was deleted")
}

/// Creates an additional loop under the next free index. The default
/// loop is created first if it does not exist yet.
pub fn new_loop() -> io::Result<Arc<EventLoop>> {
    let mut loops = LOOPS.lock().unwrap();
    if loops.is_empty() {
        create(&mut loops)?;
    }
    create(&mut loops)
}

/// Removes the loop from the registry and detaches its wakeup descriptor
/// from epoll. The loop's own descriptors close once the last reference
/// is dropped; the index is never handed out again.
pub fn delete_loop(lp: Arc<EventLoop>) {
    let mut loops = LOOPS.lock().unwrap();
    lp.detach_wakeup();
    if let Some(entry) = loops.get_mut(lp.index() as usize) {
        *entry = None;
    }
    debug!("deleted event loop {}", lp.index());
}
