use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use evloop::{interest, new_loop, RunMode};
use nix::unistd;

#[test]
fn readiness_reaches_the_callback() {
    let lp = new_loop().unwrap();
    let (rx, tx) = unistd::pipe().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let p = lp.poll_init_socket(rx.as_raw_fd()).unwrap();
    let counter = fired.clone();
    lp.poll_start(p, interest().read(), move |lp, p, status, event| {
        assert_eq!(status, 0);
        assert!(event.is_readable());
        counter.fetch_add(1, Ordering::SeqCst);
        lp.close(p, |_, _| {});
    })
    .unwrap();

    unistd::write(&tx, b"x").unwrap();
    lp.run(RunMode::Default);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(lp.num_events(), 0);
}

/// Two polls on the two ends of a pipe; the reader's callback closes
/// both. Both close callbacks must run in the next close phase, and the
/// writer's queued readiness must be discarded.
#[test]
fn close_in_callback_retires_both_polls() {
    let lp = new_loop().unwrap();
    let (rx, tx) = unistd::pipe().unwrap();
    let reads = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    let reader = lp.poll_init_socket(rx.as_raw_fd()).unwrap();
    let writer = lp.poll_init_socket(tx.as_raw_fd()).unwrap();

    let read_counter = reads.clone();
    let closed_r = closed.clone();
    let closed_w = closed.clone();
    lp.poll_start(reader, interest().read(), move |lp, r, _, _| {
        read_counter.fetch_add(1, Ordering::SeqCst);
        let closed_r = closed_r.clone();
        lp.close(r, move |_, _| {
            closed_r.fetch_add(1, Ordering::SeqCst);
        });
        let closed_w = closed_w.clone();
        lp.close(writer, move |_, _| {
            closed_w.fetch_add(1, Ordering::SeqCst);
        });
    })
    .unwrap();

    unistd::write(&tx, b"ping").unwrap();
    lp.run(RunMode::Default);

    assert_eq!(reads.load(Ordering::SeqCst), 1, "reader callback re-entered");
    assert_eq!(closed.load(Ordering::SeqCst), 2, "both close callbacks must run");
    assert_eq!(lp.num_events(), 0);
    assert!(lp.is_closing(reader));
    assert!(lp.is_closing(writer));
}

#[test]
fn error_readiness_reports_negative_status() {
    let lp = new_loop().unwrap();
    let (rx, tx) = unistd::pipe().unwrap();
    let status_seen = Arc::new(AtomicI32::new(0));

    // A pipe write end with no readers raises EPOLLERR.
    drop(rx);
    let p = lp.poll_init_socket(tx.as_raw_fd()).unwrap();
    let seen = status_seen.clone();
    lp.poll_start(p, interest().write(), move |lp, p, status, _| {
        seen.store(status, Ordering::SeqCst);
        lp.close(p, |_, _| {});
    })
    .unwrap();

    lp.run(RunMode::Default);

    assert_eq!(status_seen.load(Ordering::SeqCst), -1);
}

#[test]
fn stopped_poll_stays_silent_and_can_restart() {
    let lp = new_loop().unwrap();
    let (rx, tx) = unistd::pipe().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let p = lp.poll_init_socket(rx.as_raw_fd()).unwrap();
    let counter = fired.clone();
    lp.poll_start(p, interest().read(), move |_, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    lp.poll_stop(p).unwrap();

    // Readiness while stopped must go nowhere.
    unistd::write(&tx, b"quiet").unwrap();

    let counter = fired.clone();
    lp.poll_start(p, interest().read(), move |lp, p, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        lp.close(p, |_, _| {});
    })
    .unwrap();
    lp.run(RunMode::Default);

    assert_eq!(
        fired.load(Ordering::SeqCst),
        1,
        "restarted poll should deliver pending readiness exactly once"
    );
}
