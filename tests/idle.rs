use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use evloop::{new_loop, RunMode};

/// An always-active idle forces zero-timeout waits, but a timer must
/// still fire once its wall-clock deadline passes.
#[test]
fn idle_does_not_starve_timers() {
    let lp = new_loop().unwrap();
    let idle_runs = Arc::new(AtomicUsize::new(0));
    let timer_runs = Arc::new(AtomicUsize::new(0));

    let i = lp.idle_init();
    let idle_counter = idle_runs.clone();
    lp.idle_start(i, move |_, _| {
        idle_counter.fetch_add(1, Ordering::SeqCst);
    });

    let t = lp.timer_init();
    let timer_counter = timer_runs.clone();
    lp.timer_start(
        t,
        move |lp, t| {
            timer_counter.fetch_add(1, Ordering::SeqCst);
            lp.close(t, |_, _| {});
            lp.close(i, |_, _| {});
        },
        100,
        0,
    );

    let started = Instant::now();
    lp.run(RunMode::Default);

    assert_eq!(timer_runs.load(Ordering::SeqCst), 1);
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "timer fired early despite idle-driven polling"
    );
    assert!(
        idle_runs.load(Ordering::SeqCst) >= 10,
        "idle should run every iteration while the timer waits"
    );
}

#[test]
fn idle_stop_in_callback_fires_once() {
    let lp = new_loop().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let i = lp.idle_init();
    let counter = fired.clone();
    lp.idle_start(i, move |lp, i| {
        counter.fetch_add(1, Ordering::SeqCst);
        lp.idle_stop(i);
        lp.close(i, |_, _| {});
    });
    lp.run(RunMode::Default);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(lp.num_events(), 0);
}

/// Zero ready descriptors still advances through the idle and timer
/// phases; the loop must not wedge in the wait.
#[test]
fn empty_wait_still_runs_idle_phase() {
    let lp = new_loop().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let i = lp.idle_init();
    let counter = fired.clone();
    lp.idle_start(i, move |lp, i| {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
            lp.close(i, |_, _| {});
        }
    });
    lp.run(RunMode::Default);

    assert_eq!(fired.load(Ordering::SeqCst), 5);
}
