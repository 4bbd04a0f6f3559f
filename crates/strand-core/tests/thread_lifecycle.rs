//! End-to-end lifecycle tests for [`Thread`]: state transitions, loop exit
//! codes, priorities, termination policy and lifecycle signals.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use crossbeam_channel::bounded;
use strand_core::{single_shot, Priority, Thread, ThreadState, TimerQueue};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[test]
fn spawned_thread_has_its_own_id() {
    init_logging();
    let (id_tx, id_rx) = bounded(1);
    let thread = Thread::new(move |_| {
        id_tx.send(Thread::current_id()).unwrap();
    });

    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));

    let body_id = id_rx.recv().unwrap();
    assert_ne!(body_id, Thread::current_id());
    assert_eq!(thread.id(), Some(body_id));
}

#[test]
fn current_resolves_to_the_owning_handle() {
    init_logging();
    // The calling context is adopted and stable across calls.
    let here = Thread::current();
    assert_eq!(here, Thread::current());
    assert!(here.is_running());

    let (result_tx, result_rx) = bounded(1);
    let thread = Thread::new(move |thread| {
        result_tx.send(Thread::current() == *thread).unwrap();
    });
    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert!(result_rx.recv().unwrap());
    assert_ne!(here, thread);
}

#[test]
fn ideal_thread_count_is_positive() {
    assert!(Thread::ideal_thread_count() > 0);
}

#[test]
fn lifecycle_flags_track_state() {
    init_logging();
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let (resume_tx, resume_rx) = bounded::<()>(0);

    let thread = Thread::new(move |_| {
        entered_tx.send(()).unwrap();
        resume_rx.recv().unwrap();
    });

    assert_eq!(thread.state(), ThreadState::NotStarted);
    assert!(!thread.is_running());
    assert!(!thread.is_finished());

    thread.start().unwrap();
    // Running is observable before start() returns.
    assert!(thread.is_running());
    entered_rx.recv().unwrap();
    assert!(!thread.is_finished());

    resume_tx.send(()).unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(thread.state(), ThreadState::Finished);
    assert!(!thread.is_running());
    assert!(thread.is_finished());
}

#[test]
fn priority_reads_inherit_outside_running() {
    init_logging();
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let (resume_tx, resume_rx) = bounded::<()>(0);

    let thread = Thread::new(move |_| {
        entered_tx.send(()).unwrap();
        resume_rx.recv().unwrap();
    });

    // Before start: hints are ignored, reads stay Inherit.
    thread.set_priority(Priority::High);
    assert_eq!(thread.priority(), Priority::Inherit);

    thread.start().unwrap();
    entered_rx.recv().unwrap();

    // While running: exact round-trip of every hint.
    for priority in [
        Priority::Idle,
        Priority::Lowest,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Highest,
        Priority::TimeCritical,
        Priority::Inherit,
    ] {
        thread.set_priority(priority);
        assert_eq!(thread.priority(), priority);
    }

    resume_tx.send(()).unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(thread.priority(), Priority::Inherit);
}

#[test]
fn start_succeeds_with_every_priority() {
    init_logging();
    for priority in [
        Priority::Idle,
        Priority::Lowest,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Highest,
        Priority::TimeCritical,
        Priority::Inherit,
    ] {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let thread = Thread::new(move |_| {
            ran_clone.store(true, Ordering::SeqCst);
        });
        thread.start_with_priority(priority).unwrap();
        assert!(thread.wait_timeout(WAIT_LIMIT));
        assert!(ran.load(Ordering::SeqCst), "{priority:?} body did not run");
    }
}

#[test]
fn stack_size_hint_is_sticky_before_start_only() {
    init_logging();
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let (resume_tx, resume_rx) = bounded::<()>(0);

    let thread = Thread::new(move |_| {
        entered_tx.send(()).unwrap();
        resume_rx.recv().unwrap();
    });

    assert_eq!(thread.stack_size(), 0);
    thread.set_stack_size(512 * 1024);
    assert_eq!(thread.stack_size(), 512 * 1024);

    thread.start().unwrap();
    entered_rx.recv().unwrap();
    // Post-start calls are ignored.
    thread.set_stack_size(1024);
    assert_eq!(thread.stack_size(), 512 * 1024);

    resume_tx.send(()).unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
}

#[test]
fn timer_driven_exit_returns_the_code() {
    init_logging();
    let (code_tx, code_rx) = bounded(1);
    let thread = Thread::new(move |thread| {
        code_tx.send(thread.exec()).unwrap();
    });
    thread.start().unwrap();

    let handle = thread.clone();
    single_shot(Duration::from_millis(100), &thread, move || {
        handle.exit(42);
    });

    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(code_rx.recv().unwrap(), 42);
}

#[test]
fn exit_before_loop_entry_is_latched() {
    init_logging();
    let (requested_tx, requested_rx) = bounded::<()>(0);
    let (code_tx, code_rx) = bounded(1);

    let thread = Thread::new(move |thread| {
        // Hold the body here until the exit request has been issued, so the
        // request provably precedes loop entry.
        requested_rx.recv().unwrap();
        code_tx.send(thread.exec()).unwrap();
    });
    thread.start().unwrap();

    thread.exit(53);
    requested_tx.send(()).unwrap();

    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(code_rx.recv().unwrap(), 53);
}

#[test]
fn sequential_execs_return_their_own_codes() {
    init_logging();
    let (code_tx, code_rx) = bounded(2);
    let thread = Thread::new(move |thread| {
        code_tx.send(thread.exec()).unwrap();
        code_tx.send(thread.exec()).unwrap();
    });
    thread.start().unwrap();

    thread.exit(1);
    assert_eq!(code_rx.recv_timeout(WAIT_LIMIT).unwrap(), 1);
    thread.exit(2);
    assert_eq!(code_rx.recv_timeout(WAIT_LIMIT).unwrap(), 2);
    assert!(thread.wait_timeout(WAIT_LIMIT));
}

#[test]
fn quit_is_exit_with_code_zero() {
    init_logging();
    let (code_tx, code_rx) = bounded(1);
    let thread = Thread::new(move |thread| {
        code_tx.send(thread.exec()).unwrap();
    });
    thread.start().unwrap();
    thread.quit();

    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(code_rx.recv().unwrap(), 0);
}

#[test]
fn nested_exec_unwinds_innermost_first() {
    init_logging();
    let (codes_tx, codes_rx) = bounded(2);
    let thread = Thread::new(move |thread| {
        let nested = thread.clone();
        let inner_tx = codes_tx.clone();
        thread.post(move || {
            // Runs inside the outer activation and opens a nested one.
            inner_tx.send(("inner", nested.exec())).unwrap();
            nested.exit(9);
        });
        let stopper = thread.clone();
        thread.post(move || {
            // Runs inside the nested activation; stops only that one.
            stopper.exit(7);
        });
        codes_tx.send(("outer", thread.exec())).unwrap();
    });
    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));

    assert_eq!(codes_rx.recv().unwrap(), ("inner", 7));
    assert_eq!(codes_rx.recv().unwrap(), ("outer", 9));
}

#[test]
fn posted_callables_run_on_the_target_thread_in_order() {
    init_logging();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let thread = Thread::new(|thread| {
        thread.exec();
    });
    thread.start().unwrap();

    let expected_id = thread.id().unwrap();
    for i in 0..4 {
        let order_clone = order.clone();
        thread.post(move || {
            assert_eq!(Thread::current_id(), expected_id);
            order_clone.lock().push(i);
        });
    }
    // Queued behind the items above, so they all run before the loop stops.
    let stopper = thread.clone();
    thread.post(move || stopper.quit());

    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn terminate_while_disabled_applies_on_reenable() {
    init_logging();
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let (resume_tx, resume_rx) = bounded::<()>(0);
    let after_reenable = Arc::new(AtomicBool::new(false));

    let after_clone = after_reenable.clone();
    let thread = Thread::new(move |thread| {
        thread.set_termination_enabled(false);
        entered_tx.send(()).unwrap();
        resume_rx.recv().unwrap();
        // The pending request is applied here; this call does not return.
        thread.set_termination_enabled(true);
        after_clone.store(true, Ordering::SeqCst);
    });

    thread.start().unwrap();
    entered_rx.recv().unwrap();

    thread.terminate();
    // Protected section: the request stays pending.
    std::thread::sleep(Duration::from_millis(50));
    assert!(thread.is_running());

    resume_tx.send(()).unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert!(thread.is_finished());
    assert!(!after_reenable.load(Ordering::SeqCst));
}

#[test]
fn terminate_unwinds_a_pumping_thread() {
    init_logging();
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let thread = Thread::new(move |thread| {
        entered_tx.send(()).unwrap();
        thread.exec();
    });
    thread.start().unwrap();
    entered_rx.recv().unwrap();

    thread.terminate();
    // Observably finished as soon as terminate() returns.
    assert!(thread.is_finished());
    assert!(thread.wait_timeout(WAIT_LIMIT));
}

#[test]
fn terminate_on_finished_thread_is_a_no_op() {
    init_logging();
    let thread = Thread::new(|_| {});
    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));

    thread.terminate();
    assert!(thread.is_finished());
    assert!(thread.wait_timeout(WAIT_LIMIT));
}

#[test]
fn started_and_finished_signals_bracket_the_body() {
    init_logging();
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let thread = Thread::new(move |_| {
        events_clone.lock().push("body");
    });

    let events_clone = events.clone();
    thread.connect_started(move || {
        events_clone.lock().push("started");
    });
    let events_clone = events.clone();
    thread.connect_finished(move || {
        events_clone.lock().push("finished");
    });

    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(*events.lock(), vec!["started", "body", "finished"]);
}

#[test]
fn signals_fire_on_the_transitioning_thread() {
    init_logging();
    let (ids_tx, ids_rx) = bounded(2);

    let thread = Thread::new(|_| {});
    let started_tx = ids_tx.clone();
    thread.connect_started(move || {
        started_tx.send(Thread::current_id()).unwrap();
    });
    thread.connect_finished(move || {
        ids_tx.send(Thread::current_id()).unwrap();
    });

    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));

    let body_id = thread.id().unwrap();
    assert_eq!(ids_rx.recv().unwrap(), body_id);
    assert_eq!(ids_rx.recv().unwrap(), body_id);
}

#[test]
fn disconnected_listener_does_not_fire() {
    init_logging();
    let count = Arc::new(AtomicUsize::new(0));
    let thread = Thread::new(|_| {});

    let count_clone = count.clone();
    let id = thread.connect_finished(move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert!(thread.disconnect_finished(id));

    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn wait_timeout_reports_and_leaves_the_thread_intact() {
    init_logging();
    let (resume_tx, resume_rx) = bounded::<()>(0);
    let thread = Thread::new(move |_| {
        resume_rx.recv().unwrap();
    });
    thread.start().unwrap();

    // Times out while the body is blocked; no side effect.
    assert!(!thread.wait_timeout(Duration::from_millis(50)));
    assert!(thread.is_running());

    resume_tx.send(()).unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    // Waiting again on a finished thread succeeds immediately.
    assert!(thread.wait());
}

#[test]
fn panicking_body_is_contained() {
    init_logging();
    let finished = Arc::new(AtomicBool::new(false));
    let thread = Thread::new(|_| {
        panic!("body failure");
    });
    let finished_clone = finished.clone();
    thread.connect_finished(move || {
        finished_clone.store(true, Ordering::SeqCst);
    });

    thread.start().unwrap();
    assert!(thread.wait_timeout(WAIT_LIMIT));
    assert!(thread.is_finished());
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn repeated_timers_and_cancel_are_bookkept() {
    init_logging();
    let thread = Thread::new(|thread| {
        thread.exec();
    });
    thread.start().unwrap();

    let queue = TimerQueue::global();
    let id = queue.schedule_once(Duration::from_secs(60), &thread, || {});
    assert!(queue.is_active(id));
    queue.cancel(id).unwrap();
    assert!(!queue.is_active(id));

    thread.quit();
    assert!(thread.wait_timeout(WAIT_LIMIT));
}
