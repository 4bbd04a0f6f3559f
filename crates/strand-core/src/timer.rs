//! Process-wide timer queue with affinity-correct dispatch.
//!
//! Armed timers are keyed by a monotonic deadline. On expiry, a timer's
//! callback is **posted into its target thread's event loop queue** — it is
//! never invoked on the context managing the timers, so the callback always
//! observes the target thread's data without additional locking. A timer
//! whose target reaches `Finished` before the deadline is discarded silently.
//!
//! The queue is a lazy global backed by one management thread; arming a
//! timer with an earlier deadline re-arms that thread's sleep.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use strand_core::{single_shot, Thread};
//!
//! let thread = Thread::new(|thread| {
//!     let code = thread.exec();
//!     assert_eq!(code, 42);
//! });
//! thread.start().unwrap();
//!
//! let target = thread.clone();
//! single_shot(Duration::from_millis(100), &thread, move || {
//!     target.exit(42);
//! });
//! thread.wait();
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Once, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use slotmap::{new_key_type, SlotMap};

use crate::error::TimerError;
use crate::logging::targets;
use crate::thread::Thread;

new_key_type! {
    /// A unique identifier for an armed timer.
    pub struct TimerId;
}

/// The type of timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once after the specified delay.
    OneShot,
    /// Fires repeatedly at the specified interval.
    Repeating,
}

/// The callback owned by an armed timer.
enum TimerCallback {
    /// Taken on fire.
    OneShot(Option<Box<dyn FnOnce() + Send + 'static>>),
    /// Cloned on each fire.
    Repeating(Arc<dyn Fn() + Send + Sync + 'static>),
}

/// Internal timer data.
struct TimerData {
    /// When this timer should next fire.
    deadline: Instant,
    /// The re-arm interval for repeating timers; the original delay otherwise.
    interval: Duration,
    /// The callback to post on expiry.
    callback: TimerCallback,
    /// The thread the callback must run on.
    target: Thread,
    /// Whether this timer is armed.
    active: bool,
}

impl TimerData {
    fn kind(&self) -> TimerKind {
        match self.callback {
            TimerCallback::OneShot(_) => TimerKind::OneShot,
            TimerCallback::Repeating(_) => TimerKind::Repeating,
        }
    }
}

/// An entry in the deadline heap (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

/// State guarded by the queue mutex.
struct QueueState {
    /// All armed timers.
    timers: SlotMap<TimerId, TimerData>,
    /// Pending fires, min-heap by deadline. Entries for cancelled timers are
    /// pruned lazily.
    heap: BinaryHeap<TimerQueueEntry>,
}

/// The process-wide timer queue.
///
/// Obtain it via [`TimerQueue::global`]; the management thread is spawned on
/// first access.
pub struct TimerQueue {
    state: Mutex<QueueState>,
    /// Signalled when a new deadline is armed.
    armed: Condvar,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                timers: SlotMap::with_key(),
                heap: BinaryHeap::new(),
            }),
            armed: Condvar::new(),
        }
    }

    /// Get the global timer queue, spawning the management thread on first use.
    pub fn global() -> &'static TimerQueue {
        static QUEUE: OnceLock<TimerQueue> = OnceLock::new();
        static DRIVER: Once = Once::new();

        let queue = QUEUE.get_or_init(TimerQueue::new);
        DRIVER.call_once(|| {
            thread::Builder::new()
                .name("strand-timer".to_string())
                .spawn(move || queue.drive())
                .expect("Failed to spawn timer management thread");
        });
        queue
    }

    /// Arm a one-shot timer firing after `delay` on `target`.
    ///
    /// Returns the timer ID that can be used to cancel the timer before it
    /// fires.
    pub fn schedule_once<F>(&self, delay: Duration, target: &Thread, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.arm(
            delay,
            target,
            TimerCallback::OneShot(Some(Box::new(callback))),
        )
    }

    /// Arm a repeating timer firing every `interval` on `target`.
    ///
    /// The first fire occurs after `interval`; each fire re-arms the timer
    /// from the fire time. Returns the timer ID used to cancel it.
    pub fn schedule_repeating<F>(&self, interval: Duration, target: &Thread, callback: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.arm(interval, target, TimerCallback::Repeating(Arc::new(callback)))
    }

    fn arm(&self, delay: Duration, target: &Thread, callback: TimerCallback) -> TimerId {
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        let id = state.timers.insert(TimerData {
            deadline,
            interval: delay,
            callback,
            target: target.clone(),
            active: true,
        });
        state.heap.push(TimerQueueEntry {
            id,
            fire_time: deadline,
        });
        tracing::trace!(
            target: targets::TIMER,
            ?id,
            delay_ms = delay.as_millis() as u64,
            target_thread = %target.name(),
            "timer armed"
        );
        self.armed.notify_one();
        id
    }

    /// Cancel an armed timer.
    ///
    /// Returns an error if the timer has already fired (one-shot), been
    /// cancelled, or never existed.
    pub fn cancel(&self, id: TimerId) -> Result<(), TimerError> {
        let mut state = self.state.lock();
        if let Some(timer) = state.timers.get_mut(id) {
            timer.active = false;
            state.timers.remove(id);
            Ok(())
        } else {
            Err(TimerError::InvalidTimerId)
        }
    }

    /// Check if a timer is still armed.
    pub fn is_active(&self, id: TimerId) -> bool {
        self.state.lock().timers.get(id).is_some_and(|t| t.active)
    }

    /// The kind of an armed timer, or `None` if it is gone.
    pub fn kind(&self, id: TimerId) -> Option<TimerKind> {
        self.state.lock().timers.get(id).map(TimerData::kind)
    }

    /// The number of armed timers.
    pub fn active_count(&self) -> usize {
        self.state.lock().timers.iter().filter(|(_, t)| t.active).count()
    }

    /// Management loop: sleep until the next deadline, then dispatch.
    fn drive(&self) {
        let mut state = self.state.lock();
        loop {
            // Prune cancelled entries from the head of the heap.
            while let Some(entry) = state.heap.peek() {
                if state.timers.get(entry.id).is_some_and(|t| t.active) {
                    break;
                }
                state.heap.pop();
            }

            let now = Instant::now();
            match state.heap.peek().copied() {
                None => {
                    self.armed.wait(&mut state);
                }
                Some(entry) if entry.fire_time > now => {
                    let _ = self.armed.wait_until(&mut state, entry.fire_time);
                }
                Some(_) => {
                    Self::dispatch_due(&mut state, now);
                }
            }
        }
    }

    /// Pop and dispatch every entry whose deadline has passed.
    fn dispatch_due(state: &mut QueueState, now: Instant) {
        while let Some(entry) = state.heap.peek().copied() {
            if entry.fire_time > now {
                break;
            }
            state.heap.pop();

            let (kind, target_finished) = match state.timers.get(entry.id) {
                Some(timer) if timer.active => (timer.kind(), timer.target.is_finished()),
                // Cancelled since it was queued.
                _ => {
                    state.timers.remove(entry.id);
                    continue;
                }
            };

            if target_finished {
                tracing::trace!(
                    target: targets::TIMER,
                    id = ?entry.id,
                    "target thread finished before deadline; timer discarded"
                );
                state.timers.remove(entry.id);
                continue;
            }

            tracing::trace!(target: targets::TIMER, id = ?entry.id, "timer fired");
            match kind {
                TimerKind::OneShot => {
                    if let Some(timer) = state.timers.remove(entry.id) {
                        if let TimerCallback::OneShot(Some(callback)) = timer.callback {
                            timer.target.post(callback);
                        }
                    }
                }
                TimerKind::Repeating => {
                    if let Some(timer) = state.timers.get_mut(entry.id) {
                        timer.deadline = now + timer.interval;
                        if let TimerCallback::Repeating(callback) = &timer.callback {
                            let callback = callback.clone();
                            timer.target.post(move || callback());
                        }
                        state.heap.push(TimerQueueEntry {
                            id: entry.id,
                            fire_time: now + timer.interval,
                        });
                    }
                }
            }
        }
    }
}

/// Arm a one-shot timer on the global queue.
///
/// Convenience wrapper for [`TimerQueue::global`] +
/// [`schedule_once`](TimerQueue::schedule_once).
pub fn single_shot<F>(delay: Duration, target: &Thread, callback: F) -> TimerId
where
    F: FnOnce() + Send + 'static,
{
    TimerQueue::global().schedule_once(delay, target, callback)
}
