//! Delayed-task scheduling for the failure monitor.
//!
//! The session never sleeps. It hands a boxed task to a `Scheduler` and
//! keeps the returned `ScheduledTask` so it can cancel it later.
//!
//! - `ThreadScheduler`: wall clock, one sleeper thread per task
//! - `ManualScheduler`: virtual clock driven by the host's own loop

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Work run once the delay elapses.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Source of time and delayed execution.
pub trait Scheduler: Send + Sync {
    /// Milliseconds since a fixed, scheduler-specific origin.
    fn now_ms(&self) -> u64;

    /// Run `task` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// Cancellation handle for a scheduled task. Cloning shares the handle.
#[derive(Clone, Default)]
pub struct ScheduledTask {
    flag: Arc<CancelFlag>,
}

#[derive(Default)]
struct CancelFlag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl ScheduledTask {
    fn new() -> Self {
        Self::default()
    }

    /// Cancel the task. Idempotent; a no-op once the task has run.
    pub fn cancel(&self) {
        let mut cancelled = self.flag.cancelled.lock();
        *cancelled = true;
        self.flag.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.cancelled.lock()
    }
}

// ---------------------------------------------------------------------------
// Wall clock
// ---------------------------------------------------------------------------

/// Wall-clock scheduler. Each task gets a sleeper thread that wakes early
/// when cancelled, so a disarm never leaves a thread sleeping out the delay.
pub struct ThreadScheduler {
    origin: Instant,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let flag = Arc::clone(&handle.flag);
        let deadline = Instant::now() + delay;

        let spawned = thread::Builder::new()
            .name("tono-watchdog".into())
            .spawn(move || {
                let mut cancelled = flag.cancelled.lock();
                while !*cancelled {
                    if flag.wake.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                if *cancelled {
                    return;
                }
                drop(cancelled);
                task();
            });

        if let Err(e) = spawned {
            log::error!("tono: failed to spawn watchdog thread: {}", e);
        }
        handle
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

/// Scheduler on a virtual clock. Nothing fires until `advance` is called.
///
/// Meant for hosts that already run a tick loop, and for tests.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now_ms: u64,
    next_seq: u64,
    pending: Vec<Pending>,
}

struct Pending {
    due_ms: u64,
    seq: u64,
    handle: ScheduledTask,
    task: Task,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward, running every task that falls due, in
    /// deadline order. Tasks run outside the lock and may schedule more work;
    /// anything they schedule inside the window also runs.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now_ms + by.as_millis() as u64;
        loop {
            let next = {
                let mut st = self.state.lock();
                st.pending.retain(|p| !p.handle.is_cancelled());
                let due = st
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due_ms <= target)
                    .min_by_key(|(_, p)| (p.due_ms, p.seq))
                    .map(|(idx, _)| idx);
                match due {
                    Some(idx) => {
                        let p = st.pending.swap_remove(idx);
                        st.now_ms = st.now_ms.max(p.due_ms);
                        Some(p.task)
                    }
                    None => {
                        st.now_ms = target;
                        None
                    }
                }
            };
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Number of tasks scheduled and not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|p| !p.handle.is_cancelled())
            .count()
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> u64 {
        self.state.lock().now_ms
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let mut st = self.state.lock();
        let seq = st.next_seq;
        st.next_seq += 1;
        let due_ms = st.now_ms + delay.as_millis() as u64;
        st.pending.push(Pending {
            due_ms,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Task) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let make = move || -> Task {
            let h = Arc::clone(&h);
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
        };
        (hits, make)
    }

    #[test]
    fn manual_fires_only_when_due() {
        let sched = ManualScheduler::new();
        let (hits, task) = counter();
        sched.schedule(Duration::from_millis(100), task());

        sched.advance(Duration::from_millis(99));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        sched.advance(Duration::from_millis(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sched.now_ms(), 100);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn manual_cancelled_task_never_runs() {
        let sched = ManualScheduler::new();
        let (hits, task) = counter();
        let handle = sched.schedule(Duration::from_millis(10), task());
        handle.cancel();
        handle.cancel();
        sched.advance(Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_runs_in_deadline_order() {
        let sched = Arc::new(ManualScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, ms) in [("late", 30u64), ("early", 10), ("mid", 20)] {
            let order = Arc::clone(&order);
            sched.schedule(
                Duration::from_millis(ms),
                Box::new(move || order.lock().push(name)),
            );
        }
        sched.advance(Duration::from_millis(50));
        assert_eq!(*order.lock(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn manual_task_can_schedule_within_window() {
        let sched = Arc::new(ManualScheduler::new());
        let (hits, task) = counter();
        let inner = Arc::clone(&sched);
        let follow_up = task();
        sched.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                inner.schedule(Duration::from_millis(10), follow_up);
            }),
        );
        sched.advance(Duration::from_millis(25));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sched.now_ms(), 25);
    }

    #[test]
    fn thread_scheduler_fires_after_delay() {
        let sched = ThreadScheduler::new();
        let (hits, task) = counter();
        sched.schedule(Duration::from_millis(20), task());
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_scheduler_cancel_prevents_fire() {
        let sched = ThreadScheduler::new();
        let (hits, task) = counter();
        let handle = sched.schedule(Duration::from_millis(100), task());
        handle.cancel();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }
}
