//! Single-slot watchdog.
//!
//! Pure bookkeeping over a `Scheduler`: at most one timer is outstanding,
//! arming always cancels the previous one, and every fire carries the
//! generation it was armed with so stale fires can be told apart.

use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::{ScheduledTask, Scheduler};

/// Countdown that signals a stalled operation unless disarmed in time.
pub struct FailureMonitor {
    scheduler: Arc<dyn Scheduler>,
    armed: Option<ScheduledTask>,
    generation: u64,
}

impl FailureMonitor {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            armed: None,
            generation: 0,
        }
    }

    /// Schedule `on_fire` after `after`. It receives the generation returned here.
    pub fn arm(&mut self, after: Duration, on_fire: impl FnOnce(u64) + Send + 'static) -> u64 {
        self.disarm();
        self.generation += 1;
        let generation = self.generation;
        let task = self
            .scheduler
            .schedule(after, Box::new(move || on_fire(generation)));
        self.armed = Some(task);
        generation
    }

    /// Cancel the pending fire, if any.
    pub fn disarm(&mut self) {
        if let Some(task) = self.armed.take() {
            task.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Accept a fire. Only the latest generation, still armed, is accepted;
    /// accepting empties the slot.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.armed.is_some() && generation == self.generation {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

impl Drop for FailureMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use parking_lot::Mutex;

    fn setup() -> (Arc<ManualScheduler>, FailureMonitor, Arc<Mutex<Vec<u64>>>) {
        let sched = Arc::new(ManualScheduler::new());
        let monitor = FailureMonitor::new(sched.clone());
        (sched, monitor, Arc::new(Mutex::new(Vec::new())))
    }

    fn recorder(fired: &Arc<Mutex<Vec<u64>>>) -> impl FnOnce(u64) + Send + 'static {
        let fired = Arc::clone(fired);
        move |g| fired.lock().push(g)
    }

    #[test]
    fn fires_once_after_duration() {
        let (sched, mut monitor, fired) = setup();
        let g = monitor.arm(Duration::from_millis(50), recorder(&fired));
        sched.advance(Duration::from_millis(49));
        assert!(fired.lock().is_empty());
        sched.advance(Duration::from_millis(10));
        assert_eq!(*fired.lock(), vec![g]);
        assert!(monitor.claim(g));
        assert!(!monitor.is_armed());
    }

    #[test]
    fn disarm_never_armed_is_noop() {
        let (sched, mut monitor, _) = setup();
        monitor.disarm();
        monitor.disarm();
        assert!(!monitor.is_armed());
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn rearm_cancels_previous_timer() {
        let (sched, mut monitor, fired) = setup();
        monitor.arm(Duration::from_millis(10), recorder(&fired));
        let second = monitor.arm(Duration::from_millis(100), recorder(&fired));
        assert_eq!(sched.pending(), 1);
        sched.advance(Duration::from_millis(200));
        assert_eq!(*fired.lock(), vec![second]);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let (_sched, mut monitor, fired) = setup();
        let first = monitor.arm(Duration::from_millis(10), recorder(&fired));
        let second = monitor.arm(Duration::from_millis(10), recorder(&fired));
        assert!(!monitor.claim(first));
        assert!(monitor.claim(second));
        assert!(!monitor.claim(second));
    }

    #[test]
    fn disarmed_fire_is_not_claimed() {
        let (_sched, mut monitor, fired) = setup();
        let g = monitor.arm(Duration::from_millis(10), recorder(&fired));
        monitor.disarm();
        assert!(!monitor.claim(g));
    }

    #[test]
    fn drop_cancels_pending_timer() {
        let (sched, mut monitor, fired) = setup();
        monitor.arm(Duration::from_millis(10), recorder(&fired));
        drop(monitor);
        sched.advance(Duration::from_millis(20));
        assert!(fired.lock().is_empty());
    }
}
