use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Simulated milliseconds; nothing in the simulator sleeps for real.
pub(crate) struct FakeClock {
    pub(crate) now_ms: u64,
}

/// Picks which router handle acts next. Sleeping handles wait on the fake clock.
pub(crate) struct Scheduler {
    ready: Vec<usize>,
    timers: BTreeMap<u64, Vec<usize>>,
    pub(crate) clock: FakeClock,
}

impl Scheduler {
    pub(crate) fn new(task_count: usize) -> Self {
        Self {
            ready: (0..task_count).collect(),
            timers: BTreeMap::new(),
            clock: FakeClock { now_ms: 0 },
        }
    }

    pub(crate) fn sleep(&mut self, task_id: usize, duration_ms: u64) {
        let wake_at = self.clock.now_ms.saturating_add(duration_ms.max(1));
        self.timers.entry(wake_at).or_default().push(task_id);
    }

    pub(crate) fn advance_time(&mut self, elapsed_ms: u64) {
        self.clock.now_ms = self.clock.now_ms.saturating_add(elapsed_ms.max(1));
        self.wake_due();
    }

    /// A random ready handle. When every handle sleeps, jump the clock to the next wake-up.
    pub(crate) fn next_ready(&mut self, rng: &mut ChaCha8Rng) -> Option<usize> {
        if self.ready.is_empty() {
            let (wake_at, mut tasks) = self.timers.pop_first()?;
            self.clock.now_ms = self.clock.now_ms.max(wake_at);
            self.ready.append(&mut tasks);
            self.wake_due();
        }
        let idx = rng.random_range(0..self.ready.len());
        Some(self.ready.swap_remove(idx))
    }

    pub(crate) fn mark_ready(&mut self, task_id: usize) {
        self.ready.push(task_id);
    }

    fn wake_due(&mut self) {
        while let Some(entry) = self.timers.first_entry() {
            if *entry.key() > self.clock.now_ms {
                break;
            }
            self.ready.append(&mut entry.remove());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn sleeping_tasks_wake_when_everyone_sleeps() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut scheduler = Scheduler::new(1);
        let task = scheduler.next_ready(&mut rng);
        assert_eq!(task, Some(0));
        scheduler.sleep(0, 25);
        assert_eq!(scheduler.next_ready(&mut rng), Some(0));
        assert_eq!(scheduler.clock.now_ms, 25);
    }

    #[test]
    fn advance_time_wakes_due_timers() {
        let mut scheduler = Scheduler::new(0);
        scheduler.sleep(3, 2);
        scheduler.advance_time(1);
        assert!(scheduler.ready.is_empty());
        scheduler.advance_time(1);
        assert_eq!(scheduler.ready, [3]);
    }
}
