//! Fixed-rate loop pacing.

use std::thread;
use std::time::{Duration, Instant};

/// Fixed-rate pacing for a loop: `wait` sleeps until the next tick.
///
/// A loop that falls behind is not allowed to burst to catch up; the schedule
/// restarts from the late tick.
pub struct Throttle {
    period: Duration,
    next: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the current tick is due. The first call returns at once.
    pub fn wait(&mut self) {
        let now = Instant::now();
        match self.next {
            Some(due) if due > now => {
                thread::sleep(due - now);
                self.next = Some(due + self.period);
            }
            _ => self.next = Some(now + self.period),
        }
    }

    /// Forget the schedule, e.g. after the loop was parked.
    pub fn reset(&mut self) {
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_paces_ticks() {
        let mut throttle = Throttle::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..4 {
            throttle.wait();
        }
        // first tick is immediate, the other three are 10ms apart
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_late_loop_does_not_burst() {
        let mut throttle = Throttle::new(Duration::from_millis(10));
        throttle.wait();
        thread::sleep(Duration::from_millis(35));
        throttle.wait(); // late: returns immediately and reschedules
        let start = Instant::now();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(8));
    }
}
