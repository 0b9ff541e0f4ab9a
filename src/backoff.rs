//! Growing sleep intervals for polling a running git child process.

use std::time::Duration;

/// Interval that doubles after every wait, up to a ceiling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    floor: Duration,
    ceiling: Duration,
    next_wait: Duration,
}

impl ExponentialBackoff {
    /// Starts at `floor` and never grows past `ceiling`.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            next_wait: floor,
        }
    }

    /// Intervals suited to git commands that usually finish in milliseconds.
    pub fn for_process_poll() -> Self {
        Self::new(Duration::from_millis(2), Duration::from_millis(100))
    }

    /// The interval the next wait would use.
    pub fn current(&self) -> Duration {
        self.next_wait
    }

    /// Returns how long to sleep before polling again, never past
    /// `remaining`, and grows the interval for the following call.
    pub fn step(&mut self, remaining: Duration) -> Duration {
        let wait = self.next_wait.min(remaining);
        self.next_wait = (self.next_wait * 2).min(self.ceiling);
        wait
    }

    /// Starts over from the floor.
    pub fn reset(&mut self) {
        self.next_wait = self.floor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn poll_intervals_start_small_and_double() {
        let mut backoff = ExponentialBackoff::for_process_poll();
        assert_eq!(backoff.step(LONG), Duration::from_millis(2));
        assert_eq!(backoff.step(LONG), Duration::from_millis(4));
        assert_eq!(backoff.step(LONG), Duration::from_millis(8));
    }

    #[test]
    fn intervals_stop_growing_at_ceiling() {
        let mut backoff = ExponentialBackoff::for_process_poll();
        for _ in 0..20 {
            backoff.step(LONG);
        }
        assert_eq!(backoff.current(), Duration::from_millis(100));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(2));
    }

    #[test]
    fn wait_never_runs_past_the_deadline() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        assert_eq!(backoff.step(Duration::from_millis(10)), Duration::from_millis(10));
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn ceiling_below_floor_is_raised() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(30), Duration::from_millis(5));
        backoff.step(LONG);
        assert_eq!(backoff.current(), Duration::from_millis(30));
    }
}
