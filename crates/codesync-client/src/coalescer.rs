//! Trailing-edge debounce for outbound publishes.
//!
//! The coalescer holds at most one pending value. Every [`schedule`] replaces
//! it and pushes the deadline out to `now + delay`; the value is released by
//! [`fire`] only once the deadline has passed with no further schedule. It
//! owns no timer: the replica loop sleeps until [`deadline`] and feeds the
//! wake-up back in, which keeps this type pure and trivially testable.
//!
//! [`schedule`]: Coalescer::schedule
//! [`fire`]: Coalescer::fire
//! [`deadline`]: Coalescer::deadline

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Coalescer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Coalescer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending value and restart the quiet period.
    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// Drop the pending value. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Release the pending value immediately, ignoring the deadline.
    pub fn flush_now(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Release the pending value if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        if self.deadline().is_some_and(|deadline| deadline <= now) {
            self.flush_now()
        } else {
            None
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: Duration = Duration::from_millis(500);

    #[test]
    fn test_fires_only_after_quiet_period() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(D);
        c.schedule("a", t0);

        assert_eq!(c.fire(t0 + Duration::from_millis(499)), None);
        assert_eq!(c.fire(t0 + D), Some("a"));
        assert!(!c.is_pending());
        assert_eq!(c.fire(t0 + D * 2), None);
    }

    #[test]
    fn test_reschedule_keeps_latest_and_extends_deadline() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(D);
        c.schedule(1, t0);
        c.schedule(2, t0 + Duration::from_millis(300));
        c.schedule(3, t0 + Duration::from_millis(400));

        assert_eq!(c.deadline(), Some(t0 + Duration::from_millis(900)));
        assert_eq!(c.fire(t0 + Duration::from_millis(800)), None);
        assert_eq!(c.fire(t0 + Duration::from_millis(900)), Some(3));
    }

    #[test]
    fn test_cancel_drops_value() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(D);
        c.schedule("x", t0);
        assert!(c.cancel());
        assert!(!c.cancel());
        assert_eq!(c.fire(t0 + D), None);
        assert_eq!(c.deadline(), None);
    }

    #[test]
    fn test_flush_now_ignores_deadline() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(D);
        c.schedule("x", t0);
        assert_eq!(c.flush_now(), Some("x"));
        assert_eq!(c.flush_now(), None);
    }
}
