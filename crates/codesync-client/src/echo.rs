//! Suppression of a client's own writes coming back over its subscription.
//!
//! The store delivers every accepted write to every subscriber, including the
//! writer. Re-applying our own publish would clobber keystrokes typed since it
//! was issued, so the first inbound snapshot within a short window after a
//! publish is dropped.
//!
//! This is a heuristic: a remote write that lands inside the window is dropped
//! too, and a slow echo that arrives after it is applied (harmlessly, since
//! it matches what we sent unless we have typed since).

use std::time::Duration;

use tokio::time::Instant;

/// Verdict for an inbound snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoCheck {
    /// Treat as our own echo and drop it.
    Suppress,
    /// Process normally.
    Accept,
}

#[derive(Debug, Clone)]
pub struct EchoGuard {
    window: Duration,
    pending_echo_until: Option<Instant>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending_echo_until: None,
        }
    }

    /// Called immediately before a publish is issued. A later publish
    /// overwrites the deadline.
    pub fn arm(&mut self, now: Instant) {
        self.pending_echo_until = Some(now + self.window);
    }

    pub fn disarm(&mut self) {
        self.pending_echo_until = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pending_echo_until.is_some()
    }

    /// Classify an inbound snapshot. The flag is consumed either way.
    pub fn check_inbound(&mut self, now: Instant) -> EchoCheck {
        match self.pending_echo_until.take() {
            Some(until) if now < until => EchoCheck::Suppress,
            _ => EchoCheck::Accept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_millis(100);

    #[test]
    fn test_suppresses_one_snapshot_inside_window() {
        let t0 = Instant::now();
        let mut guard = EchoGuard::new(W);
        guard.arm(t0);

        assert_eq!(guard.check_inbound(t0 + Duration::from_millis(20)), EchoCheck::Suppress);
        assert_eq!(guard.check_inbound(t0 + Duration::from_millis(30)), EchoCheck::Accept);
    }

    #[test]
    fn test_expired_flag_is_cleared() {
        let t0 = Instant::now();
        let mut guard = EchoGuard::new(W);
        guard.arm(t0);

        assert_eq!(guard.check_inbound(t0 + W), EchoCheck::Accept);
        assert!(!guard.is_armed());
    }

    #[test]
    fn test_unarmed_accepts() {
        let mut guard = EchoGuard::new(W);
        assert_eq!(guard.check_inbound(Instant::now()), EchoCheck::Accept);
    }

    #[test]
    fn test_rearm_moves_deadline() {
        let t0 = Instant::now();
        let mut guard = EchoGuard::new(W);
        guard.arm(t0);
        guard.arm(t0 + Duration::from_millis(80));
        assert_eq!(
            guard.check_inbound(t0 + Duration::from_millis(150)),
            EchoCheck::Suppress
        );
    }
}
