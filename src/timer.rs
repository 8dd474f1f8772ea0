//! Single retransmission timer per connection.
//!
//! bTCP deliberately runs one timer per *connection*, not per segment: the
//! deadline always tracks the oldest unacknowledged segment, and expiry
//! triggers a full Go-Back-N retransmission of everything outstanding.
//! Timeout granularity is therefore coarse by design.
//!
//! [`std::time::Instant`] is monotonic, so the deadline is immune to
//! wall-clock adjustments (NTP steps, leap seconds, timezone changes).

use std::time::{Duration, Instant};

/// A single re-armable deadline.
///
/// `arm` is idempotent while the timer is running: the deadline belongs to
/// the oldest outstanding segment and must not be pushed back by younger
/// traffic.  [`RetransmitTimer::restart`] exists for the one case where the
/// deadline genuinely moves — the start of a new retransmission cycle.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    /// Create a disarmed timer with a fixed timeout duration.
    ///
    /// The timeout is configuration supplied at connection creation and
    /// never changes afterwards.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// `true` while a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Start the timer if it is not already running.
    ///
    /// No effect while armed; see [`RetransmitTimer::restart`].
    pub fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
    }

    /// Unconditionally start a fresh timeout interval.
    ///
    /// Used when a retransmission cycle begins or when the window slides and
    /// a different segment becomes the oldest outstanding one.
    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Clear any pending deadline.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// `true` when the timer is armed and its deadline has passed.
    ///
    /// Checking does not disarm; the caller retransmits and then calls
    /// [`RetransmitTimer::restart`] for the next cycle.
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn starts_disarmed() {
        let t = RetransmitTimer::new(TIMEOUT);
        assert!(!t.is_armed());
        assert!(!t.is_expired(Instant::now()));
    }

    #[test]
    fn arm_then_expire() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        let start = Instant::now();
        t.arm(start);
        assert!(t.is_armed());
        assert!(!t.is_expired(start));
        assert!(!t.is_expired(start + TIMEOUT / 2));
        assert!(t.is_expired(start + TIMEOUT));
        assert!(t.is_expired(start + TIMEOUT * 2));
    }

    #[test]
    fn arm_is_idempotent_while_running() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        let start = Instant::now();
        t.arm(start);
        // A later arm must not push the deadline back.
        t.arm(start + TIMEOUT / 2);
        assert!(t.is_expired(start + TIMEOUT));
    }

    #[test]
    fn restart_moves_the_deadline() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        let start = Instant::now();
        t.arm(start);
        t.restart(start + TIMEOUT / 2);
        assert!(!t.is_expired(start + TIMEOUT));
        assert!(t.is_expired(start + TIMEOUT / 2 + TIMEOUT));
    }

    #[test]
    fn disarm_clears_the_deadline() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        let start = Instant::now();
        t.arm(start);
        t.disarm();
        assert!(!t.is_armed());
        assert!(!t.is_expired(start + TIMEOUT * 10));
    }

    #[test]
    fn expiry_does_not_disarm() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        let start = Instant::now();
        t.arm(start);
        assert!(t.is_expired(start + TIMEOUT));
        assert!(t.is_armed());
    }
}
