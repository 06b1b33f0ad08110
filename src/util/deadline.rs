//! Millisecond deadlines for blocking operations.

use std::time::{Duration, Instant};

/// A point in time after which a blocking operation should give up.
///
/// A deadline built from a non-positive timeout never expires, matching the
/// convention that `timeout_ms <= 0` means "no limit".
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Create a deadline `timeout_ms` milliseconds from now. Non-positive
    /// values produce a deadline that never expires.
    pub fn from_millis(timeout_ms: i64) -> Self {
        let expires_at = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };
        Deadline { expires_at }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Deadline { expires_at: None }
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left until expiry, or `None` for an unbounded deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_deadline() {
        let deadline = Deadline::from_millis(0);
        assert!(!deadline.expired());
        assert!(deadline.remaining().is_none());

        let deadline = Deadline::from_millis(-1);
        assert!(!deadline.expired());
    }

    #[test]
    fn test_elapsed_deadline() {
        let deadline = Deadline::from_millis(1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_future_deadline() {
        let deadline = Deadline::from_millis(60_000);
        assert!(!deadline.expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(30));
    }
}
