//! Lease-based admission control.
//!
//! Each peer grants the other a [`Lease`]: a number of requests it may start
//! within a time window. The grantor tracks what it issued in a
//! [`LeaseSender`]; the grantee gates its own requests through a
//! [`LeaseReceiver`]. A [`LeaseLedger`] holds both for one connection.
//!
//! A lease is valid iff `count > 0 && now < issued_at + time_to_live`. Once
//! invalid it grants nothing and must be replaced by a fresh one; counts
//! never go below zero.

mod ledger;
mod receiver;
mod sender;

use std::time::{Duration, Instant};

pub use ledger::LeaseLedger;
pub use receiver::LeaseReceiver;
pub use sender::LeaseSender;

/// A countable, time-boxed request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Requests granted
    pub count: u32,
    /// Validity window
    pub time_to_live: Duration,
    /// When the lease was issued (grantor) or received (grantee)
    pub issued_at: Instant,
}

impl Lease {
    /// Create a lease.
    pub fn new(count: u32, time_to_live: Duration, issued_at: Instant) -> Self {
        Self { count, time_to_live, issued_at }
    }

    /// Build a lease from its wire form, stamped with the receipt time.
    pub fn from_wire(lease: &resumux_proto::Lease, received_at: Instant) -> Self {
        Self::new(lease.count, Duration::from_millis(u64::from(lease.time_to_live_ms)), received_at)
    }

    /// Instant at which the lease stops granting anything.
    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.time_to_live
    }

    /// Whether the time window has elapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    /// Time left before expiry (zero once expired).
    pub fn time_left(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_exclusive() {
        let t0 = Instant::now();
        let lease = Lease::new(1, Duration::from_secs(10), t0);
        assert!(!lease.is_expired(t0 + Duration::from_millis(9_999)));
        assert!(lease.is_expired(t0 + Duration::from_secs(10)));
        assert_eq!(lease.time_left(t0 + Duration::from_secs(11)), Duration::ZERO);
    }

    #[test]
    fn wire_ttl_is_milliseconds() {
        let t0 = Instant::now();
        let lease = Lease::from_wire(&resumux_proto::Lease { time_to_live_ms: 70_000, count: 5 }, t0);
        assert_eq!(lease.time_to_live, Duration::from_secs(70));
        assert_eq!(lease.count, 5);
    }
}
