//! Lease issuance policy.

use std::time::{Duration, Instant};

use resumux_proto::{Body, Frame};

use super::Lease;
use crate::{LeaseConfig, config::duration_to_wire_millis, error::AdmissionError};

/// Tracks the lease most recently issued to the peer and decides when to
/// issue the next one.
///
/// The sender also enforces its own lease on the responder side: every
/// request the peer starts is charged through [`Self::record_peer_request`].
///
/// A re-issue does not strand requests the peer admitted under the previous
/// lease before the new one reached it. Whatever was left of the previous
/// lease stays spendable until it expires and is charged first.
#[derive(Debug, Clone)]
pub struct LeaseSender {
    config: LeaseConfig,
    issued: Option<IssuedLease>,
    superseded: Option<IssuedLease>,
}

#[derive(Debug, Clone, Copy)]
struct IssuedLease {
    lease: Lease,
    remaining: u32,
}

impl LeaseSender {
    /// Sender issuing leases per `config`. Nothing is issued until the first
    /// [`Self::poll`] or [`Self::issue`].
    pub fn new(config: LeaseConfig) -> Self {
        Self { config, issued: None, superseded: None }
    }

    /// Issue a fresh budget to the peer, replacing whatever was issued before.
    pub fn issue(&mut self, count: u32, time_to_live: Duration, now: Instant) -> Frame {
        let lease = Lease::new(count, time_to_live, now);
        self.superseded = self
            .issued
            .replace(IssuedLease { lease, remaining: count })
            .filter(|previous| previous.remaining > 0 && !previous.lease.is_expired(now));

        tracing::debug!(count, ttl_ms = time_to_live.as_millis() as u64, "issuing lease");

        Frame::connection(Body::Lease(resumux_proto::Lease {
            time_to_live_ms: duration_to_wire_millis(time_to_live),
            count,
        }))
    }

    /// Next LEASE frame, if the policy calls for one now.
    ///
    /// Re-issues when nothing was issued yet, the issued lease expired, less
    /// than `min(reissue_margin, ttl / 2)` of it is left, or at most
    /// `min(reissue_below, count - 1)` requests are left on it.
    pub fn poll(&mut self, now: Instant) -> Option<Frame> {
        if self.needs_reissue(now) {
            Some(self.issue(self.config.count, self.config.time_to_live, now))
        } else {
            None
        }
    }

    fn needs_reissue(&self, now: Instant) -> bool {
        let Some(issued) = self.issued else {
            return true;
        };
        let lease = issued.lease;
        if lease.is_expired(now) {
            return true;
        }

        let margin = self.config.reissue_margin.min(lease.time_to_live / 2);
        if lease.time_left(now) <= margin {
            return true;
        }

        let floor = self.config.reissue_below.min(lease.count.saturating_sub(1));
        issued.remaining <= floor
    }

    /// Charge one peer-initiated request against the issued lease.
    ///
    /// A request outside the issued budget must be rejected with
    /// `ERROR(stream, REJECTED)` and never reach the application.
    pub fn record_peer_request(&mut self, now: Instant) -> Result<(), AdmissionError> {
        if let Some(previous) = self.superseded.as_mut()
            && !previous.lease.is_expired(now)
            && let Some(left) = previous.remaining.checked_sub(1)
        {
            previous.remaining = left;
            return Ok(());
        }
        self.superseded = None;

        let issued = self.issued.as_mut().ok_or(AdmissionError::NoLease)?;
        if issued.lease.is_expired(now) {
            return Err(AdmissionError::Expired);
        }
        issued.remaining = issued.remaining.checked_sub(1).ok_or(AdmissionError::Exhausted)?;
        Ok(())
    }

    /// The lease most recently issued, if any.
    pub fn issued(&self) -> Option<Lease> {
        self.issued.map(|issued| issued.lease)
    }

    /// Requests the peer may still start under the issued lease.
    pub fn remaining(&self) -> u32 {
        self.issued.map_or(0, |issued| issued.remaining)
    }

    /// Requests still honoured from the lease the current one replaced.
    pub fn superseded_remaining(&self) -> u32 {
        self.superseded.map_or(0, |previous| previous.remaining)
    }

    /// Forget the issued lease; the next [`Self::poll`] issues a fresh one.
    pub fn reset(&mut self) {
        self.issued = None;
        self.superseded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LeaseConfig {
        LeaseConfig::default()
    }

    fn lease_of(frame: &Frame) -> resumux_proto::Lease {
        match &frame.body {
            Body::Lease(lease) => *lease,
            other => panic!("expected LEASE, got {other:?}"),
        }
    }

    #[test]
    fn first_poll_issues_configured_lease() {
        let mut sender = LeaseSender::new(config());
        let frame = sender.poll(Instant::now()).expect("initial lease");

        assert_eq!(frame.stream_id, 0);
        assert_eq!(lease_of(&frame), resumux_proto::Lease { time_to_live_ms: 70_000, count: 5 });
        assert_eq!(sender.remaining(), 5);
    }

    #[test]
    fn quiet_while_lease_is_healthy() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        sender.poll(t0);

        assert!(sender.poll(t0 + Duration::from_secs(30)).is_none());
        sender.record_peer_request(t0).unwrap();
        assert!(sender.poll(t0 + Duration::from_secs(31)).is_none());
    }

    #[test]
    fn reissues_near_expiry() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        sender.poll(t0);

        assert!(sender.poll(t0 + Duration::from_millis(68_999)).is_none());
        let frame = sender.poll(t0 + Duration::from_millis(69_000)).expect("within margin");
        assert_eq!(lease_of(&frame).count, 5);
        assert_eq!(sender.issued().unwrap().issued_at, t0 + Duration::from_millis(69_000));
    }

    #[test]
    fn reissues_near_exhaustion() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        sender.poll(t0);

        for _ in 0..3 {
            sender.record_peer_request(t0).unwrap();
        }
        assert!(sender.poll(t0).is_none(), "two left is above the floor");

        sender.record_peer_request(t0).unwrap();
        assert!(sender.poll(t0).is_some(), "one left triggers re-issue");
        assert_eq!(sender.remaining(), 5);
    }

    #[test]
    fn single_request_lease_is_not_reissued_immediately() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(LeaseConfig { count: 1, ..config() });
        sender.poll(t0);
        assert!(sender.poll(t0).is_none());

        sender.record_peer_request(t0).unwrap();
        assert!(sender.poll(t0).is_some());
    }

    #[test]
    fn peer_requests_beyond_budget_are_refused() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        assert_eq!(sender.record_peer_request(t0), Err(AdmissionError::NoLease));

        sender.issue(2, Duration::from_secs(10), t0);
        assert!(sender.record_peer_request(t0).is_ok());
        assert!(sender.record_peer_request(t0).is_ok());
        assert_eq!(sender.record_peer_request(t0), Err(AdmissionError::Exhausted));

        sender.issue(2, Duration::from_secs(10), t0);
        assert_eq!(sender.record_peer_request(t0 + Duration::from_secs(10)), Err(AdmissionError::Expired));
    }

    #[test]
    fn requests_in_flight_across_a_reissue_spend_the_old_lease() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        sender.poll(t0);
        for _ in 0..4 {
            sender.record_peer_request(t0).unwrap();
        }

        // One left triggers the re-issue; the peer already spent it.
        assert!(sender.poll(t0).is_some());
        assert_eq!(sender.superseded_remaining(), 1);
        sender.record_peer_request(t0).unwrap();
        assert_eq!(sender.superseded_remaining(), 0);

        // The new lease is still whole for the peer.
        for _ in 0..5 {
            sender.record_peer_request(t0).unwrap();
        }
        assert_eq!(sender.record_peer_request(t0), Err(AdmissionError::Exhausted));
    }

    #[test]
    fn leftover_of_an_expired_lease_is_not_honoured() {
        let t0 = Instant::now();
        let mut sender = LeaseSender::new(config());
        sender.issue(3, Duration::from_secs(1), t0);
        sender.issue(1, Duration::from_secs(10), t0);
        assert_eq!(sender.superseded_remaining(), 3);

        let later = t0 + Duration::from_secs(2);
        sender.record_peer_request(later).unwrap();
        assert_eq!(sender.superseded_remaining(), 0);
        assert_eq!(sender.record_peer_request(later), Err(AdmissionError::Exhausted));
    }
}
