//! Per-connection lease bookkeeping.

use std::time::Instant;

use resumux_proto::Frame;

use super::{Lease, LeaseReceiver, LeaseSender};
use crate::{LeaseConfig, error::AdmissionError};

/// Both halves of the lease exchange for one connection.
///
/// When leasing is disabled every admission succeeds and no LEASE frame is
/// ever produced.
#[derive(Debug)]
pub struct LeaseLedger {
    enabled: bool,
    receiver: LeaseReceiver,
    sender: LeaseSender,
}

impl LeaseLedger {
    /// Ledger that issues per `config`.
    pub fn enabled(config: LeaseConfig) -> Self {
        Self { enabled: true, receiver: LeaseReceiver::new(), sender: LeaseSender::new(config) }
    }

    /// Ledger for a session without leasing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            receiver: LeaseReceiver::new(),
            sender: LeaseSender::new(LeaseConfig::default()),
        }
    }

    /// Whether leasing is in force.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admit one locally originated request.
    pub fn admit(&self, now: Instant) -> Result<(), AdmissionError> {
        if !self.enabled {
            return Ok(());
        }
        self.receiver.try_acquire(now).map(|_| ())
    }

    /// Admit one peer-originated request against the lease we issued.
    pub fn admit_peer_request(&mut self, now: Instant) -> Result<(), AdmissionError> {
        if !self.enabled {
            return Ok(());
        }
        self.sender.record_peer_request(now)
    }

    /// A LEASE frame arrived from the peer.
    pub fn on_lease_frame(&mut self, lease: &resumux_proto::Lease, now: Instant) {
        if !self.enabled {
            tracing::warn!(count = lease.count, "ignoring LEASE on a session without leasing");
            return;
        }
        tracing::debug!(count = lease.count, ttl_ms = lease.time_to_live_ms, "lease received");
        self.receiver.accept(Lease::from_wire(lease, now));
    }

    /// LEASE frame to send now, if any.
    pub fn poll_issue(&mut self, now: Instant) -> Option<Frame> {
        if !self.enabled {
            return None;
        }
        self.sender.poll(now)
    }

    /// Forget the issued lease so a fresh one goes out on the next poll.
    pub fn reset_issued(&mut self) {
        self.sender.reset();
    }

    /// Forget everything, received and issued.
    pub fn reset(&mut self) {
        self.receiver.reset();
        self.sender.reset();
    }

    /// Gate for local requests.
    pub fn receiver(&self) -> &LeaseReceiver {
        &self.receiver
    }

    /// Issuance policy.
    pub fn sender(&self) -> &LeaseSender {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn disabled_ledger_admits_everything_and_issues_nothing() {
        let now = Instant::now();
        let mut ledger = LeaseLedger::disabled();

        for _ in 0..100 {
            assert!(ledger.admit(now).is_ok());
            assert!(ledger.admit_peer_request(now).is_ok());
        }
        assert!(ledger.poll_issue(now).is_none());

        ledger.on_lease_frame(&resumux_proto::Lease { time_to_live_ms: 1, count: 0 }, now);
        assert!(ledger.admit(now).is_ok());
    }

    #[test]
    fn enabled_ledger_waits_for_lease() {
        let t0 = Instant::now();
        let mut ledger = LeaseLedger::enabled(LeaseConfig::default());
        assert_eq!(ledger.admit(t0), Err(AdmissionError::NoLease));

        ledger.on_lease_frame(&resumux_proto::Lease { time_to_live_ms: 1_000, count: 1 }, t0);
        assert!(ledger.admit(t0).is_ok());
        assert_eq!(ledger.admit(t0), Err(AdmissionError::Exhausted));
    }

    #[test]
    fn reset_drops_both_halves() {
        let t0 = Instant::now();
        let mut ledger = LeaseLedger::enabled(LeaseConfig::default());
        assert!(ledger.poll_issue(t0).is_some());
        ledger.on_lease_frame(&resumux_proto::Lease { time_to_live_ms: 1_000, count: 3 }, t0);

        ledger.reset();
        assert_eq!(ledger.admit(t0), Err(AdmissionError::NoLease));
        assert!(ledger.sender().issued().is_none());
        assert!(ledger.poll_issue(t0 + Duration::from_millis(1)).is_some());
    }
}
