//! Gate for locally originated requests.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Instant,
};

use super::Lease;
use crate::error::AdmissionError;

#[derive(Debug)]
struct HeldLease {
    lease: Lease,
    remaining: AtomicU32,
}

/// Holds the lease most recently received from the peer.
///
/// Admission takes `&self`: the remaining count is decremented with a
/// compare-and-swap loop, so concurrent openers sharing a receiver can never
/// admit more requests than the lease grants. Replacing the lease takes
/// `&mut self` and is only done by the connection-owning context.
#[derive(Debug, Default)]
pub struct LeaseReceiver {
    held: Option<HeldLease>,
}

impl LeaseReceiver {
    /// Receiver holding no lease. Nothing is admitted until [`Self::accept`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held lease with a freshly received one.
    pub fn accept(&mut self, lease: Lease) {
        self.held = Some(HeldLease { lease, remaining: AtomicU32::new(lease.count) });
    }

    /// Why a request would be refused right now, if it would.
    pub fn check(&self, now: Instant) -> Result<(), AdmissionError> {
        let held = self.held.as_ref().ok_or(AdmissionError::NoLease)?;
        if held.lease.is_expired(now) {
            return Err(AdmissionError::Expired);
        }
        if held.remaining.load(Ordering::Acquire) == 0 {
            return Err(AdmissionError::Exhausted);
        }
        Ok(())
    }

    /// Whether the held lease is valid: count left and ttl not elapsed.
    pub fn allowed(&self, now: Instant) -> bool {
        self.check(now).is_ok()
    }

    /// Take one request from the held lease.
    ///
    /// Never goes below zero: an exhausted lease yields
    /// [`AdmissionError::Exhausted`] and is left untouched. Callers that have
    /// not just checked [`Self::allowed`] should use [`Self::try_acquire`].
    pub fn consume(&self) -> Result<u32, AdmissionError> {
        let held = self.held.as_ref().ok_or(AdmissionError::NoLease)?;
        held.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| AdmissionError::Exhausted)
    }

    /// Check expiry and take one request in a single step.
    ///
    /// Returns the count left after this request.
    pub fn try_acquire(&self, now: Instant) -> Result<u32, AdmissionError> {
        let held = self.held.as_ref().ok_or(AdmissionError::NoLease)?;
        if held.lease.is_expired(now) {
            return Err(AdmissionError::Expired);
        }
        self.consume()
    }

    /// Requests left on the held lease (0 if none held).
    pub fn remaining(&self) -> u32 {
        self.held.as_ref().map_or(0, |held| held.remaining.load(Ordering::Acquire))
    }

    /// The held lease, if any.
    pub fn lease(&self) -> Option<Lease> {
        self.held.as_ref().map(|held| held.lease)
    }

    /// Forget the held lease.
    pub fn reset(&mut self) {
        self.held = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread, time::Duration};

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn nothing_admitted_without_lease() {
        let receiver = LeaseReceiver::new();
        let now = Instant::now();
        assert!(!receiver.allowed(now));
        assert_eq!(receiver.try_acquire(now), Err(AdmissionError::NoLease));
        assert_eq!(receiver.consume(), Err(AdmissionError::NoLease));
    }

    #[test]
    fn sixth_request_rejected_until_fresh_lease() {
        let t0 = Instant::now();
        let mut receiver = LeaseReceiver::new();
        receiver.accept(Lease::new(5, Duration::from_millis(70_000), t0));

        for i in 0..5 {
            let now = t0 + Duration::from_secs(i);
            assert!(receiver.try_acquire(now).is_ok(), "request {i} should be admitted");
        }
        assert_eq!(receiver.try_acquire(t0 + Duration::from_secs(6)), Err(AdmissionError::Exhausted));
        assert_eq!(receiver.remaining(), 0);

        receiver.accept(Lease::new(5, Duration::from_millis(70_000), t0 + Duration::from_secs(7)));
        assert_eq!(receiver.try_acquire(t0 + Duration::from_secs(8)), Ok(4));
    }

    #[test]
    fn expiry_needs_no_frame() {
        let t0 = Instant::now();
        let mut receiver = LeaseReceiver::new();
        receiver.accept(Lease::new(10, Duration::from_secs(5), t0));

        assert!(receiver.allowed(t0 + Duration::from_secs(4)));
        assert!(!receiver.allowed(t0 + Duration::from_secs(5)));
        assert_eq!(receiver.try_acquire(t0 + Duration::from_secs(5)), Err(AdmissionError::Expired));
        assert_eq!(receiver.remaining(), 10, "expired lease is not charged");
    }

    #[test]
    fn concurrent_acquire_never_over_admits() {
        let t0 = Instant::now();
        let mut receiver = LeaseReceiver::new();
        receiver.accept(Lease::new(50, Duration::from_secs(60), t0));
        let admitted = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if receiver.try_acquire(t0).is_ok() {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::Relaxed), 50);
        assert_eq!(receiver.remaining(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allowed(u64),
        Consume,
        TryAcquire(u64),
        Renew(u32, u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..200).prop_map(Op::Allowed),
            Just(Op::Consume),
            (0u64..200).prop_map(Op::TryAcquire),
            (0u32..8, 0u64..200).prop_map(|(c, t)| Op::Renew(c, t)),
        ]
    }

    proptest! {
        #[test]
        fn count_never_negative_and_invalid_lease_never_allowed(
            count in 0u32..8,
            ttl in 1u64..100,
            ops in proptest::collection::vec(op(), 0..64),
        ) {
            let t0 = Instant::now();
            let mut receiver = LeaseReceiver::new();
            let mut lease = Lease::new(count, Duration::from_secs(ttl), t0);
            receiver.accept(lease);
            let mut model = count;

            for op in ops {
                match op {
                    Op::Allowed(at) => {
                        let now = t0 + Duration::from_secs(at);
                        let expected = model > 0 && !lease.is_expired(now);
                        prop_assert_eq!(receiver.allowed(now), expected);
                    },
                    Op::Consume => {
                        let result = receiver.consume();
                        prop_assert_eq!(result.is_ok(), model > 0);
                        model = model.saturating_sub(1);
                    },
                    Op::TryAcquire(at) => {
                        let now = t0 + Duration::from_secs(at);
                        let admit = model > 0 && !lease.is_expired(now);
                        prop_assert_eq!(receiver.try_acquire(now).is_ok(), admit);
                        if admit {
                            model -= 1;
                        }
                    },
                    Op::Renew(c, t) => {
                        lease = Lease::new(c, Duration::from_secs(t.max(1)), t0);
                        receiver.accept(lease);
                        model = c;
                    },
                }
                prop_assert_eq!(receiver.remaining(), model);
            }
        }
    }
}
