//! Environment abstraction for time and randomness.
//!
//! Protocol logic never reads the clock or an RNG directly. Production code
//! uses [`SystemEnv`]; simulations supply a seeded, virtual-clock
//! implementation so runs are reproducible.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use bytes::Bytes;

/// Length of generated resume tokens in bytes
pub const RESUME_TOKEN_LEN: usize = 16;

/// Source of time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fresh opaque resume token.
    fn resume_token(&self) -> Bytes {
        let mut token = [0u8; RESUME_TOKEN_LEN];
        self.random_bytes(&mut token);
        Bytes::copy_from_slice(&token)
    }
}

/// Wall-clock environment backed by tokio timers and the thread RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}
