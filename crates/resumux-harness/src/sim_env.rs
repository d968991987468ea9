//! Simulated environment: virtual clock and seeded randomness.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use resumux_core::env::Environment;

#[derive(Debug)]
struct SimState {
    base: Instant,
    elapsed: Duration,
    rng: ChaCha8Rng,
}

/// Reproducible environment.
///
/// Time only moves when [`SimEnv::advance`] (or [`Environment::sleep`]) is
/// called; all clones share one clock and one RNG stream.
#[derive(Debug, Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random bytes are determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                base: Instant::now(),
                elapsed: Duration::ZERO,
                rng: ChaCha8Rng::seed_from_u64(seed),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.base + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_moves_only_when_advanced() {
        let env = SimEnv::new();
        let t0 = env.now();
        assert_eq!(env.now(), t0);

        env.advance(Duration::from_secs(5));
        assert_eq!(env.now(), t0 + Duration::from_secs(5));
        assert_eq!(env.clone().elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn same_seed_same_tokens() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        assert_eq!(a.resume_token(), b.resume_token());
        assert_ne!(a.resume_token(), SimEnv::with_seed(8).resume_token());
    }
}
