//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use resumux_core::SessionConfig;
use resumux_proto::Payload;

use crate::{
    SimEnv,
    scenario::{OracleFn, World},
};

/// One scripted action against the world.
pub type Step = Box<dyn FnOnce(&mut World) -> Result<(), String>>;

/// Scenario builder.
///
/// Configure the two sessions and add steps. Must call `.oracle()` to get a
/// [`RunnableScenario`] that can be executed.
pub struct Scenario {
    name: String,
    seed: u64,
    client_config: SessionConfig,
    server_config: SessionConfig,
    setup_payload: Payload,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create a new scenario with default client and server configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: 0,
            client_config: SessionConfig::client(),
            server_config: SessionConfig::server(),
            setup_payload: Payload::new("Client-123"),
            steps: Vec::new(),
        }
    }

    /// Seed for the simulated RNG (resume tokens).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Client session configuration.
    pub fn client_config(mut self, config: SessionConfig) -> Self {
        self.client_config = config;
        self
    }

    /// Server session configuration.
    pub fn server_config(mut self, config: SessionConfig) -> Self {
        self.server_config = config;
        self
    }

    /// Payload the client sends in SETUP.
    pub fn setup_payload(mut self, payload: Payload) -> Self {
        self.setup_payload = payload;
        self
    }

    /// Append a step. Steps run in order after the SETUP exchange settles.
    pub fn step(mut self, step: impl FnOnce(&mut World) -> Result<(), String> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// 1. Client queues SETUP (and a LEASE when leasing is on)
    /// 2. Frames move until both sides are idle
    /// 3. Each step runs, in order
    /// 4. The oracle verifies the final world
    pub fn run(self) -> Result<(), String> {
        let name = self.scenario.name;
        let env = SimEnv::with_seed(self.scenario.seed);
        let mut world =
            World::new(self.scenario.client_config, self.scenario.server_config, env, self.scenario.setup_payload);

        world.run_until_idle().map_err(|err| format!("Scenario '{name}': setup: {err}"))?;

        for (index, step) in self.scenario.steps.into_iter().enumerate() {
            step(&mut world).map_err(|err| format!("Scenario '{name}': step {index} failed: {err}"))?;
        }

        (self.oracle)(&world).map_err(|err| format!("Scenario '{name}': oracle failed: {err}"))
    }
}
