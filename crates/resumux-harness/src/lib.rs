//! Deterministic simulation harness for resumux protocol testing.
//!
//! - [`SimEnv`]: seeded RNG and a virtual clock
//! - [`scenario::World`]: a client and a server session wired through an
//!   in-memory, codec-backed link with fault injection (disconnects, frames
//!   lost in flight, partitions that make reconnection fail)
//! - [`scenario::Scenario`]: declarative tests with a mandatory oracle
//! - [`SimTransport`]: turmoil-backed transport for driver tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
