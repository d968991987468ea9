//! resumux protocol core logic
//!
//! Pure state machine logic for resumux sessions, completely decoupled from
//! I/O. Time is passed into every method that needs it, randomness comes
//! from an [`env::Environment`], and effects come back out as values.
//!
//! # Architecture
//!
//! A [`session::Session`] is the single connection-owning context. It owns:
//!
//! - the [`multiplexer::Multiplexer`], which holds the stream table and the
//!   outbound queues, and is the only place frames leave from
//! - the [`resume::ResumeController`], which holds position counters, the
//!   pending-outbound buffer and the [`lease::LeaseLedger`]
//!
//! Inbound frames go in through `Session::handle_frame`; timers advance
//! through `Session::tick`; outbound frames come out one at a time through
//! `Session::poll_outbound`, so a driver has exactly one writer by
//! construction. Everything else the driver must do (deliver events to the
//! application, reconnect, give up) is returned as a
//! [`session::SessionAction`].
//!
//! # Components
//!
//! - [`lease`]: lease ledger, sender policy and receiver gate
//! - [`stream`]: per-stream interaction-model state machine
//! - [`multiplexer`]: stream table, inbound routing, fair outbound writer
//! - [`resume`]: position bookkeeping, replay buffer, reconnection policy
//! - [`session`]: everything above wired into one connection
//! - [`config`]: session configuration
//! - [`mod@env`]: environment abstraction (time, RNG)
//! - [`transport`]: transport abstraction (byte streams)
//! - [`error`]: error taxonomy

pub mod config;
pub mod env;
pub mod error;
pub mod lease;
pub mod multiplexer;
pub mod resume;
pub mod session;
pub mod stream;
pub mod transport;

pub use config::{KeepaliveConfig, LeaseConfig, ResumeConfig, Role, SessionConfig};
pub use error::{AdmissionError, ProtocolViolation, ResumeError, SessionError, StreamError};
pub use session::{Session, SessionAction};
pub use stream::{InteractionModel, StreamEvent, StreamState};
