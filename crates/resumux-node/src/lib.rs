//! resumux node
//!
//! Runs resumux sessions over real transports. A server accepts
//! connections, creates a session per SETUP and serves requests from a
//! static [`routes::RouteTable`]; sessions whose transport drops are parked
//! in a [`registry::Registry`] until the client resumes them or their
//! resume window elapses. A client opens one session, issues one request and
//! reconnects per its resume policy when the transport is lost.
//!
//! Everything protocol-related happens in `resumux-core`; this crate only
//! moves bytes, keeps time and owns tasks.

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod outbox;
pub mod registry;
pub mod routes;
pub mod server;
pub mod service;
pub mod transport;

pub use client::{Client, Outcome, Request};
pub use error::{NodeError, Result};
pub use routes::{RouteError, RouteTable};
pub use server::Server;
pub use service::{Handler, builtin_routes};
pub use transport::TcpTransport;
