//! Node error types.

use std::io;

use resumux_core::SessionError;
use resumux_proto::ProtocolError;
use thiserror::Error;

use crate::routes::RouteError;

/// Errors surfaced by the node driver, server and client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent bytes that do not decode as a frame
    #[error("frame decoding failed: {0}")]
    Codec(#[from] ProtocolError),

    /// Session refused an operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Route table could not be built
    #[error(transparent)]
    Route(#[from] RouteError),

    /// First frame on a connection was neither SETUP nor RESUME
    #[error("expected SETUP or RESUME, got {0}")]
    UnexpectedFirstFrame(String),

    /// Peer hung up before sending a first frame
    #[error("connection closed before handshake")]
    ClosedBeforeHandshake,

    /// Session gave up (resume window elapsed, peer error, violation)
    #[error("session abandoned: {0}")]
    Abandoned(String),
}

/// Result alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
