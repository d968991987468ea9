//! Error taxonomy.
//!
//! - [`AdmissionError`]: a request was refused locally for lack of a valid
//!   lease. Nothing was sent; the caller may retry later.
//! - [`StreamError`]: a local operation on one stream is not allowed in its
//!   current state (unknown id, terminated, out of demand).
//! - [`ProtocolViolation`]: the peer broke the protocol. Fatal to the
//!   connection; the session reports it through actions, not `Err`.
//! - [`ResumeError`]: the resume handshake failed or the window elapsed.
//!   Fatal to the session.
//! - [`SessionError`]: wraps the above for session-level operations.

use std::time::Duration;

use resumux_proto::{ErrorBody, FrameType, Position, StreamId};
use thiserror::Error;

use crate::{resume::ResumeState, stream::StreamState};

/// Local admission refusal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The peer has not granted a lease yet
    #[error("no lease received from peer")]
    NoLease,
    /// The held lease's time-to-live has elapsed
    #[error("lease expired")]
    Expired,
    /// The held lease has no requests left
    #[error("lease exhausted")]
    Exhausted,
}

/// Local stream operation refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No such stream was ever opened
    #[error("stream {0} does not exist")]
    UnknownStream(StreamId),

    /// Stream already reached a terminal state
    #[error("stream {id} is {state:?}")]
    Terminated {
        /// Stream id
        id: StreamId,
        /// Terminal state it reached
        state: StreamState,
    },

    /// Emitting a data item would exceed the peer's demand
    #[error("stream {id} has no outstanding demand")]
    DemandExhausted {
        /// Stream id
        id: StreamId,
    },

    /// Request-stream and request-channel need a positive initial demand,
    /// REQUEST_N a positive increment
    #[error("demand must be positive")]
    InvalidDemand,

    /// Operation does not exist for this side of this interaction model
    #[error("{operation} not permitted on stream {id}")]
    NotPermitted {
        /// Stream id
        id: StreamId,
        /// Refused operation
        operation: &'static str,
    },

    /// The id space for locally initiated streams is used up
    #[error("stream ids exhausted")]
    IdsExhausted,
}

/// Peer broke the protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Frame addressed a stream id that was never opened
    #[error("{frame_type:?} for unknown stream {stream_id}")]
    UnknownStream {
        /// Stream id
        stream_id: StreamId,
        /// Offending frame
        frame_type: FrameType,
    },

    /// Request frame reused a live or retired stream id
    #[error("request reuses stream id {0}")]
    DuplicateStream(StreamId),

    /// Peer-initiated request used our parity
    #[error("stream id {0} has the wrong parity for a peer request")]
    WrongParity(StreamId),

    /// Peer sent a data item without demand
    #[error("peer exceeded demand on stream {0}")]
    DemandExceeded(StreamId),

    /// Peer answered a fire-and-forget request
    #[error("response frame for fire-and-forget stream {0}")]
    FireAndForgetResponse(StreamId),

    /// Frame is not valid for the stream's model, side or state
    #[error("unexpected {frame_type:?} on stream {stream_id}: {reason}")]
    UnexpectedFrame {
        /// Stream id
        stream_id: StreamId,
        /// Offending frame
        frame_type: FrameType,
        /// Why it is invalid
        reason: &'static str,
    },

    /// Connection-level frame arrived where it makes no sense
    #[error("unexpected {0:?} frame on stream 0")]
    UnexpectedConnectionFrame(FrameType),

    /// Resumable frame skipped ahead of the next expected position
    #[error("expected position {expected}, received {received}")]
    PositionGap {
        /// Next position we expected
        expected: Position,
        /// Position we got
        received: Position,
    },
}

/// Resume handshake failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResumeError {
    /// Session was created without resumption
    #[error("resume is not enabled for this session")]
    Disabled,

    /// RESUME named a different session
    #[error("resume token does not match")]
    TokenMismatch,

    /// Peer's position cannot be reconciled with what we retained
    #[error("peer position {peer} outside retained range {first}..={last}")]
    PositionMismatch {
        /// Position the peer reported
        peer: Position,
        /// Lowest position we can accept
        first: Position,
        /// Highest position we can accept
        last: Position,
    },

    /// Peer refused our RESUME
    #[error("peer rejected resume: {0}")]
    Rejected(String),

    /// No successful resume inside the window
    #[error("resume window of {0:?} elapsed")]
    WindowElapsed(Duration),
}

/// Session-level operation failure.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Request refused for lack of lease
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Stream operation refused
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Peer broke the protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// Resume failed
    #[error(transparent)]
    Resume(#[from] ResumeError),

    /// Operation not valid in the current connection state
    #[error("{operation} is invalid in state {state:?}")]
    InvalidState {
        /// Connection state at the time
        state: ResumeState,
        /// Refused operation
        operation: &'static str,
    },

    /// SETUP could not be accepted; the body should be sent to the peer
    #[error("setup rejected: {}", .0.message)]
    SetupRejected(ErrorBody),
}
