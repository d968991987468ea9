//! Connection-level frame bodies (stream id 0).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{Payload, Position};

/// Connection setup
///
/// # Protocol Flow
///
/// Sent exactly once by the client as the first frame of a new session. The
/// server either accepts silently (and starts issuing leases when the lease
/// flag is set) or answers with `ERROR(0, REJECTED_SETUP)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    /// How often the client will send KEEPALIVE
    pub keepalive_interval_ms: u32,
    /// How long without any inbound frame before the connection is dead
    pub max_lifetime_ms: u32,
    /// Whether both sides gate requests on leases (header flag)
    #[serde(skip)]
    pub lease: bool,
    /// Resume token; present iff resumption is enabled
    pub resume_token: Option<Bytes>,
    /// MIME type of payload data
    pub data_mime: String,
    /// MIME type of payload metadata
    pub metadata_mime: String,
    /// Setup payload, handed to the server application
    pub payload: Payload,
}

impl Setup {
    /// Whether the client asked for a resumable session.
    pub fn resume_enabled(&self) -> bool {
        self.resume_token.is_some()
    }
}

/// Request budget granted to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Validity window from receipt, in milliseconds
    pub time_to_live_ms: u32,
    /// Number of requests the peer may start inside the window
    pub count: u32,
}

/// Liveness probe
///
/// Doubles as an acknowledgement: `last_received_position` lets the peer
/// drop buffered frames that no longer need to be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    /// Ask the peer to echo a KEEPALIVE (header flag)
    #[serde(skip)]
    pub respond: bool,
    /// Last resumable position the sender has received
    pub last_received_position: Position,
}

/// Resume request, sent by the client on a fresh transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Token from the original SETUP
    pub token: Bytes,
    /// Last position the client produced
    pub outbound_position: Position,
    /// Last position the client received
    pub inbound_position: Position,
}

/// Resume accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOk {
    /// Last position the server received
    pub inbound_position: Position,
}

/// Error codes carried by ERROR frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum ErrorCode {
    /// SETUP was malformed
    InvalidSetup = 0x001,
    /// SETUP asked for something the server does not support
    UnsupportedSetup = 0x002,
    /// Server refused the session
    RejectedSetup = 0x003,
    /// Resume could not be honored; the session is gone
    RejectedResume = 0x004,
    /// Connection is being torn down because of an error
    ConnectionError = 0x101,
    /// Connection is being closed cleanly
    ConnectionClose = 0x102,
    /// Application-level failure on one stream
    ApplicationError = 0x201,
    /// Request was refused (e.g. no lease)
    Rejected = 0x202,
    /// Request was cancelled by the responder
    Canceled = 0x203,
    /// Request was invalid
    Invalid = 0x204,
}

impl ErrorCode {
    /// Codes that only make sense on stream 0.
    pub fn is_connection_level(self) -> bool {
        (self as u32) < 0x200
    }
}

/// Error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error classification
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}
