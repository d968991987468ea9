//! Wire format for the resumux protocol.
//!
//! Every frame is a fixed 24-byte header (zero-copy binary) followed by a
//! variable-length CBOR body. The header carries everything the multiplexer
//! needs to route a frame and every position the resume machinery needs to
//! account for it: frame type, stream id, position and flags. Bodies are only
//! decoded once a frame has been routed.
//!
//! The application payload itself is opaque here. A [`Payload`] is a pair of
//! byte buffers (data and optional metadata) and nothing in this crate
//! interprets them.
//!
//! # Security
//!
//! All header parsing uses compile-time verified layouts via `zerocopy`. We
//! enforce a 16 MB body limit to prevent memory exhaustion attacks.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod flags;
pub mod frame;
pub mod frame_type;
pub mod header;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::{Body, Frame};
pub use frame_type::FrameType;
pub use header::FrameHeader;
pub use payloads::{
    ErrorBody, ErrorCode, Keepalive, Lease, Payload, RequestChannel, RequestStream, Resume,
    ResumeOk, Setup,
};

/// Identifier of a logical stream within a session.
///
/// Stream 0 is reserved for connection-level frames. Client-initiated streams
/// are odd, server-initiated streams are even.
pub type StreamId = u32;

/// Sequence number of a resumable frame in one direction of a session.
pub type Position = u64;
