//! Frame body types.
//!
//! Bodies are CBOR-encoded. Boolean parts of a frame (completion, resume and
//! lease enablement, keepalive respond) live in the header flags and are
//! marked `#[serde(skip)]` here; [`crate::Frame`] moves them between the two.

pub mod connection;
pub mod stream;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use connection::{ErrorBody, ErrorCode, Keepalive, Lease, Resume, ResumeOk, Setup};
pub use stream::{RequestChannel, RequestStream};

/// Opaque application payload: data plus optional metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Payload {
    /// Metadata bytes (e.g. a route), if any
    pub metadata: Option<Bytes>,
    /// Data bytes
    pub data: Bytes,
}

impl Payload {
    /// Payload with data only.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { metadata: None, data: data.into() }
    }

    /// Payload with both metadata and data.
    pub fn with_metadata(metadata: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self { metadata: Some(metadata.into()), data: data.into() }
    }
}
