//! Stream-scoped request bodies.
//!
//! REQUEST_RESPONSE and REQUEST_FNF bodies are a bare [`Payload`]; PAYLOAD
//! bodies are an optional [`Payload`] and REQUEST_N bodies a bare `u32`.

use serde::{Deserialize, Serialize};

use crate::Payload;

/// Opens a request-stream with an initial demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStream {
    /// Items the responder may send before further REQUEST_N
    pub initial_n: u32,
    /// Request payload
    pub payload: Payload,
}

/// Opens a request-channel
///
/// The payload is the requester's first item; `initial_n` is the demand the
/// requester grants the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChannel {
    /// Items the responder may send before further REQUEST_N
    pub initial_n: u32,
    /// Requester's first item
    pub payload: Payload,
    /// Requester has nothing further to send (header flag)
    #[serde(skip)]
    pub complete: bool,
}
