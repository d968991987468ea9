//! Per-stream interaction-model state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ request written  ┌────────┐ both directions done ┌──────────┐
//! │ Init │─────────────────>│ Active │─────────────────────>│ Complete │
//! └──────┘  (responder: on  └────────┘                      └──────────┘
//!              accept)          │ CANCEL          ┌───────────┐
//!                               ├────────────────>│ Cancelled │
//!                               │ ERROR           └───────────┘
//!                               │                 ┌─────────┐
//!                               └────────────────>│ Errored │
//!                                                 └─────────┘
//! ```
//!
//! Each side tracks whether its own direction (`local_complete`) and the
//! peer's direction (`remote_complete`) are finished; models that only flow
//! one way start with the other direction already complete. The stream is
//! `Complete` when both are.
//!
//! Demand: `outbound_demand` is how many data items we may still send,
//! granted by the peer's REQUEST_N (or the request's initial demand when we
//! are the responder). `inbound_demand` is how many we have granted the peer.
//! Only data-bearing PAYLOAD frames consume demand.

use resumux_proto::{Body, ErrorBody, ErrorCode, Frame, FrameType, Payload, StreamId};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolViolation, StreamError};

/// The four request shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionModel {
    /// One request, one response
    RequestResponse,
    /// One request, no response
    FireAndForget,
    /// One request, a demand-driven stream of responses
    RequestStream,
    /// Demand-driven streams in both directions
    RequestChannel,
}

impl InteractionModel {
    /// Model opened by a request frame of this type.
    pub fn from_frame_type(frame_type: FrameType) -> Option<Self> {
        match frame_type {
            FrameType::RequestResponse => Some(Self::RequestResponse),
            FrameType::RequestFnf => Some(Self::FireAndForget),
            FrameType::RequestStream => Some(Self::RequestStream),
            FrameType::RequestChannel => Some(Self::RequestChannel),
            _ => None,
        }
    }

    /// Whether the model negotiates demand with REQUEST_N.
    pub fn has_demand(self) -> bool {
        matches!(self, Self::RequestStream | Self::RequestChannel)
    }
}

/// Lifecycle state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    /// Opened locally, request frame not yet written
    Init,
    /// Request written (requester) or accepted (responder)
    Active,
    /// Both directions finished
    Complete,
    /// Either side cancelled
    Cancelled,
    /// Either side errored, or the session was abandoned
    Errored,
}

impl StreamState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Errored)
    }
}

/// Which side of the stream we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// We sent the request
    Requester,
    /// The peer sent the request
    Responder,
}

/// Something the application needs to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Peer opened a stream; dispatch it to a handler
    Request {
        /// New stream
        stream_id: StreamId,
        /// Interaction model
        model: InteractionModel,
        /// Request payload (first item for a channel)
        payload: Payload,
        /// Demand granted to us (stream/channel), 0 otherwise
        initial_n: u32,
        /// Requester already finished its direction (channel only)
        complete: bool,
    },
    /// Data item from the peer
    Next {
        /// Stream
        stream_id: StreamId,
        /// Item
        payload: Payload,
    },
    /// Peer finished its direction
    Complete {
        /// Stream
        stream_id: StreamId,
    },
    /// Stream failed: peer ERROR, or connection lost on abandonment
    Error {
        /// Stream
        stream_id: StreamId,
        /// Reason
        error: ErrorBody,
    },
    /// Peer cancelled the stream
    Cancelled {
        /// Stream
        stream_id: StreamId,
    },
    /// Peer granted us more demand
    Demand {
        /// Stream
        stream_id: StreamId,
        /// Increment
        n: u32,
    },
}

impl StreamEvent {
    /// Stream the event is about.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Request { stream_id, .. }
            | Self::Next { stream_id, .. }
            | Self::Complete { stream_id }
            | Self::Error { stream_id, .. }
            | Self::Cancelled { stream_id }
            | Self::Demand { stream_id, .. } => *stream_id,
        }
    }
}

/// Error body used when the session is abandoned.
pub fn connection_lost() -> ErrorBody {
    ErrorBody::new(ErrorCode::ConnectionError, "connection lost")
}

/// One logical stream.
#[derive(Debug, Clone)]
pub struct Stream {
    id: StreamId,
    model: InteractionModel,
    role: StreamRole,
    state: StreamState,
    outbound_demand: u32,
    inbound_demand: u32,
    local_complete: bool,
    remote_complete: bool,
}

impl Stream {
    /// Stream we are opening. `initial_n` is the demand we grant the
    /// responder; `complete` whether a channel's first item is also its last.
    pub fn requester(id: StreamId, model: InteractionModel, initial_n: u32, complete: bool) -> Self {
        let (inbound_demand, local_complete, remote_complete) = match model {
            InteractionModel::RequestResponse => (1, true, false),
            InteractionModel::FireAndForget => (0, true, true),
            InteractionModel::RequestStream => (initial_n, true, false),
            InteractionModel::RequestChannel => (initial_n, complete, false),
        };
        Self {
            id,
            model,
            role: StreamRole::Requester,
            state: StreamState::Init,
            outbound_demand: 0,
            inbound_demand,
            local_complete,
            remote_complete,
        }
    }

    /// Stream the peer opened. `initial_n` is the demand the peer granted us.
    pub fn responder(id: StreamId, model: InteractionModel, initial_n: u32, complete: bool) -> Self {
        let (outbound_demand, local_complete, remote_complete, state) = match model {
            InteractionModel::RequestResponse => (1, false, true, StreamState::Active),
            InteractionModel::FireAndForget => (0, true, true, StreamState::Complete),
            InteractionModel::RequestStream => (initial_n, false, true, StreamState::Active),
            InteractionModel::RequestChannel => (initial_n, false, complete, StreamState::Active),
        };
        Self {
            id,
            model,
            role: StreamRole::Responder,
            state,
            outbound_demand,
            inbound_demand: 0,
            local_complete,
            remote_complete,
        }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Interaction model.
    pub fn model(&self) -> InteractionModel {
        self.model
    }

    /// Our side.
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Data items we may still send.
    pub fn outbound_demand(&self) -> u32 {
        self.outbound_demand
    }

    /// Data items we have granted the peer and not yet received.
    pub fn inbound_demand(&self) -> u32 {
        self.inbound_demand
    }

    /// Whether the peer finished its direction.
    pub fn is_remote_complete(&self) -> bool {
        self.remote_complete
    }

    /// Whether the stream reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn is_fire_and_forget_requester(&self) -> bool {
        self.model == InteractionModel::FireAndForget && self.role == StreamRole::Requester
    }

    /// Whether we may emit PAYLOAD frames on this stream at all.
    fn may_send_payload(&self) -> bool {
        match self.role {
            StreamRole::Requester => self.model == InteractionModel::RequestChannel,
            StreamRole::Responder => self.model != InteractionModel::FireAndForget,
        }
    }

    /// Whether REQUEST_N flows from us to the peer on this stream.
    fn may_request_n(&self) -> bool {
        match self.role {
            StreamRole::Requester => self.model.has_demand(),
            StreamRole::Responder => self.model == InteractionModel::RequestChannel,
        }
    }

    fn ensure_live(&self) -> Result<(), StreamError> {
        if self.is_terminal() {
            return Err(StreamError::Terminated { id: self.id, state: self.state });
        }
        Ok(())
    }

    fn settle(&mut self) {
        if !self.is_terminal() && self.local_complete && self.remote_complete {
            tracing::debug!(stream_id = self.id, "stream complete");
            self.state = StreamState::Complete;
        }
    }

    /// The request frame left through the writer.
    pub fn on_request_written(&mut self) {
        if self.state == StreamState::Init {
            self.state = StreamState::Active;
            self.settle();
        }
    }

    /// Build a PAYLOAD frame, charging demand for a data item.
    ///
    /// Emitting beyond current demand is refused here, before anything is
    /// queued. A request-response reply always completes the stream.
    pub fn send_payload(&mut self, data: Option<Payload>, complete: bool) -> Result<Frame, StreamError> {
        self.ensure_live()?;
        if !self.may_send_payload() {
            return Err(StreamError::NotPermitted { id: self.id, operation: "payload" });
        }
        if self.local_complete {
            return Err(StreamError::NotPermitted { id: self.id, operation: "payload after complete" });
        }
        if data.is_none() && !complete {
            return Err(StreamError::NotPermitted { id: self.id, operation: "empty payload" });
        }

        if data.is_some() {
            if self.outbound_demand == 0 {
                return Err(StreamError::DemandExhausted { id: self.id });
            }
            self.outbound_demand -= 1;
        }

        let complete = complete || self.model == InteractionModel::RequestResponse;
        if complete {
            self.local_complete = true;
            self.settle();
        }

        Ok(Frame::stream(self.id, Body::Payload { data, complete }))
    }

    /// Grant the peer `n` more data items.
    pub fn request_n(&mut self, n: u32) -> Result<Frame, StreamError> {
        if n == 0 {
            return Err(StreamError::InvalidDemand);
        }
        self.ensure_live()?;
        if !self.may_request_n() || self.remote_complete {
            return Err(StreamError::NotPermitted { id: self.id, operation: "request_n" });
        }
        self.inbound_demand = self.inbound_demand.saturating_add(n);
        Ok(Frame::stream(self.id, Body::RequestN(n)))
    }

    /// Cancel locally. Idempotent: a terminal stream yields no frame.
    pub fn cancel(&mut self) -> Option<Frame> {
        if self.is_terminal() {
            return None;
        }
        tracing::debug!(stream_id = self.id, "stream cancelled locally");
        self.state = StreamState::Cancelled;
        self.outbound_demand = 0;
        self.inbound_demand = 0;
        Some(Frame::stream(self.id, Body::Cancel))
    }

    /// Fail the stream with an application error.
    pub fn fail(&mut self, error: ErrorBody) -> Result<Frame, StreamError> {
        self.ensure_live()?;
        if self.is_fire_and_forget_requester() {
            return Err(StreamError::NotPermitted { id: self.id, operation: "error" });
        }
        tracing::debug!(stream_id = self.id, code = ?error.code, "stream failed locally");
        self.state = StreamState::Errored;
        Ok(Frame::stream(self.id, Body::Error(error)))
    }

    /// Force the stream into `Errored` because the session is gone.
    ///
    /// Returns the event to surface, if any. Fire-and-forget requesters never
    /// hear about their stream.
    pub fn abandon(&mut self) -> Option<StreamEvent> {
        if self.is_terminal() {
            return None;
        }
        self.state = StreamState::Errored;
        if self.is_fire_and_forget_requester() {
            return None;
        }
        Some(StreamEvent::Error { stream_id: self.id, error: connection_lost() })
    }

    /// Apply a frame the peer sent on this stream.
    pub fn on_frame(&mut self, body: &Body) -> Result<Vec<StreamEvent>, ProtocolViolation> {
        let frame_type = body.frame_type();
        let id = self.id;

        if self.is_fire_and_forget_requester() {
            return Err(ProtocolViolation::FireAndForgetResponse(id));
        }
        if self.is_terminal() {
            tracing::trace!(stream_id = id, ?frame_type, state = ?self.state, "discarding frame for finished stream");
            return Ok(Vec::new());
        }

        let unexpected = |reason| ProtocolViolation::UnexpectedFrame { stream_id: id, frame_type, reason };
        let mut events = Vec::new();

        match body {
            Body::Payload { data, complete } => {
                if self.remote_complete {
                    return Err(unexpected("payload after peer completed"));
                }
                if let Some(payload) = data {
                    if self.inbound_demand == 0 {
                        return Err(ProtocolViolation::DemandExceeded(id));
                    }
                    self.inbound_demand -= 1;
                    events.push(StreamEvent::Next { stream_id: id, payload: payload.clone() });
                }
                if *complete || self.model == InteractionModel::RequestResponse {
                    self.remote_complete = true;
                    self.inbound_demand = 0;
                    events.push(StreamEvent::Complete { stream_id: id });
                    self.settle();
                }
            },
            Body::RequestN(n) => {
                let grants_us = match self.role {
                    StreamRole::Requester => self.model == InteractionModel::RequestChannel,
                    StreamRole::Responder => self.model.has_demand(),
                };
                if !grants_us {
                    return Err(unexpected("request_n not valid for this model"));
                }
                if !self.local_complete {
                    self.outbound_demand = self.outbound_demand.saturating_add(*n);
                    events.push(StreamEvent::Demand { stream_id: id, n: *n });
                }
            },
            Body::Cancel => {
                tracing::debug!(stream_id = id, "stream cancelled by peer");
                self.state = StreamState::Cancelled;
                self.outbound_demand = 0;
                self.inbound_demand = 0;
                events.push(StreamEvent::Cancelled { stream_id: id });
            },
            Body::Error(error) => {
                tracing::debug!(stream_id = id, code = ?error.code, "stream errored by peer");
                self.state = StreamState::Errored;
                events.push(StreamEvent::Error { stream_id: id, error: error.clone() });
            },
            _ => return Err(unexpected("not valid on an open stream")),
        }

        Ok(events)
    }
}
