//! Stream table, inbound routing and the single outbound writer.
//!
//! Outbound frames are queued per stream and drained one at a time through
//! [`Multiplexer::poll_outbound`]: connection-level frames first, then one
//! frame from each stream with pending frames in round-robin order. A stream
//! with a long backlog therefore never holds up another stream or a LEASE.
//!
//! Stream ids carry the initiator's parity: clients open odd ids, servers
//! even. A bounded window of retired ids is kept so late frames for finished
//! streams can be told apart from frames for ids that never existed.

use std::collections::{HashMap, VecDeque};

use resumux_proto::{Body, ErrorBody, Frame, Payload, RequestChannel, RequestStream, StreamId};

use crate::{
    Role,
    error::{ProtocolViolation, StreamError},
    stream::{InteractionModel, Stream, StreamEvent, StreamRole, StreamState},
};

/// Largest stream id either side may allocate.
pub const MAX_STREAM_ID: StreamId = 0x7FFF_FFFF;

/// Number of retired stream ids remembered.
pub const RETIRED_WINDOW: usize = 1024;

/// How a stream left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// Both directions finished
    Completed,
    /// Cancelled by either side
    Cancelled,
    /// Errored, rejected, or abandoned
    Errored,
    /// Our fire-and-forget request was written; the peer must never answer
    FireAndForget,
}

impl Retirement {
    fn of(stream: &Stream) -> Self {
        match stream.state() {
            StreamState::Cancelled => Self::Cancelled,
            StreamState::Errored => Self::Errored,
            _ if stream.model() == InteractionModel::FireAndForget && stream.role() == StreamRole::Requester => {
                Self::FireAndForget
            },
            _ => Self::Completed,
        }
    }

    fn state(self) -> StreamState {
        match self {
            Self::Completed | Self::FireAndForget => StreamState::Complete,
            Self::Cancelled => StreamState::Cancelled,
            Self::Errored => StreamState::Errored,
        }
    }
}

#[derive(Debug, Default)]
struct RetiredStreams {
    order: VecDeque<StreamId>,
    reasons: HashMap<StreamId, Retirement>,
}

impl RetiredStreams {
    fn insert(&mut self, id: StreamId, reason: Retirement) {
        if self.reasons.insert(id, reason).is_some() {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > RETIRED_WINDOW
            && let Some(oldest) = self.order.pop_front()
        {
            self.reasons.remove(&oldest);
        }
    }

    fn get(&self, id: StreamId) -> Option<Retirement> {
        self.reasons.get(&id).copied()
    }
}

/// Routes inbound frames to streams and serializes outbound frames.
#[derive(Debug)]
pub struct Multiplexer {
    role: Role,
    next_local_id: StreamId,
    highest_peer_id: StreamId,
    streams: HashMap<StreamId, Stream>,
    connection_queue: VecDeque<Frame>,
    stream_queues: HashMap<StreamId, VecDeque<Frame>>,
    ready: VecDeque<StreamId>,
    retired: RetiredStreams,
}

impl Multiplexer {
    /// Empty stream table for one side of a connection.
    pub fn new(role: Role) -> Self {
        let next_local_id = match role {
            Role::Client => 1,
            Role::Server => 2,
        };
        Self {
            role,
            next_local_id,
            highest_peer_id: 0,
            streams: HashMap::new(),
            connection_queue: VecDeque::new(),
            stream_queues: HashMap::new(),
            ready: VecDeque::new(),
            retired: RetiredStreams::default(),
        }
    }

    /// Whether `id` has the parity of streams we open.
    pub fn is_local_id(&self, id: StreamId) -> bool {
        let odd = id % 2 == 1;
        match self.role {
            Role::Client => odd,
            Role::Server => !odd,
        }
    }

    /// Whether `id` was ever opened on this connection, by either side.
    fn was_opened(&self, id: StreamId) -> bool {
        if self.is_local_id(id) { id < self.next_local_id } else { id != 0 && id <= self.highest_peer_id }
    }

    /// Open a stream as requester and queue its request frame.
    ///
    /// `initial_n` must be positive for request-stream and request-channel
    /// and is ignored otherwise. `complete` marks a channel's first item as
    /// its last.
    pub fn open(
        &mut self,
        model: InteractionModel,
        payload: Payload,
        initial_n: u32,
        complete: bool,
    ) -> Result<StreamId, StreamError> {
        if model.has_demand() && initial_n == 0 {
            return Err(StreamError::InvalidDemand);
        }
        if self.next_local_id > MAX_STREAM_ID {
            return Err(StreamError::IdsExhausted);
        }
        let id = self.next_local_id;
        self.next_local_id += 2;

        let body = match model {
            InteractionModel::RequestResponse => Body::RequestResponse(payload),
            InteractionModel::FireAndForget => Body::RequestFnf(payload),
            InteractionModel::RequestStream => Body::RequestStream(RequestStream { initial_n, payload }),
            InteractionModel::RequestChannel => {
                Body::RequestChannel(RequestChannel { initial_n, payload, complete })
            },
        };

        tracing::debug!(stream_id = id, ?model, initial_n, "opening stream");
        self.streams.insert(id, Stream::requester(id, model, initial_n, complete));
        self.enqueue_stream(Frame::stream(id, body));
        Ok(id)
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut Stream, StreamError> {
        if let Some(reason) = self.retired.get(id) {
            if !self.streams.contains_key(&id) {
                return Err(StreamError::Terminated { id, state: reason.state() });
            }
        }
        self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))
    }

    /// Queue a PAYLOAD on `id`, refusing it if it would exceed demand.
    pub fn send_payload(&mut self, id: StreamId, data: Option<Payload>, complete: bool) -> Result<(), StreamError> {
        let frame = self.stream_mut(id)?.send_payload(data, complete)?;
        self.enqueue_stream(frame);
        Ok(())
    }

    /// Queue a REQUEST_N on `id`.
    pub fn request_n(&mut self, id: StreamId, n: u32) -> Result<(), StreamError> {
        let frame = self.stream_mut(id)?.request_n(n)?;
        self.enqueue_stream(frame);
        Ok(())
    }

    /// Cancel `id`.
    ///
    /// Cancelling a stream that already finished is a no-op. A stream whose
    /// request was never written is dropped without anything going out.
    pub fn cancel(&mut self, id: StreamId) -> Result<(), StreamError> {
        if self.retired.get(id).is_some() && !self.streams.contains_key(&id) {
            return Ok(());
        }
        let stream = self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))?;
        let unsent = stream.state() == StreamState::Init;
        if let Some(frame) = stream.cancel() {
            self.purge_queue(id);
            if !unsent {
                self.enqueue_stream(frame);
            }
        }
        self.retire_if_done(id);
        Ok(())
    }

    /// Fail `id` with an application error.
    pub fn fail(&mut self, id: StreamId, error: ErrorBody) -> Result<(), StreamError> {
        let frame = self.stream_mut(id)?.fail(error)?;
        self.purge_queue(id);
        self.enqueue_stream(frame);
        Ok(())
    }

    /// Refuse a peer request without opening a stream (e.g. no lease).
    ///
    /// The id is still consumed, and an ERROR goes back on it.
    pub fn reject_request(&mut self, id: StreamId, error: ErrorBody) -> Result<(), ProtocolViolation> {
        self.claim_peer_id(id)?;
        tracing::warn!(stream_id = id, code = ?error.code, "rejecting peer request");
        self.retired.insert(id, Retirement::Errored);
        self.enqueue_stream(Frame::stream(id, Body::Error(error)));
        Ok(())
    }

    fn claim_peer_id(&mut self, id: StreamId) -> Result<(), ProtocolViolation> {
        if self.is_local_id(id) {
            return Err(ProtocolViolation::WrongParity(id));
        }
        if id <= self.highest_peer_id {
            return Err(ProtocolViolation::DuplicateStream(id));
        }
        self.highest_peer_id = id;
        Ok(())
    }

    /// Route a stream-scoped frame from the peer.
    pub fn route(&mut self, frame: &Frame) -> Result<Vec<StreamEvent>, ProtocolViolation> {
        let id = frame.stream_id;
        let frame_type = frame.frame_type();

        if let Some(model) = InteractionModel::from_frame_type(frame_type) {
            return self.accept_request(id, model, &frame.body);
        }

        if let Some(stream) = self.streams.get_mut(&id) {
            let events = stream.on_frame(&frame.body)?;
            if matches!(stream.state(), StreamState::Cancelled | StreamState::Errored) {
                self.purge_queue(id);
            }
            self.retire_if_done(id);
            return Ok(events);
        }

        match self.retired.get(id) {
            Some(Retirement::FireAndForget) => Err(ProtocolViolation::FireAndForgetResponse(id)),
            Some(reason) => {
                tracing::trace!(stream_id = id, ?frame_type, ?reason, "discarding frame for retired stream");
                Ok(Vec::new())
            },
            None if self.was_opened(id) => {
                tracing::trace!(stream_id = id, ?frame_type, "discarding frame for long-retired stream");
                Ok(Vec::new())
            },
            None => Err(ProtocolViolation::UnknownStream { stream_id: id, frame_type }),
        }
    }

    fn accept_request(
        &mut self,
        id: StreamId,
        model: InteractionModel,
        body: &Body,
    ) -> Result<Vec<StreamEvent>, ProtocolViolation> {
        self.claim_peer_id(id)?;

        let (payload, initial_n, complete) = match body {
            Body::RequestResponse(payload) | Body::RequestFnf(payload) => (payload.clone(), 0, false),
            Body::RequestStream(request) => (request.payload.clone(), request.initial_n, false),
            Body::RequestChannel(request) => (request.payload.clone(), request.initial_n, request.complete),
            _ => {
                return Err(ProtocolViolation::UnexpectedFrame {
                    stream_id: id,
                    frame_type: body.frame_type(),
                    reason: "not a request",
                });
            },
        };

        tracing::debug!(stream_id = id, ?model, initial_n, "peer opened stream");
        let stream = Stream::responder(id, model, initial_n, complete);
        if stream.is_terminal() {
            self.retired.insert(id, Retirement::of(&stream));
        } else {
            self.streams.insert(id, stream);
        }

        Ok(vec![StreamEvent::Request { stream_id: id, model, payload, initial_n, complete }])
    }

    /// Queue a connection-level frame ahead of all stream frames.
    pub fn enqueue_connection(&mut self, frame: Frame) {
        self.connection_queue.push_back(frame);
    }

    /// Drop queued connection-level frames (they are never replayed).
    pub fn clear_connection_queue(&mut self) {
        self.connection_queue.clear();
    }

    fn enqueue_stream(&mut self, frame: Frame) {
        let id = frame.stream_id;
        let queue = self.stream_queues.entry(id).or_default();
        if queue.is_empty() {
            self.ready.push_back(id);
        }
        queue.push_back(frame);
    }

    fn purge_queue(&mut self, id: StreamId) {
        if self.stream_queues.remove(&id).is_some() {
            self.ready.retain(|ready| *ready != id);
        }
    }

    fn retire_if_done(&mut self, id: StreamId) {
        let done = self.streams.get(&id).is_some_and(Stream::is_terminal)
            && self.stream_queues.get(&id).is_none_or(VecDeque::is_empty);
        if done && let Some(stream) = self.streams.remove(&id) {
            tracing::debug!(stream_id = id, state = ?stream.state(), "stream retired");
            self.retired.insert(id, Retirement::of(&stream));
        }
    }

    /// Next connection-level frame.
    pub fn pop_connection(&mut self) -> Option<Frame> {
        self.connection_queue.pop_front()
    }

    /// Next stream frame, taking one frame per stream in turn.
    pub fn poll_stream_frame(&mut self) -> Option<Frame> {
        while let Some(id) = self.ready.pop_front() {
            let Some(queue) = self.stream_queues.get_mut(&id) else {
                continue;
            };
            let Some(frame) = queue.pop_front() else {
                self.stream_queues.remove(&id);
                continue;
            };
            if queue.is_empty() {
                self.stream_queues.remove(&id);
            } else {
                self.ready.push_back(id);
            }

            if frame.frame_type().is_request()
                && let Some(stream) = self.streams.get_mut(&id)
            {
                stream.on_request_written();
            }
            self.retire_if_done(id);
            return Some(frame);
        }
        None
    }

    /// Next frame for the writer: connection frames first, then streams.
    pub fn poll_outbound(&mut self) -> Option<Frame> {
        self.pop_connection().or_else(|| self.poll_stream_frame())
    }

    /// Whether a connection-level frame is waiting.
    pub fn has_connection_frames(&self) -> bool {
        !self.connection_queue.is_empty()
    }

    /// Whether any frame is waiting for the writer.
    pub fn has_pending(&self) -> bool {
        !self.connection_queue.is_empty() || !self.ready.is_empty()
    }

    /// Force every live stream into `Errored` and drop all queued frames.
    ///
    /// Returns one event per affected stream, in id order.
    pub fn abandon_all(&mut self) -> Vec<StreamEvent> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();

        let mut events = Vec::new();
        for id in ids {
            if let Some(mut stream) = self.streams.remove(&id) {
                events.extend(stream.abandon());
                self.retired.insert(id, Retirement::of(&stream));
            }
        }
        self.stream_queues.clear();
        self.ready.clear();
        self.connection_queue.clear();
        events
    }

    /// Stream `id`, if it is still in the table.
    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Number of streams in the table.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }
}
