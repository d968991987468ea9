//! Requesting side: one request per run, reconnecting on transport loss.

use std::{convert::Infallible, future::pending, net::SocketAddr};

use bytes::Bytes;
use resumux_core::{
    InteractionModel, Session, SessionAction, SessionConfig, StreamEvent, env::Environment, transport::Transport,
};
use resumux_proto::{ErrorBody, ErrorCode, Payload, StreamId};

use crate::{
    driver::{Application, Connection, Exit, TICK_INTERVAL},
    error::{NodeError, Result},
    outbox::Outboxes,
    service::route_metadata,
};

/// A single request to issue.
#[derive(Debug, Clone)]
pub struct Request {
    /// Route, sent as UTF-8 metadata
    pub route: String,
    /// Interaction model
    pub model: InteractionModel,
    /// Request data; for a channel, every item after the first follows on
    /// the stream
    pub data: Vec<Bytes>,
    /// Initial demand for stream and channel requests
    pub initial_n: u32,
}

/// Everything the requester saw on its stream.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Stream id the request went out on
    pub stream_id: StreamId,
    /// Data items received, in order
    pub items: Vec<Payload>,
    /// Error that ended the stream, if any
    pub error: Option<ErrorBody>,
    /// Whether the responder completed the stream
    pub completed: bool,
    /// Transports re-established while the request was in flight
    pub reconnections: u32,
}

/// Application side of a client session.
#[derive(Debug, Default)]
struct Requester {
    stream_id: Option<StreamId>,
    batch: u32,
    outboxes: Outboxes,
    outcome: Outcome,
}

impl Requester {
    fn issue(&mut self, session: &mut Session, request: &Request, now: std::time::Instant) -> Result<StreamId> {
        let mut data = request.data.iter().cloned();
        let first = data.next().unwrap_or_default();
        let payload = Payload::with_metadata(route_metadata(&request.route), first);

        let id = match request.model {
            InteractionModel::RequestResponse => session.request_response(payload, now)?,
            InteractionModel::FireAndForget => session.fire_and_forget(payload, now)?,
            InteractionModel::RequestStream => session.request_stream(payload, request.initial_n, now)?,
            InteractionModel::RequestChannel => {
                let rest: Vec<Bytes> = data.collect();
                let id = session.request_channel(payload, request.initial_n, rest.is_empty(), now)?;
                if !rest.is_empty() {
                    for item in rest {
                        self.outboxes.push(id, Payload::new(item));
                    }
                    self.outboxes.finish(id);
                }
                id
            },
        };

        tracing::info!(stream_id = id, route = %request.route, model = ?request.model, "request issued");
        self.stream_id = Some(id);
        self.batch = request.initial_n.max(1);
        self.outcome.stream_id = id;
        Ok(id)
    }

    /// Grant another batch once the responder has used up its demand.
    fn replenish(&self, session: &mut Session, id: StreamId) -> Result<()> {
        let exhausted = session.stream(id).is_some_and(|stream| {
            stream.model().has_demand()
                && stream.inbound_demand() == 0
                && !stream.is_remote_complete()
                && !stream.is_terminal()
        });
        if exhausted {
            session.request_n(id, self.batch)?;
        }
        Ok(())
    }
}

impl Application for Requester {
    fn on_event(&mut self, session: &mut Session, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Next { stream_id, payload } => {
                tracing::info!(stream_id, data = %String::from_utf8_lossy(&payload.data), "next");
                if Some(stream_id) == self.stream_id {
                    self.outcome.items.push(payload);
                    self.replenish(session, stream_id)?;
                }
            },
            StreamEvent::Complete { stream_id } => {
                tracing::info!(stream_id, "complete");
                if Some(stream_id) == self.stream_id {
                    self.outcome.completed = true;
                }
            },
            StreamEvent::Error { stream_id, error } => {
                tracing::warn!(stream_id, code = ?error.code, message = %error.message, "stream failed");
                self.outboxes.discard(stream_id);
                if Some(stream_id) == self.stream_id {
                    self.outcome.error = Some(error);
                }
            },
            StreamEvent::Cancelled { stream_id } => {
                tracing::info!(stream_id, "cancelled by responder");
                self.outboxes.discard(stream_id);
            },
            StreamEvent::Demand { stream_id, .. } => self.outboxes.flush(session, stream_id)?,
            StreamEvent::Request { stream_id, model, .. } => {
                tracing::warn!(stream_id, ?model, "refusing request from server");
                if model != InteractionModel::FireAndForget {
                    session.fail(stream_id, ErrorBody::new(ErrorCode::Rejected, "client serves no routes"))?;
                }
            },
        }
        Ok(())
    }

    fn is_finished(&self, session: &Session) -> bool {
        self.stream_id.is_some_and(|id| session.stream(id).is_none()) && !session.has_outbound()
    }
}

/// Issues requests to one server.
pub struct Client<T, E> {
    transport: T,
    env: E,
    config: SessionConfig,
    remote: SocketAddr,
}

impl<T, E> Client<T, E>
where
    T: Transport,
    E: Environment,
{
    /// Client for the server at `remote`.
    pub fn new(transport: T, env: E, config: SessionConfig, remote: SocketAddr) -> Self {
        Self { transport, env, config, remote }
    }

    /// Open a session, issue `request` and run until its stream ends.
    ///
    /// Transport loss is ridden out by resuming; the call fails only if the
    /// session is abandoned.
    pub async fn request(&self, request: &Request) -> Result<Outcome> {
        let stream = self.transport.connect(self.remote).await?;
        let mut connection = Connection::new(stream);
        let mut session = Session::connect(self.config.clone(), &self.env, Payload::default(), self.env.now());
        let mut requester = Requester::default();
        requester.issue(&mut session, request, self.env.now())?;

        loop {
            let exit = connection.drive(&mut session, &mut requester, &self.env, pending::<Infallible>()).await?;
            let attempt = match exit {
                Exit::Finished => return Ok(requester.outcome),
                Exit::Abandoned(reason) => return Err(NodeError::Abandoned(reason)),
                Exit::Reconnect { attempt } => attempt,
                Exit::TransportLost => self.next_attempt(&mut session, Vec::new()).await?,
                Exit::Interrupted(never) => match never {},
            };
            connection = self.reconnect(&mut session, attempt).await?;
            requester.outcome.reconnections += 1;
        }
    }

    async fn reconnect(&self, session: &mut Session, mut attempt: u32) -> Result<Connection<T::Stream>> {
        loop {
            match self.transport.connect(self.remote).await {
                Ok(stream) => {
                    tracing::info!(attempt, "transport re-established");
                    session.transport_established(self.env.now())?;
                    return Ok(Connection::new(stream));
                },
                Err(err) => {
                    tracing::warn!(attempt, %err, "reconnection attempt failed");
                    let actions = session.reconnect_failed(self.env.now());
                    attempt = self.next_attempt(session, actions).await?;
                },
            }
        }
    }

    /// Tick the disconnected session until it asks for another attempt.
    async fn next_attempt(&self, session: &mut Session, mut actions: Vec<SessionAction>) -> Result<u32> {
        loop {
            for action in actions {
                match action {
                    SessionAction::Reconnect { attempt } => return Ok(attempt),
                    SessionAction::Abandoned { reason } => return Err(NodeError::Abandoned(reason)),
                    _ => {},
                }
            }
            self.env.sleep(TICK_INTERVAL).await;
            actions = session.tick(self.env.now());
        }
    }
}
