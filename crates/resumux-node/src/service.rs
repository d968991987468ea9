//! Responder side: built-in routes and request dispatch.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use resumux_core::{InteractionModel, Session, SessionError, StreamEvent, stream::Stream};
use resumux_proto::{ErrorBody, ErrorCode, Payload, StreamId};

use crate::{
    driver::Application,
    error::Result,
    outbox::Outboxes,
    routes::{RouteError, RouteTable},
};

/// Captured route segments by name.
pub type Captures = HashMap<String, String>;

/// Largest stream `count.{n}` will produce.
pub const MAX_COUNT: u32 = 100_000;

/// Demand a channel responder keeps outstanding towards the requester.
///
/// Topped back up once half of it has been used.
pub const CHANNEL_WINDOW: u32 = 256;

/// What a route does, by interaction model.
#[derive(Debug, Clone, Copy)]
pub enum Handler {
    /// Answer with exactly one payload
    RequestResponse(fn(&Payload, &Captures) -> std::result::Result<Payload, ErrorBody>),
    /// Consume the payload
    FireAndForget(fn(&Payload, &Captures)),
    /// Produce a finite stream of payloads
    RequestStream(fn(&Payload, &Captures) -> std::result::Result<Vec<Payload>, ErrorBody>),
    /// Map every inbound item to one outbound item
    RequestChannel(fn(&Payload) -> Payload),
}

impl Handler {
    /// Interaction model this handler serves.
    pub fn model(&self) -> InteractionModel {
        match self {
            Self::RequestResponse(_) => InteractionModel::RequestResponse,
            Self::FireAndForget(_) => InteractionModel::FireAndForget,
            Self::RequestStream(_) => InteractionModel::RequestStream,
            Self::RequestChannel(_) => InteractionModel::RequestChannel,
        }
    }
}

fn echo(payload: &Payload, _: &Captures) -> std::result::Result<Payload, ErrorBody> {
    Ok(Payload::new(payload.data.clone()))
}

fn log(payload: &Payload, _: &Captures) {
    tracing::info!(data = %String::from_utf8_lossy(&payload.data), "log");
}

fn count(_: &Payload, captures: &Captures) -> std::result::Result<Vec<Payload>, ErrorBody> {
    let n = captures
        .get("n")
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|n| *n <= MAX_COUNT)
        .ok_or_else(|| ErrorBody::new(ErrorCode::Invalid, format!("count must be a number up to {MAX_COUNT}")))?;
    Ok((0..n).map(|i| Payload::new(i.to_string())).collect())
}

fn upper(payload: &Payload) -> Payload {
    Payload::new(String::from_utf8_lossy(&payload.data).to_uppercase())
}

/// Routes every node serves.
///
/// - `echo`: request-response, answers with the request data
/// - `log`: fire-and-forget, logs the data
/// - `count.{n}`: request-stream of `"0"` to `"n-1"`
/// - `upper`: channel, upper-cases each item
pub fn builtin_routes() -> std::result::Result<RouteTable<Handler>, RouteError> {
    RouteTable::builder()
        .route("echo", Handler::RequestResponse(echo))
        .route("log", Handler::FireAndForget(log))
        .route("count.{n}", Handler::RequestStream(count))
        .route("upper", Handler::RequestChannel(upper))
        .build()
}

/// Serves peer requests from a route table.
///
/// Lives as long as its session: a parked session keeps its responder so
/// streams in progress continue after resumption.
#[derive(Debug)]
pub struct Responder {
    routes: Arc<RouteTable<Handler>>,
    outboxes: Outboxes,
    channels: HashMap<StreamId, fn(&Payload) -> Payload>,
}

impl Responder {
    /// Responder for `routes`.
    pub fn new(routes: Arc<RouteTable<Handler>>) -> Self {
        Self { routes, outboxes: Outboxes::new(), channels: HashMap::new() }
    }

    fn on_request(
        &mut self,
        session: &mut Session,
        stream_id: StreamId,
        model: InteractionModel,
        payload: &Payload,
        complete: bool,
    ) -> std::result::Result<(), SessionError> {
        let route = payload.metadata.as_ref().map(|raw| String::from_utf8_lossy(raw).into_owned()).unwrap_or_default();

        let Some(resolved) = self.routes.resolve(&route) else {
            tracing::warn!(stream_id, %route, "no route");
            return refuse(session, stream_id, model, ErrorBody::new(ErrorCode::Invalid, format!("no route {route:?}")));
        };
        if resolved.handler.model() != model {
            tracing::warn!(stream_id, %route, ?model, "route serves a different interaction model");
            let error = ErrorBody::new(ErrorCode::Invalid, format!("{route:?} does not serve {model:?}"));
            return refuse(session, stream_id, model, error);
        }
        tracing::debug!(stream_id, %route, ?model, "dispatching request");

        match *resolved.handler {
            Handler::RequestResponse(handler) => match handler(payload, &resolved.captures) {
                Ok(response) => session.send(stream_id, response, true),
                Err(error) => session.fail(stream_id, error),
            },
            Handler::FireAndForget(handler) => {
                handler(payload, &resolved.captures);
                Ok(())
            },
            Handler::RequestStream(handler) => match handler(payload, &resolved.captures) {
                Ok(items) => {
                    for item in items {
                        self.outboxes.push(stream_id, item);
                    }
                    self.outboxes.finish(stream_id);
                    self.outboxes.flush(session, stream_id)
                },
                Err(error) => session.fail(stream_id, error),
            },
            Handler::RequestChannel(handler) => {
                self.outboxes.push(stream_id, handler(payload));
                if complete {
                    self.outboxes.finish(stream_id);
                } else {
                    self.channels.insert(stream_id, handler);
                    session.request_n(stream_id, CHANNEL_WINDOW)?;
                }
                self.outboxes.flush(session, stream_id)
            },
        }
    }
}

fn refuse(
    session: &mut Session,
    stream_id: StreamId,
    model: InteractionModel,
    error: ErrorBody,
) -> std::result::Result<(), SessionError> {
    if model == InteractionModel::FireAndForget {
        return Ok(());
    }
    session.fail(stream_id, error)
}

/// Grant the channel requester more items once half the window is used.
fn replenish(session: &mut Session, stream_id: StreamId) -> std::result::Result<(), SessionError> {
    let outstanding = session
        .stream(stream_id)
        .filter(|stream| !stream.is_remote_complete() && !stream.is_terminal())
        .map(Stream::inbound_demand);
    if let Some(outstanding) = outstanding
        && outstanding <= CHANNEL_WINDOW / 2
    {
        tracing::trace!(stream_id, outstanding, "replenishing channel demand");
        session.request_n(stream_id, CHANNEL_WINDOW - outstanding)?;
    }
    Ok(())
}

impl Application for Responder {
    fn on_event(&mut self, session: &mut Session, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Request { stream_id, model, payload, complete, .. } => {
                self.on_request(session, stream_id, model, &payload, complete)?;
            },
            StreamEvent::Next { stream_id, payload } => {
                if let Some(handler) = self.channels.get(&stream_id) {
                    self.outboxes.push(stream_id, handler(&payload));
                    self.outboxes.flush(session, stream_id)?;
                    replenish(session, stream_id)?;
                }
            },
            StreamEvent::Complete { stream_id } => {
                if self.channels.remove(&stream_id).is_some() {
                    self.outboxes.finish(stream_id);
                    self.outboxes.flush(session, stream_id)?;
                }
            },
            StreamEvent::Demand { stream_id, .. } => self.outboxes.flush(session, stream_id)?,
            StreamEvent::Cancelled { stream_id } | StreamEvent::Error { stream_id, .. } => {
                self.channels.remove(&stream_id);
                self.outboxes.discard(stream_id);
            },
        }
        Ok(())
    }
}

/// Route metadata for a request.
pub fn route_metadata(route: &str) -> Bytes {
    Bytes::copy_from_slice(route.as_bytes())
}
