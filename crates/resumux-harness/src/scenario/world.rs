//! World state for scenario execution.
//!
//! The World owns one client and (after SETUP) one server session and moves
//! frames between them through the real codec. The link can be cut, frames
//! in flight can be lost, and the network can be partitioned so reconnection
//! attempts fail.

use std::{collections::VecDeque, time::Duration};

use bytes::BytesMut;
use resumux_core::{Session, SessionAction, SessionConfig, SessionError, StreamEvent, env::Environment};
use resumux_proto::{Body, ErrorBody, Frame, FrameType, Payload, Position, StreamId};

use crate::SimEnv;

/// Upper bound on flush/deliver rounds before the world is declared stuck.
const MAX_ROUNDS: usize = 10_000;

/// Which actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The connecting side
    Client,
    /// The accepting side
    Server,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// Network events that occurred during scenario execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Transport cut
    Disconnect,
    /// Frames lost with the transport
    DroppedInFlight {
        /// Frames headed to the server
        to_server: usize,
        /// Frames headed to the client
        to_client: usize,
    },
    /// Reconnection attempts will fail
    Partition,
    /// Reconnection attempts will succeed
    PartitionHealed,
    /// Reconnection attempt opened a new transport
    Reconnected {
        /// Attempt number
        attempt: u32,
    },
    /// Reconnection attempt failed
    ReconnectFailed {
        /// Attempt number
        attempt: u32,
    },
}

/// A frame as observed on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    /// Stream id
    pub stream_id: StreamId,
    /// Frame type
    pub frame_type: FrameType,
    /// Resume position
    pub position: Position,
}

/// One actor's session plus everything it produced.
#[derive(Debug)]
pub struct Peer {
    session: Session,
    events: Vec<StreamEvent>,
    actions: Vec<SessionAction>,
    received: Vec<FrameRecord>,
    frames_sent: usize,
}

impl Peer {
    fn new(session: Session) -> Self {
        Self { session, events: Vec::new(), actions: Vec::new(), received: Vec::new(), frames_sent: 0 }
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Stream events delivered so far.
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Every action the session returned so far.
    pub fn actions(&self) -> &[SessionAction] {
        &self.actions
    }

    /// Frames received so far, in arrival order.
    pub fn received(&self) -> &[FrameRecord] {
        &self.received
    }

    /// Frames written so far.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    /// Whether the session reported abandonment.
    pub fn abandoned(&self) -> bool {
        self.actions.iter().any(|action| matches!(action, SessionAction::Abandoned { .. }))
    }
}

/// World state containing both actors and the link between them.
#[derive(Debug)]
pub struct World {
    env: SimEnv,
    client: Peer,
    server: Option<Peer>,
    server_config: SessionConfig,
    setup_rejection: Option<ErrorBody>,
    to_server: BytesMut,
    to_client: BytesMut,
    link_up: bool,
    network_up: bool,
    reconnect_attempts: Vec<u32>,
    network_events: Vec<NetworkEvent>,
}

impl World {
    /// Create a world; the client has queued SETUP but nothing has moved.
    pub fn new(client_config: SessionConfig, server_config: SessionConfig, env: SimEnv, setup: Payload) -> Self {
        let session = Session::connect(client_config, &env, setup, env.now());
        Self {
            env,
            client: Peer::new(session),
            server: None,
            server_config,
            setup_rejection: None,
            to_server: BytesMut::new(),
            to_client: BytesMut::new(),
            link_up: true,
            network_up: true,
            reconnect_attempts: Vec::new(),
            network_events: Vec::new(),
        }
    }

    /// Simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Client actor.
    pub fn client(&self) -> &Peer {
        &self.client
    }

    /// Server actor, once SETUP was accepted.
    pub fn server(&self) -> Option<&Peer> {
        self.server.as_ref()
    }

    /// Actor by side.
    pub fn peer(&self, side: Side) -> Option<&Peer> {
        match side {
            Side::Client => Some(&self.client),
            Side::Server => self.server.as_ref(),
        }
    }

    fn peer_mut(&mut self, side: Side) -> Option<&mut Peer> {
        match side {
            Side::Client => Some(&mut self.client),
            Side::Server => self.server.as_mut(),
        }
    }

    /// Drive one actor's session directly, feeding the resulting actions
    /// back into the world.
    ///
    /// Returns whatever `f` returns, with session errors as strings.
    pub fn with_session<T>(
        &mut self,
        side: Side,
        f: impl FnOnce(&mut Session, std::time::Instant) -> Result<T, SessionError>,
    ) -> Result<T, String> {
        let now = self.env.now();
        let peer = self.peer_mut(side).ok_or_else(|| format!("{side:?} has no session"))?;
        f(&mut peer.session, now).map_err(|err| format!("{side:?}: {err}"))
    }

    /// Run a session operation that returns actions and feed them back into
    /// the world (e.g. `Session::close`).
    pub fn apply(
        &mut self,
        side: Side,
        f: impl FnOnce(&mut Session, std::time::Instant) -> Vec<SessionAction>,
    ) -> Result<(), String> {
        let now = self.env.now();
        let peer = self.peer_mut(side).ok_or_else(|| format!("{side:?} has no session"))?;
        let actions = f(&mut peer.session, now);
        self.process(side, actions)
    }

    /// The error the server answered SETUP with, if it refused.
    pub fn setup_rejection(&self) -> Option<&ErrorBody> {
        self.setup_rejection.as_ref()
    }

    /// Attempt numbers of every reconnection the client tried.
    pub fn reconnect_attempts(&self) -> &[u32] {
        &self.reconnect_attempts
    }

    /// All network events so far.
    pub fn network_events(&self) -> &[NetworkEvent] {
        &self.network_events
    }

    /// Whether a transport currently connects the two sides.
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Remove and return the stream events delivered to `side`.
    pub fn take_events(&mut self, side: Side) -> Vec<StreamEvent> {
        self.peer_mut(side).map(|peer| std::mem::take(&mut peer.events)).unwrap_or_default()
    }

    /// Encode everything both sessions want to write onto the link.
    ///
    /// Returns the number of frames written.
    pub fn flush(&mut self) -> Result<usize, String> {
        if !self.link_up {
            return Ok(0);
        }
        let mut written = 0;
        while let Some(frame) = self.client.session.poll_outbound() {
            frame.encode(&mut self.to_server).map_err(|err| format!("client encode: {err}"))?;
            self.client.frames_sent += 1;
            written += 1;
        }
        if let Some(server) = self.server.as_mut() {
            while let Some(frame) = server.session.poll_outbound() {
                frame.encode(&mut self.to_client).map_err(|err| format!("server encode: {err}"))?;
                server.frames_sent += 1;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Decode and hand at most `limit` frames in flight to `side`.
    ///
    /// Returns the number of frames delivered.
    pub fn deliver(&mut self, side: Side, limit: usize) -> Result<usize, String> {
        let mut delivered = 0;
        while delivered < limit {
            let buffer = match side {
                Side::Client => &mut self.to_client,
                Side::Server => &mut self.to_server,
            };
            let Some(frame) = Frame::decode(buffer).map_err(|err| format!("{side:?} decode: {err}"))? else {
                break;
            };
            delivered += 1;
            self.receive(side, frame)?;
        }
        Ok(delivered)
    }

    fn receive(&mut self, side: Side, frame: Frame) -> Result<(), String> {
        let now = self.env.now();
        let record = FrameRecord { stream_id: frame.stream_id, frame_type: frame.frame_type(), position: frame.position };

        if side == Side::Server && self.server.is_none() {
            return self.accept_setup(frame);
        }

        let Some(peer) = self.peer_mut(side) else {
            return Err(format!("{side:?} has no session"));
        };
        peer.received.push(record);
        if peer.session.is_abandoned() {
            tracing::debug!(?side, ?record, "dropping frame for abandoned session");
            return Ok(());
        }
        let actions = peer.session.handle_frame(frame, now).map_err(|err| format!("{side:?} handle_frame: {err}"))?;
        self.process(side, actions)
    }

    fn accept_setup(&mut self, frame: Frame) -> Result<(), String> {
        let Body::Setup(setup) = &frame.body else {
            return Err(format!("server expected SETUP, got {:?}", frame.frame_type()));
        };
        match Session::accept(setup, self.server_config.clone(), self.env.now()) {
            Ok(session) => {
                let mut peer = Peer::new(session);
                peer.received.push(FrameRecord { stream_id: 0, frame_type: FrameType::Setup, position: 0 });
                self.server = Some(peer);
                Ok(())
            },
            Err(SessionError::SetupRejected(error)) => {
                Frame::connection(Body::Error(error.clone()))
                    .encode(&mut self.to_client)
                    .map_err(|err| format!("server encode: {err}"))?;
                self.setup_rejection = Some(error);
                Ok(())
            },
            Err(err) => Err(format!("server accept: {err}")),
        }
    }

    /// Move frames back and forth until nothing is left to move.
    pub fn run_until_idle(&mut self) -> Result<(), String> {
        for _ in 0..MAX_ROUNDS {
            let written = self.flush()?;
            let delivered = self.deliver(Side::Server, usize::MAX)? + self.deliver(Side::Client, usize::MAX)?;
            if written == 0 && delivered == 0 {
                return Ok(());
            }
        }
        Err(format!("world did not settle within {MAX_ROUNDS} rounds"))
    }

    fn process(&mut self, side: Side, actions: Vec<SessionAction>) -> Result<(), String> {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            if let Some(peer) = self.peer_mut(side) {
                peer.actions.push(action.clone());
            }
            match action {
                SessionAction::Deliver(event) => {
                    if let Some(peer) = self.peer_mut(side) {
                        peer.events.push(event);
                    }
                },
                SessionAction::Reconnect { attempt } => {
                    queue.extend(self.reconnect(attempt)?);
                },
                SessionAction::Close { reason } => {
                    tracing::debug!(?side, %reason, "transport closed");
                    self.cut_link();
                    self.lose_transport(side.other())?;
                },
                SessionAction::Resumed { .. } | SessionAction::Abandoned { .. } => {},
            }
        }
        Ok(())
    }

    fn reconnect(&mut self, attempt: u32) -> Result<Vec<SessionAction>, String> {
        self.reconnect_attempts.push(attempt);
        let now = self.env.now();
        if self.network_up {
            self.cut_link();
            self.link_up = true;
            self.network_events.push(NetworkEvent::Reconnected { attempt });
            self.client.session.transport_established(now).map_err(|err| format!("client: {err}"))?;
            Ok(Vec::new())
        } else {
            self.network_events.push(NetworkEvent::ReconnectFailed { attempt });
            Ok(self.client.session.reconnect_failed(now))
        }
    }

    fn cut_link(&mut self) {
        let to_server = Self::count_frames(&self.to_server);
        let to_client = Self::count_frames(&self.to_client);
        if to_server + to_client > 0 {
            self.network_events.push(NetworkEvent::DroppedInFlight { to_server, to_client });
        }
        self.to_server.clear();
        self.to_client.clear();
        self.link_up = false;
    }

    fn count_frames(buffer: &BytesMut) -> usize {
        let mut copy = buffer.clone();
        std::iter::from_fn(|| Frame::decode(&mut copy).ok().flatten()).count()
    }

    fn lose_transport(&mut self, side: Side) -> Result<(), String> {
        let now = self.env.now();
        let Some(peer) = self.peer_mut(side) else {
            return Ok(());
        };
        let actions = peer.session.transport_lost(now);
        self.process(side, actions)
    }

    /// Cut the transport. Frames in flight are lost; both sides notice.
    ///
    /// The server notices first, so a client reconnecting immediately finds
    /// it waiting for RESUME.
    pub fn disconnect(&mut self) -> Result<(), String> {
        self.network_events.push(NetworkEvent::Disconnect);
        self.cut_link();
        self.lose_transport(Side::Server)?;
        self.lose_transport(Side::Client)
    }

    /// Cut the transport so that only the client notices.
    ///
    /// The server session stays operational on its half-open transport until
    /// the client's RESUME reaches it.
    pub fn half_open(&mut self) -> Result<(), String> {
        self.network_events.push(NetworkEvent::Disconnect);
        self.cut_link();
        self.lose_transport(Side::Client)
    }

    /// Make reconnection attempts fail (`false`) or succeed (`true`).
    pub fn set_network(&mut self, up: bool) {
        if up != self.network_up {
            self.network_events.push(if up { NetworkEvent::PartitionHealed } else { NetworkEvent::Partition });
        }
        self.network_up = up;
    }

    /// Advance virtual time by `duration`, ticking both sessions once at the
    /// new instant, then settle.
    pub fn advance(&mut self, duration: Duration) -> Result<(), String> {
        self.env.advance(duration);
        let now = self.env.now();
        for side in [Side::Server, Side::Client] {
            if let Some(peer) = self.peer_mut(side) {
                let actions = peer.session.tick(now);
                self.process(side, actions)?;
            }
        }
        self.run_until_idle()
    }

    /// Advance virtual time by `total` in increments of `step`.
    pub fn advance_in_steps(&mut self, total: Duration, step: Duration) -> Result<(), String> {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let next = step.min(total - elapsed);
            self.advance(next)?;
            elapsed += next;
        }
        Ok(())
    }
}
