//! One resumable session: the connection-owning context.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no stored clock)
//! - Inbound frames go through [`Session::handle_frame`], timers through
//!   [`Session::tick`]
//! - Outbound frames are pulled one at a time with [`Session::poll_outbound`]
//! - Everything else the driver must do comes back as [`SessionAction`]s
//!
//! # Lifecycle
//!
//! 1. **Client**: [`Session::connect`] queues SETUP (and a first LEASE when
//!    leasing is on). **Server**: [`Session::accept`] builds the session from
//!    the client's SETUP.
//! 2. Streams are opened with the request methods, each gated by the lease
//!    the peer granted.
//! 3. On transport loss ([`Session::transport_lost`]) the session keeps its
//!    streams. Frames produced meanwhile are parked in the resume buffer. The
//!    client is told when to reconnect; once a new transport is up
//!    ([`Session::transport_established`]) it sends RESUME, the server answers
//!    RESUME_OK, and both replay what the other missed.
//! 4. If the resume window elapses, the handshake fails, or the peer breaks
//!    the protocol, the session is abandoned: every live stream errors with
//!    "connection lost" and only final connection frames are still flushed.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::Bytes;
use resumux_proto::{
    Body, ErrorBody, ErrorCode, Frame, Keepalive, Payload, Position, Setup, StreamId,
};

use crate::{
    KeepaliveConfig, Role, SessionConfig,
    config::duration_to_wire_millis,
    env::Environment,
    error::{ProtocolViolation, SessionError, StreamError},
    lease::LeaseLedger,
    multiplexer::Multiplexer,
    resume::{ResumeController, ResumePoll, ResumeState},
    stream::{InteractionModel, Stream, StreamEvent},
};

/// Actions returned by the session state machine.
///
/// The driver executes these:
/// - `Deliver`: hand the event to the application
/// - `Reconnect`: open a new transport, then call
///   [`Session::transport_established`] or [`Session::reconnect_failed`]
/// - `Resumed`: informational, the session is whole again
/// - `Close`: drop the current transport (the session itself lives on)
/// - `Abandoned`: flush remaining frames, drop the transport and the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Stream event for the application
    Deliver(StreamEvent),

    /// Try to open a new transport (client only)
    Reconnect {
        /// 1-based attempt number within the current resume window
        attempt: u32,
    },

    /// Resume handshake completed
    Resumed {
        /// Frames replayed to the peer
        replayed: usize,
    },

    /// Close the current transport
    Close {
        /// Why
        reason: String,
    },

    /// Session destroyed
    Abandoned {
        /// Why
        reason: String,
    },
}

/// A multiplexed session over one (replaceable) transport.
#[derive(Debug)]
pub struct Session {
    role: Role,
    keepalive: KeepaliveConfig,
    mux: Multiplexer,
    resume: ResumeController,
    replay: VecDeque<Frame>,
    last_received: Instant,
    last_keepalive_sent: Instant,
}

impl Session {
    /// Start a client session: queues SETUP as the first frame.
    pub fn connect<E: Environment>(mut config: SessionConfig, env: &E, setup_payload: Payload, now: Instant) -> Self {
        config.role = Role::Client;
        let token = config.resume.enabled.then(|| env.resume_token());
        let leases = config.lease.clone().map_or_else(LeaseLedger::disabled, LeaseLedger::enabled);

        let setup = Setup {
            keepalive_interval_ms: duration_to_wire_millis(config.keepalive.interval),
            max_lifetime_ms: duration_to_wire_millis(config.keepalive.max_lifetime),
            lease: leases.is_enabled(),
            resume_token: token.clone(),
            data_mime: config.data_mime.clone(),
            metadata_mime: config.metadata_mime.clone(),
            payload: setup_payload,
        };

        tracing::info!(lease = setup.lease, resume = setup.resume_enabled(), "client session created");

        let mut session = Self::new(Role::Client, config, token, leases, now);
        session.mux.enqueue_connection(Frame::connection(Body::Setup(setup)));
        session.issue_lease(now);
        session
    }

    /// Start a server session from the client's SETUP.
    ///
    /// Leasing follows the SETUP flag (issuing per `config.lease`, or the
    /// defaults); keepalive timing is adopted from SETUP. A client asking for
    /// resumption from a server that has it disabled is refused with
    /// `UNSUPPORTED_SETUP`.
    pub fn accept(setup: &Setup, mut config: SessionConfig, now: Instant) -> Result<Self, SessionError> {
        if setup.resume_enabled() && !config.resume.enabled {
            return Err(SessionError::SetupRejected(ErrorBody::new(
                ErrorCode::UnsupportedSetup,
                "resume is not supported",
            )));
        }
        if setup.keepalive_interval_ms == 0 || setup.max_lifetime_ms == 0 {
            return Err(SessionError::SetupRejected(ErrorBody::new(
                ErrorCode::InvalidSetup,
                "keepalive interval and max lifetime must be positive",
            )));
        }

        config.role = Role::Server;
        config.keepalive = KeepaliveConfig {
            interval: Duration::from_millis(u64::from(setup.keepalive_interval_ms)),
            max_lifetime: Duration::from_millis(u64::from(setup.max_lifetime_ms)),
        };
        let leases = if setup.lease {
            LeaseLedger::enabled(config.lease.clone().unwrap_or_default())
        } else {
            LeaseLedger::disabled()
        };

        tracing::info!(lease = setup.lease, resume = setup.resume_enabled(), "server session accepted");

        let mut session = Self::new(Role::Server, config, setup.resume_token.clone(), leases, now);
        session.issue_lease(now);
        Ok(session)
    }

    fn new(role: Role, config: SessionConfig, token: Option<Bytes>, leases: LeaseLedger, now: Instant) -> Self {
        Self {
            role,
            keepalive: config.keepalive,
            mux: Multiplexer::new(role),
            resume: ResumeController::new(config.resume, role, token, leases),
            replay: VecDeque::new(),
            last_received: now,
            last_keepalive_sent: now,
        }
    }

    /// Client or server.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Resume state.
    pub fn state(&self) -> ResumeState {
        self.resume.state()
    }

    /// Whether the session is gone.
    pub fn is_abandoned(&self) -> bool {
        self.resume.state() == ResumeState::Abandoned
    }

    /// Resume token, if resumption is enabled.
    pub fn resume_token(&self) -> Option<&Bytes> {
        self.resume.token()
    }

    /// Position of the last resumable frame sent or parked.
    pub fn outbound_position(&self) -> Position {
        self.resume.outbound_position()
    }

    /// Position of the last resumable frame accepted.
    pub fn inbound_position(&self) -> Position {
        self.resume.inbound_position()
    }

    /// Frames held for replay that the peer has not acknowledged.
    pub fn retained(&self) -> usize {
        self.resume.buffer().len()
    }

    /// Lease ledger.
    pub fn leases(&self) -> &LeaseLedger {
        self.resume.leases()
    }

    /// Stream `id`, if it is still in the table.
    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.mux.stream(id)
    }

    /// Number of live streams.
    pub fn active_streams(&self) -> usize {
        self.mux.active_streams()
    }

    /// Keepalive timing in force.
    pub fn keepalive(&self) -> &KeepaliveConfig {
        &self.keepalive
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.is_abandoned() {
            return Err(SessionError::InvalidState { state: self.state(), operation });
        }
        Ok(())
    }

    fn open(
        &mut self,
        model: InteractionModel,
        payload: Payload,
        initial_n: u32,
        complete: bool,
        now: Instant,
    ) -> Result<StreamId, SessionError> {
        self.ensure_alive("open stream")?;
        if model.has_demand() && initial_n == 0 {
            return Err(StreamError::InvalidDemand.into());
        }
        if let Err(err) = self.resume.leases().admit(now) {
            tracing::warn!(?model, reason = %err, "request refused locally");
            return Err(err.into());
        }
        let id = self.mux.open(model, payload, initial_n, complete)?;
        self.park();
        Ok(id)
    }

    /// Open a request-response stream.
    pub fn request_response(&mut self, payload: Payload, now: Instant) -> Result<StreamId, SessionError> {
        self.open(InteractionModel::RequestResponse, payload, 0, false, now)
    }

    /// Send a fire-and-forget request.
    pub fn fire_and_forget(&mut self, payload: Payload, now: Instant) -> Result<StreamId, SessionError> {
        self.open(InteractionModel::FireAndForget, payload, 0, false, now)
    }

    /// Open a request-stream granting `initial_n` items.
    pub fn request_stream(
        &mut self,
        payload: Payload,
        initial_n: u32,
        now: Instant,
    ) -> Result<StreamId, SessionError> {
        self.open(InteractionModel::RequestStream, payload, initial_n, false, now)
    }

    /// Open a request-channel with `payload` as the first item, granting the
    /// responder `initial_n` items.
    pub fn request_channel(
        &mut self,
        payload: Payload,
        initial_n: u32,
        complete: bool,
        now: Instant,
    ) -> Result<StreamId, SessionError> {
        self.open(InteractionModel::RequestChannel, payload, initial_n, complete, now)
    }

    /// Emit a data item on `id`, optionally finishing our direction.
    pub fn send(&mut self, id: StreamId, payload: Payload, complete: bool) -> Result<(), SessionError> {
        self.ensure_alive("send")?;
        self.mux.send_payload(id, Some(payload), complete)?;
        self.park();
        Ok(())
    }

    /// Finish our direction of `id` without a data item.
    pub fn complete(&mut self, id: StreamId) -> Result<(), SessionError> {
        self.ensure_alive("complete")?;
        self.mux.send_payload(id, None, true)?;
        self.park();
        Ok(())
    }

    /// Grant the peer `n` more items on `id`.
    pub fn request_n(&mut self, id: StreamId, n: u32) -> Result<(), SessionError> {
        self.ensure_alive("request_n")?;
        self.mux.request_n(id, n)?;
        self.park();
        Ok(())
    }

    /// Cancel `id`. Cancelling a finished stream is a no-op.
    pub fn cancel(&mut self, id: StreamId) -> Result<(), SessionError> {
        self.ensure_alive("cancel")?;
        self.mux.cancel(id)?;
        self.park();
        Ok(())
    }

    /// Fail `id` with an error sent to the peer.
    pub fn fail(&mut self, id: StreamId, error: ErrorBody) -> Result<(), SessionError> {
        self.ensure_alive("fail")?;
        self.mux.fail(id, error)?;
        self.park();
        Ok(())
    }

    /// While the transport is down, move queued stream frames into the
    /// resume buffer so they are replayed once the session resumes.
    fn park(&mut self) {
        if self.resume.is_operational() || self.resume.is_handshaking() || self.is_abandoned() {
            return;
        }
        while let Some(frame) = self.mux.poll_stream_frame() {
            let frame = self.resume.record_outbound(frame);
            tracing::trace!(stream_id = frame.stream_id, position = frame.position, "parked frame");
        }
    }

    fn issue_lease(&mut self, now: Instant) {
        if let Some(frame) = self.resume.leases_mut().poll_issue(now) {
            self.mux.enqueue_connection(frame);
        }
    }

    /// Apply a frame received from the peer.
    ///
    /// Protocol violations do not return `Err`: the session queues
    /// `ERROR(0, CONNECTION_ERROR)`, abandons itself and reports it through
    /// the returned actions.
    pub fn handle_frame(&mut self, frame: Frame, now: Instant) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_alive("handle_frame")?;
        self.last_received = now;

        let result =
            if frame.stream_id == 0 { self.handle_connection_frame(frame, now) } else { self.handle_stream_frame(&frame, now) };

        Ok(result.unwrap_or_else(|violation| self.protocol_failure(&violation)))
    }

    fn handle_stream_frame(&mut self, frame: &Frame, now: Instant) -> Result<Vec<SessionAction>, ProtocolViolation> {
        if !self.resume.is_operational() {
            return Err(ProtocolViolation::UnexpectedFrame {
                stream_id: frame.stream_id,
                frame_type: frame.frame_type(),
                reason: "stream frame before resume completed",
            });
        }
        if !self.resume.record_inbound(frame)? {
            return Ok(Vec::new());
        }

        if frame.frame_type().is_request()
            && let Err(err) = self.resume.leases_mut().admit_peer_request(now)
        {
            self.mux.reject_request(frame.stream_id, ErrorBody::new(ErrorCode::Rejected, err.to_string()))?;
            return Ok(Vec::new());
        }

        let events = self.mux.route(frame)?;
        Ok(events.into_iter().map(SessionAction::Deliver).collect())
    }

    fn handle_connection_frame(&mut self, frame: Frame, now: Instant) -> Result<Vec<SessionAction>, ProtocolViolation> {
        match frame.body {
            Body::Lease(lease) => {
                self.resume.leases_mut().on_lease_frame(&lease, now);
                Ok(Vec::new())
            },
            Body::Keepalive(keepalive) => {
                self.resume.acknowledge(keepalive.last_received_position);
                if keepalive.respond {
                    self.mux.enqueue_connection(Frame::connection(Body::Keepalive(Keepalive {
                        respond: false,
                        last_received_position: self.resume.inbound_position(),
                    })));
                }
                Ok(Vec::new())
            },
            Body::Resume(resume) if self.role == Role::Server => {
                if self.resume.is_operational() {
                    // Old transport is half-open; the client already moved on.
                    self.resume.transport_lost(now);
                }
                self.mux.clear_connection_queue();
                self.replay.clear();

                match self.resume.on_resume(&resume) {
                    Ok((ok, replay)) => {
                        self.mux.enqueue_connection(ok);
                        Ok(self.resumed(replay, now))
                    },
                    Err(err) => {
                        tracing::warn!(reason = %err, "rejecting resume");
                        let error = ErrorBody::new(ErrorCode::RejectedResume, err.to_string());
                        Ok(self.fail_session(error, err.to_string()))
                    },
                }
            },
            Body::ResumeOk(ok) if self.role == Role::Client && self.resume.is_handshaking() => {
                match self.resume.on_resume_ok(&ok) {
                    Ok(replay) => Ok(self.resumed(replay, now)),
                    Err(err) => {
                        tracing::warn!(reason = %err, "server position cannot be reconciled");
                        let error = ErrorBody::new(ErrorCode::ConnectionError, err.to_string());
                        Ok(self.fail_session(error, err.to_string()))
                    },
                }
            },
            Body::Error(error) => {
                tracing::warn!(code = ?error.code, message = %error.message, "peer closed the session");
                Ok(self.abandon(format!("peer error {:?}: {}", error.code, error.message)))
            },
            body => Err(ProtocolViolation::UnexpectedConnectionFrame(body.frame_type())),
        }
    }

    fn resumed(&mut self, replay: Vec<Frame>, now: Instant) -> Vec<SessionAction> {
        let replayed = replay.len();
        self.replay = replay.into();
        self.last_received = now;
        self.last_keepalive_sent = now;
        self.issue_lease(now);
        vec![SessionAction::Resumed { replayed }]
    }

    fn protocol_failure(&mut self, violation: &ProtocolViolation) -> Vec<SessionAction> {
        tracing::warn!(%violation, "protocol violation");
        let error = ErrorBody::new(ErrorCode::ConnectionError, violation.to_string());
        self.fail_session(error, violation.to_string())
    }

    /// Abandon, then queue a final connection ERROR for the peer.
    fn fail_session(&mut self, error: ErrorBody, reason: String) -> Vec<SessionAction> {
        let actions = self.abandon(reason);
        self.mux.enqueue_connection(Frame::connection(Body::Error(error)));
        actions
    }

    fn abandon(&mut self, reason: String) -> Vec<SessionAction> {
        let mut actions: Vec<SessionAction> = self.mux.abandon_all().into_iter().map(SessionAction::Deliver).collect();
        self.replay.clear();
        self.resume.abandon();
        actions.push(SessionAction::Abandoned { reason });
        actions
    }

    /// Advance timers: keepalive, lifetime, lease re-issue, reconnection.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.is_abandoned() {
            return Vec::new();
        }

        if self.resume.is_operational() {
            if now.saturating_duration_since(self.last_received) >= self.keepalive.max_lifetime {
                tracing::warn!(max_lifetime_ms = self.keepalive.max_lifetime.as_millis() as u64, "peer silent");
                let mut actions = vec![SessionAction::Close { reason: "keepalive timeout".to_string() }];
                actions.extend(self.transport_lost(now));
                return actions;
            }

            if self.role == Role::Client
                && now.saturating_duration_since(self.last_keepalive_sent) >= self.keepalive.interval
            {
                self.mux.enqueue_connection(Frame::connection(Body::Keepalive(Keepalive {
                    respond: true,
                    last_received_position: self.resume.inbound_position(),
                })));
                self.last_keepalive_sent = now;
            }

            self.issue_lease(now);
            return Vec::new();
        }

        match self.resume.poll(now) {
            ResumePoll::Idle => Vec::new(),
            ResumePoll::Reconnect { attempt } => vec![SessionAction::Reconnect { attempt }],
            ResumePoll::Abandon(err) => self.abandon(err.to_string()),
        }
    }

    /// The transport carrying this session went away.
    ///
    /// Without resumption the session is abandoned on the spot. Otherwise it
    /// is retained, and a client is told to reconnect right away.
    pub fn transport_lost(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.is_abandoned() {
            return Vec::new();
        }
        if !self.resume.is_enabled() {
            return self.abandon("transport lost".to_string());
        }

        self.resume.transport_lost(now);
        self.mux.clear_connection_queue();
        self.replay.clear();
        self.park();
        self.tick(now)
    }

    /// A new transport is up after [`SessionAction::Reconnect`] (client):
    /// queues RESUME as its first frame.
    pub fn transport_established(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.role != Role::Client || self.resume.state() != ResumeState::Reconnecting {
            return Err(SessionError::InvalidState { state: self.state(), operation: "transport_established" });
        }
        self.mux.clear_connection_queue();
        let resume = self.resume.begin_handshake()?;
        self.mux.enqueue_connection(resume);
        self.last_received = now;
        self.last_keepalive_sent = now;
        Ok(())
    }

    /// The reconnection attempt failed at the transport level.
    pub fn reconnect_failed(&mut self, now: Instant) -> Vec<SessionAction> {
        self.resume.reconnect_failed();
        self.tick(now)
    }

    /// Close the session cleanly: `ERROR(0, CONNECTION_CLOSE)` then abandon.
    pub fn close(&mut self) -> Vec<SessionAction> {
        if self.is_abandoned() {
            return Vec::new();
        }
        let error = ErrorBody::new(ErrorCode::ConnectionClose, "session closed");
        self.fail_session(error, "closed locally".to_string())
    }

    /// Next frame for the single writer.
    ///
    /// Connection frames go first, then frames being replayed after a
    /// resume, then stream frames in round-robin order. Stream frames are
    /// stamped with their position here. While the transport is down nothing
    /// comes out; once abandoned only final connection frames do.
    pub fn poll_outbound(&mut self) -> Option<Frame> {
        if self.is_abandoned() || self.resume.is_handshaking() {
            return self.mux.pop_connection();
        }
        if !self.resume.is_operational() {
            return None;
        }

        if let Some(frame) = self.mux.pop_connection() {
            return Some(frame);
        }
        if let Some(frame) = self.replay.pop_front() {
            return Some(frame);
        }
        let frame = self.mux.poll_stream_frame()?;
        Some(self.resume.record_outbound(frame))
    }

    /// Whether [`Self::poll_outbound`] would yield a frame.
    pub fn has_outbound(&self) -> bool {
        if self.is_abandoned() || self.resume.is_handshaking() {
            return self.mux.has_connection_frames();
        }
        self.resume.is_operational() && (self.mux.has_pending() || !self.replay.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdmissionError, LeaseConfig, env::SystemEnv, stream::StreamState};

    fn leased_client() -> SessionConfig {
        SessionConfig { lease: Some(LeaseConfig::default()), ..SessionConfig::client() }
    }

    fn outbound(session: &mut Session) -> Vec<Frame> {
        std::iter::from_fn(|| session.poll_outbound()).collect()
    }

    /// Deliver everything `from` has queued to `to`, returning `to`'s actions.
    fn pump(from: &mut Session, to: &mut Session, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for frame in outbound(from) {
            actions.extend(to.handle_frame(frame, now).unwrap());
        }
        actions
    }

    fn handshake(config: SessionConfig, now: Instant) -> (Session, Session) {
        let mut client = Session::connect(config, &SystemEnv, Payload::new("Client-123"), now);
        let frames = outbound(&mut client);
        let Body::Setup(setup) = &frames[0].body else { panic!("SETUP must go first") };
        let mut server = Session::accept(setup, SessionConfig::server(), now).unwrap();
        for frame in frames.into_iter().skip(1) {
            server.handle_frame(frame, now).unwrap();
        }
        pump(&mut server, &mut client, now);
        (client, server)
    }

    #[test]
    fn setup_goes_first_then_lease() {
        let now = Instant::now();
        let mut client = Session::connect(leased_client(), &SystemEnv, Payload::new("Client-123"), now);
        let types: Vec<_> = outbound(&mut client).iter().map(Frame::frame_type).collect();
        assert_eq!(types, vec![resumux_proto::FrameType::Setup, resumux_proto::FrameType::Lease]);
    }

    #[test]
    fn server_refuses_resume_it_does_not_support() {
        let now = Instant::now();
        let mut client = Session::connect(SessionConfig::client(), &SystemEnv, Payload::default(), now);
        let Some(Frame { body: Body::Setup(setup), .. }) = client.poll_outbound() else { panic!("expected SETUP") };

        let mut config = SessionConfig::server();
        config.resume.enabled = false;
        let err = Session::accept(&setup, config, now).unwrap_err();
        assert!(matches!(err, SessionError::SetupRejected(ErrorBody { code: ErrorCode::UnsupportedSetup, .. })));
    }

    #[test]
    fn request_without_lease_is_refused_locally() {
        let now = Instant::now();
        let mut client = Session::connect(leased_client(), &SystemEnv, Payload::default(), now);
        let err = client.request_response(Payload::new("ping"), now).unwrap_err();
        assert!(matches!(err, SessionError::Admission(AdmissionError::NoLease)));
        assert_eq!(client.active_streams(), 0);
    }

    #[test]
    fn leased_request_response_round_trip() {
        let now = Instant::now();
        let (mut client, mut server) = handshake(leased_client(), now);
        assert_eq!(client.leases().receiver().remaining(), 5);

        let id = client.request_response(Payload::new("ping"), now).unwrap();
        let actions = pump(&mut client, &mut server, now);
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Deliver(StreamEvent::Request { model: InteractionModel::RequestResponse, .. })]
        ));

        server.send(id, Payload::new("pong"), true).unwrap();
        let actions = pump(&mut server, &mut client, now);
        assert_eq!(actions, vec![
            SessionAction::Deliver(StreamEvent::Next { stream_id: id, payload: Payload::new("pong") }),
            SessionAction::Deliver(StreamEvent::Complete { stream_id: id }),
        ]);
        assert_eq!(client.active_streams(), 0);
        assert_eq!(server.active_streams(), 0);
    }

    #[test]
    fn request_beyond_issued_lease_is_rejected_by_responder() {
        let now = Instant::now();
        let (_client, mut server) = handshake(leased_client(), now);

        // Forge a request the client's gate would have refused.
        let forged = Frame { stream_id: 1, position: 1, body: Body::RequestFnf(Payload::new("x")) };
        for id in 0..5u32 {
            let frame = Frame { stream_id: 1 + id * 2, position: u64::from(id) + 1, ..forged.clone() };
            server.handle_frame(frame, now).unwrap();
        }
        let sixth = Frame { stream_id: 11, position: 6, ..forged };
        assert!(server.handle_frame(sixth, now).unwrap().is_empty());

        let errors: Vec<_> = outbound(&mut server)
            .into_iter()
            .filter(|frame| matches!(&frame.body, Body::Error(e) if e.code == ErrorCode::Rejected))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stream_id, 11);
    }

    #[test]
    fn violation_sends_connection_error_and_abandons() {
        let now = Instant::now();
        let (mut client, _server) = handshake(SessionConfig::client(), now);
        let id = client.request_stream(Payload::new("q"), 1, now).unwrap();
        outbound(&mut client);

        let bogus = Frame { stream_id: 7, position: 1, body: Body::Payload { data: None, complete: true } };
        let actions = client.handle_frame(bogus, now).unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], SessionAction::Deliver(StreamEvent::Error { stream_id, .. }) if *stream_id == id));
        assert!(matches!(&actions[1], SessionAction::Abandoned { .. }));

        let last = outbound(&mut client);
        assert!(matches!(
            last.as_slice(),
            [Frame { stream_id: 0, body: Body::Error(ErrorBody { code: ErrorCode::ConnectionError, .. }), .. }]
        ));
        assert!(client.request_response(Payload::new("x"), now).is_err());
    }

    #[test]
    fn keepalive_acknowledges_buffered_frames() {
        let t0 = Instant::now();
        let (mut client, mut server) = handshake(SessionConfig::client(), t0);
        for n in 0..3u8 {
            client.fire_and_forget(Payload::new(vec![n]), t0).unwrap();
        }
        pump(&mut client, &mut server, t0);
        assert_eq!(client.resume.buffer().len(), 3);

        let t1 = t0 + client.keepalive().interval;
        assert!(client.tick(t1).is_empty());
        pump(&mut client, &mut server, t1);
        pump(&mut server, &mut client, t1);
        assert!(client.resume.buffer().is_empty());
    }

    #[test]
    fn silent_peer_closes_transport_and_starts_reconnecting() {
        let t0 = Instant::now();
        let (mut client, _server) = handshake(SessionConfig::client(), t0);

        let actions = client.tick(t0 + Duration::from_secs(60));
        assert_eq!(actions, vec![
            SessionAction::Close { reason: "keepalive timeout".to_string() },
            SessionAction::Reconnect { attempt: 1 },
        ]);
        assert_eq!(client.state(), ResumeState::Reconnecting);
    }

    #[test]
    fn transport_loss_without_resume_abandons() {
        let now = Instant::now();
        let mut config = SessionConfig::client();
        config.resume.enabled = false;
        let (mut client, _server) = handshake(config, now);
        let id = client.request_response(Payload::new("q"), now).unwrap();

        let actions = client.transport_lost(now);
        assert!(matches!(&actions[0], SessionAction::Deliver(StreamEvent::Error { stream_id, .. }) if *stream_id == id));
        assert!(client.is_abandoned());
    }

    #[test]
    fn frames_produced_while_disconnected_are_parked() {
        let now = Instant::now();
        let (mut client, _server) = handshake(SessionConfig::client(), now);
        client.transport_lost(now);

        let id = client.request_stream(Payload::new("q"), 2, now).unwrap();
        assert!(client.poll_outbound().is_none());
        assert_eq!(client.outbound_position(), 1);
        assert_eq!(client.stream(id).map(Stream::state), Some(StreamState::Active));
    }

    #[test]
    fn transport_established_only_after_reconnect_action() {
        let now = Instant::now();
        let (mut client, mut server) = handshake(SessionConfig::client(), now);
        assert!(client.transport_established(now).is_err());
        assert!(server.transport_established(now).is_err());
    }
}
