//! Resume state machine.
//!
//! ```text
//! ┌───────────┐ transport lost ┌──────────────┐ attempt ┌──────────────┐
//! │ Connected │───────────────>│ Disconnected │────────>│ Reconnecting │
//! └───────────┘                └──────────────┘<────────└──────────────┘
//!       ^                             │          failed        │
//!       │                             │ window elapsed         │ RESUME_OK
//!       │                             v                        v
//!       │                       ┌───────────┐            ┌─────────┐
//!       └───── (new session) ───│ Abandoned │            │ Resumed │
//!                               └───────────┘            └─────────┘
//! ```
//!
//! Only the client drives reconnection: it attempts at
//! `disconnected_at + k * retry_interval` for k = 0, 1, ... while strictly
//! inside the window. The server just waits for RESUME. Either side abandons
//! once the window elapses, or immediately on a handshake failure.

use std::time::Instant;

use bytes::Bytes;
use resumux_proto::{Body, Frame, Position, Resume, ResumeOk};

use super::ResumeBuffer;
use crate::{
    ResumeConfig, Role,
    error::{ProtocolViolation, ResumeError},
    lease::LeaseLedger,
};

/// Connection state as far as resumption is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumeState {
    /// Transport up since SETUP
    Connected,
    /// Transport lost, waiting for the next attempt (or for RESUME)
    Disconnected,
    /// Reconnection attempt in progress
    Reconnecting,
    /// Transport up again after a successful resume
    Resumed,
    /// Session is gone
    Abandoned,
}

/// What [`ResumeController::poll`] wants the driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoll {
    /// Nothing to do now
    Idle,
    /// Open a new transport (client only)
    Reconnect {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Give up on the session
    Abandon(ResumeError),
}

/// Position bookkeeping, replay buffer, reconnection policy and the lease
/// ledger for one session.
#[derive(Debug)]
pub struct ResumeController {
    config: ResumeConfig,
    role: Role,
    token: Option<Bytes>,
    state: ResumeState,
    buffer: ResumeBuffer,
    inbound_position: Position,
    disconnected_at: Option<Instant>,
    attempts: u32,
    handshake_pending: bool,
    leases: LeaseLedger,
}

impl ResumeController {
    /// Controller for a session that just completed SETUP.
    ///
    /// `token` must be `Some` iff resumption was negotiated.
    pub fn new(config: ResumeConfig, role: Role, token: Option<Bytes>, leases: LeaseLedger) -> Self {
        let buffer = ResumeBuffer::new(config.buffer_capacity);
        Self {
            config,
            role,
            token,
            state: ResumeState::Connected,
            buffer,
            inbound_position: 0,
            disconnected_at: None,
            attempts: 0,
            handshake_pending: false,
            leases,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResumeState {
        self.state
    }

    /// Resume token, if resumption is enabled.
    pub fn token(&self) -> Option<&Bytes> {
        self.token.as_ref()
    }

    /// Whether this session can survive a transport loss.
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Whether frames may flow normally.
    pub fn is_operational(&self) -> bool {
        matches!(self.state, ResumeState::Connected | ResumeState::Resumed) && !self.handshake_pending
    }

    /// Whether a RESUME has been sent and RESUME_OK is awaited.
    pub fn is_handshaking(&self) -> bool {
        self.handshake_pending
    }

    /// Lease ledger.
    pub fn leases(&self) -> &LeaseLedger {
        &self.leases
    }

    /// Lease ledger, mutably.
    pub fn leases_mut(&mut self) -> &mut LeaseLedger {
        &mut self.leases
    }

    /// Position of the last resumable frame sent or parked.
    pub fn outbound_position(&self) -> Position {
        self.buffer.outbound_position()
    }

    /// Position of the last resumable frame accepted.
    pub fn inbound_position(&self) -> Position {
        self.inbound_position
    }

    /// Pending-outbound buffer.
    pub fn buffer(&self) -> &ResumeBuffer {
        &self.buffer
    }

    /// Reconnection attempts made since the current disconnect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Assign a position to an outgoing frame, retaining it for replay when
    /// resumption is enabled. Connection-level frames pass through.
    pub fn record_outbound(&mut self, frame: Frame) -> Frame {
        if !frame.is_resumable() {
            return frame;
        }
        if self.is_enabled() { self.buffer.stamp_and_retain(frame) } else { self.buffer.stamp(frame) }
    }

    /// Account for an incoming frame.
    ///
    /// Returns `false` for a replay duplicate, which must be discarded.
    pub fn record_inbound(&mut self, frame: &Frame) -> Result<bool, ProtocolViolation> {
        if !frame.is_resumable() {
            return Ok(true);
        }
        let expected = self.inbound_position + 1;
        match frame.position {
            0 => Err(ProtocolViolation::PositionGap { expected, received: 0 }),
            position if position < expected => {
                tracing::debug!(position, inbound = self.inbound_position, "discarding replayed duplicate");
                Ok(false)
            },
            position if position == expected => {
                self.inbound_position = position;
                Ok(true)
            },
            received => Err(ProtocolViolation::PositionGap { expected, received }),
        }
    }

    /// Peer acknowledged everything up to `position`.
    pub fn acknowledge(&mut self, position: Position) {
        if position > self.buffer.outbound_position() {
            tracing::warn!(position, outbound = self.buffer.outbound_position(), "acknowledgement beyond sent frames");
            return;
        }
        self.buffer.acknowledge(position);
    }

    /// Transport went away.
    ///
    /// The window runs from the first loss; losing a transport again while
    /// still inside it does not restart the clock.
    pub fn transport_lost(&mut self, now: Instant) {
        if self.state == ResumeState::Abandoned {
            return;
        }
        if self.disconnected_at.is_none() {
            tracing::info!(
                outbound = self.outbound_position(),
                inbound = self.inbound_position,
                "transport lost"
            );
            self.disconnected_at = Some(now);
            self.attempts = 0;
        }
        self.state = ResumeState::Disconnected;
        self.handshake_pending = false;
    }

    /// Advance the reconnection policy.
    pub fn poll(&mut self, now: Instant) -> ResumePoll {
        if !matches!(self.state, ResumeState::Disconnected | ResumeState::Reconnecting) {
            return ResumePoll::Idle;
        }
        let Some(disconnected_at) = self.disconnected_at else {
            return ResumePoll::Idle;
        };

        if now.saturating_duration_since(disconnected_at) >= self.config.window {
            return ResumePoll::Abandon(ResumeError::WindowElapsed(self.config.window));
        }

        if self.role == Role::Client && self.state == ResumeState::Disconnected {
            let due = disconnected_at + self.config.retry_interval * self.attempts;
            if now >= due {
                self.attempts += 1;
                self.state = ResumeState::Reconnecting;
                tracing::info!(attempt = self.attempts, "reconnecting");
                return ResumePoll::Reconnect { attempt: self.attempts };
            }
        }
        ResumePoll::Idle
    }

    /// The attempt failed at the transport level; wait for the next one.
    pub fn reconnect_failed(&mut self) {
        if self.state == ResumeState::Reconnecting {
            self.state = ResumeState::Disconnected;
            self.handshake_pending = false;
        }
    }

    /// New transport is up (client): build the RESUME frame.
    pub fn begin_handshake(&mut self) -> Result<Frame, ResumeError> {
        let token = self.token.clone().ok_or(ResumeError::Disabled)?;
        self.state = ResumeState::Reconnecting;
        self.handshake_pending = true;
        Ok(Frame::connection(Body::Resume(Resume {
            token,
            outbound_position: self.buffer.outbound_position(),
            inbound_position: self.inbound_position,
        })))
    }

    /// RESUME_OK arrived (client): frames to replay, oldest first.
    pub fn on_resume_ok(&mut self, ok: &ResumeOk) -> Result<Vec<Frame>, ResumeError> {
        let replay = self.buffer.replay_after(ok.inbound_position)?;
        self.mark_resumed(replay.len());
        Ok(replay)
    }

    /// RESUME arrived (server): the RESUME_OK frame and the frames to replay.
    pub fn on_resume(&mut self, resume: &Resume) -> Result<(Frame, Vec<Frame>), ResumeError> {
        let token = self.token.as_ref().ok_or(ResumeError::Disabled)?;
        if *token != resume.token {
            return Err(ResumeError::TokenMismatch);
        }
        if resume.outbound_position < self.inbound_position {
            return Err(ResumeError::PositionMismatch {
                peer: resume.outbound_position,
                first: self.inbound_position,
                last: self.inbound_position,
            });
        }

        let replay = self.buffer.replay_after(resume.inbound_position)?;
        self.mark_resumed(replay.len());
        let ok = Frame::connection(Body::ResumeOk(ResumeOk { inbound_position: self.inbound_position }));
        Ok((ok, replay))
    }

    fn mark_resumed(&mut self, replayed: usize) {
        tracing::info!(
            replayed,
            outbound = self.outbound_position(),
            inbound = self.inbound_position,
            attempts = self.attempts,
            "session resumed"
        );
        self.state = ResumeState::Resumed;
        self.handshake_pending = false;
        self.disconnected_at = None;
        self.attempts = 0;
        self.leases.reset_issued();
    }

    /// The session is gone: drop buffered frames and all lease state.
    pub fn abandon(&mut self) {
        if self.state != ResumeState::Abandoned {
            tracing::info!(outbound = self.outbound_position(), inbound = self.inbound_position, "session abandoned");
        }
        self.state = ResumeState::Abandoned;
        self.handshake_pending = false;
        self.buffer.clear();
        self.leases.reset();
    }
}
