//! Connection driver.
//!
//! One task owns a [`Session`] and the byte stream it currently runs over.
//! The loop writes whatever the session wants written, then waits for
//! whichever comes first: inbound bytes, the tick timer, or an external
//! interrupt. Every frame goes through `Session::poll_outbound`, so there is
//! exactly one writer.

use std::{future::Future, time::Duration};

use bytes::BytesMut;
use resumux_core::{Session, SessionAction, StreamEvent, env::Environment};
use resumux_proto::{Body, ErrorBody, ErrorCode, Frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NodeError, Result};

/// How often timers are advanced.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

const READ_CAPACITY: usize = 16 * 1024;

/// Consumer of the events a session delivers.
pub trait Application: Send {
    /// Handle one event. May drive further session operations.
    fn on_event(&mut self, session: &mut Session, event: StreamEvent) -> Result<()>;

    /// Whether the driver may stop (a client whose work is done).
    fn is_finished(&self, _session: &Session) -> bool {
        false
    }
}

/// Why [`Connection::drive`] returned.
#[derive(Debug)]
pub enum Exit<T> {
    /// Transport gone; the session is retained for resumption
    TransportLost,
    /// Transport gone; the client should make this reconnection attempt
    Reconnect {
        /// 1-based attempt number
        attempt: u32,
    },
    /// The application reported it is finished
    Finished,
    /// The session was abandoned
    Abandoned(String),
    /// The interrupt future completed; the session is untouched
    Interrupted(T),
}

/// A byte stream with read and write buffers.
#[derive(Debug)]
pub struct Connection<S> {
    io: S,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream.
    pub fn new(io: S) -> Self {
        Self { io, inbound: BytesMut::with_capacity(READ_CAPACITY), outbound: BytesMut::new() }
    }

    /// Read until one whole frame is available.
    ///
    /// `Ok(None)` means the peer closed the stream first.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.inbound)? {
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.inbound).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Encode and write one frame outside any session.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        frame.encode(&mut self.outbound)?;
        self.write_outbound().await
    }

    async fn write_outbound(&mut self) -> Result<()> {
        if !self.outbound.is_empty() {
            self.io.write_all(&self.outbound).await?;
            self.io.flush().await?;
            self.outbound.clear();
        }
        Ok(())
    }

    async fn write_pending(&mut self, session: &mut Session) -> Result<()> {
        while let Some(frame) = session.poll_outbound() {
            frame.encode(&mut self.outbound)?;
        }
        self.write_outbound().await
    }

    /// Hand one frame to the session and the application.
    pub fn process<A, T>(
        &mut self,
        session: &mut Session,
        app: &mut A,
        frame: Frame,
        now: std::time::Instant,
    ) -> Result<Option<Exit<T>>>
    where
        A: Application,
    {
        let actions = session.handle_frame(frame, now)?;
        dispatch(session, app, actions)
    }

    /// Run `session` over this connection until something ends the loop.
    pub async fn drive<A, E, F>(
        &mut self,
        session: &mut Session,
        app: &mut A,
        env: &E,
        interrupt: F,
    ) -> Result<Exit<F::Output>>
    where
        A: Application,
        E: Environment,
        F: Future,
    {
        tokio::pin!(interrupt);
        let mut next_tick = env.now() + TICK_INTERVAL;

        loop {
            if let Err(err) = self.write_pending(session).await {
                tracing::debug!(%err, "write failed");
                return self.lose(session, app, env.now());
            }
            if session.is_abandoned() {
                return Ok(Exit::Abandoned("session abandoned".to_string()));
            }
            if app.is_finished(session) {
                return Ok(Exit::Finished);
            }

            let now = env.now();
            let exit = if now >= next_tick {
                next_tick = now + TICK_INTERVAL;
                let actions = session.tick(now);
                dispatch(session, app, actions)?
            } else {
                tokio::select! {
                    read = self.io.read_buf(&mut self.inbound) => match read {
                        Ok(0) => {
                            tracing::debug!("peer closed the connection");
                            return self.lose(session, app, env.now());
                        },
                        Ok(_) => self.process_inbound(session, app, env).await?,
                        Err(err) => {
                            tracing::debug!(%err, "read failed");
                            return self.lose(session, app, env.now());
                        },
                    },
                    () = env.sleep(next_tick - now) => None,
                    value = &mut interrupt => return Ok(Exit::Interrupted(value)),
                }
            };

            if let Some(exit) = exit {
                if let Err(err) = self.write_pending(session).await {
                    tracing::debug!(%err, "final write failed");
                }
                return Ok(exit);
            }
        }
    }

    async fn process_inbound<A, E, T>(
        &mut self,
        session: &mut Session,
        app: &mut A,
        env: &E,
    ) -> Result<Option<Exit<T>>>
    where
        A: Application,
        E: Environment,
    {
        loop {
            let frame = match Frame::decode(&mut self.inbound) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(err) => {
                    tracing::warn!(%err, "malformed frame");
                    let error = ErrorBody::new(ErrorCode::ConnectionError, err.to_string());
                    if let Err(write) = self.write_frame(&Frame::connection(Body::Error(error))).await {
                        tracing::debug!(err = %write, "could not report malformed frame");
                    }
                    return Err(NodeError::Codec(err));
                },
            };
            if let Some(exit) = self.process(session, app, frame, env.now())? {
                return Ok(Some(exit));
            }
        }
    }

    fn lose<A, T>(&mut self, session: &mut Session, app: &mut A, now: std::time::Instant) -> Result<Exit<T>>
    where
        A: Application,
    {
        self.inbound.clear();
        self.outbound.clear();
        let actions = session.transport_lost(now);
        Ok(dispatch(session, app, actions)?.unwrap_or(Exit::TransportLost))
    }
}

/// Feed session actions to the application.
///
/// Returns the exit they call for, if any: abandonment over reconnection
/// over a closed transport.
pub fn dispatch<A, T>(session: &mut Session, app: &mut A, actions: Vec<SessionAction>) -> Result<Option<Exit<T>>>
where
    A: Application,
{
    let mut exit = None;
    for action in actions {
        match action {
            SessionAction::Deliver(event) => app.on_event(session, event)?,
            SessionAction::Resumed { replayed } => tracing::info!(replayed, "session resumed"),
            SessionAction::Close { reason } => {
                tracing::info!(%reason, "closing transport");
                if exit.is_none() {
                    exit = Some(Exit::TransportLost);
                }
            },
            SessionAction::Reconnect { attempt } => {
                if !matches!(exit, Some(Exit::Abandoned(_))) {
                    exit = Some(Exit::Reconnect { attempt });
                }
            },
            SessionAction::Abandoned { reason } => {
                tracing::info!(%reason, "session abandoned");
                exit = Some(Exit::Abandoned(reason));
            },
        }
    }
    Ok(exit)
}
