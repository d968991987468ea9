//! Accept loop and per-connection tasks.

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use resumux_core::{Session, SessionConfig, SessionError, env::Environment, transport::Transport};
use resumux_proto::{Body, ErrorBody, ErrorCode, Frame};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    driver::{Connection, Exit},
    error::{NodeError, Result},
    registry::{Handover, HandoverRequests, Parked, Registry},
    routes::RouteTable,
    service::{Handler, Responder},
};

/// How often parked sessions are checked against their resume window.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Shared<E> {
    env: E,
    config: SessionConfig,
    routes: Arc<RouteTable<Handler>>,
    registry: Arc<Registry>,
}

/// Serves the route table to every client that connects.
pub struct Server<T, E> {
    transport: T,
    shared: Arc<Shared<E>>,
}

impl<T, E> Server<T, E>
where
    T: Transport,
    E: Environment,
{
    /// Server accepting on `transport`.
    pub fn new(transport: T, env: E, config: SessionConfig, routes: RouteTable<Handler>) -> Self {
        let shared = Shared { env, config, routes: Arc::new(routes), registry: Arc::new(Registry::new()) };
        Self { transport, shared: Arc::new(shared) }
    }

    /// Accept connections until the transport fails.
    pub async fn run(self) -> Result<()> {
        tokio::spawn(sweep(self.shared.env.clone(), Arc::downgrade(&self.shared.registry)));

        loop {
            let (stream, peer) = self.transport.accept().await?;
            tracing::debug!(%peer, "connection accepted");
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(err) = shared.serve(stream, peer).await {
                    tracing::warn!(%peer, %err, "connection failed");
                }
            });
        }
    }
}

async fn sweep<E: Environment>(env: E, registry: Weak<Registry>) {
    loop {
        env.sleep(SWEEP_INTERVAL).await;
        let Some(registry) = registry.upgrade() else {
            return;
        };
        registry.sweep(env.now()).await;
    }
}

impl<E: Environment> Shared<E> {
    async fn serve<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut connection = Connection::new(stream);
        let Some(first) = connection.read_frame().await? else {
            return Err(NodeError::ClosedBeforeHandshake);
        };

        match &first.body {
            Body::Setup(setup) => match Session::accept(setup, self.config.clone(), self.env.now()) {
                Ok(session) => {
                    tracing::info!(%peer, "session established");
                    let responder = Responder::new(Arc::clone(&self.routes));
                    self.run(connection, Parked { session, responder }, None).await
                },
                Err(SessionError::SetupRejected(error)) => {
                    tracing::warn!(%peer, code = ?error.code, message = %error.message, "setup rejected");
                    connection.write_frame(&Frame::connection(Body::Error(error))).await
                },
                Err(err) => Err(err.into()),
            },
            Body::Resume(resume) => {
                let Some(parked) = self.registry.claim(&resume.token).await else {
                    tracing::warn!(%peer, "resume for unknown session");
                    let error = ErrorBody::new(ErrorCode::RejectedResume, "unknown session");
                    return connection.write_frame(&Frame::connection(Body::Error(error))).await;
                };
                tracing::info!(%peer, "resuming session");
                self.run(connection, parked, Some(first)).await
            },
            _ => {
                let error = ErrorBody::new(ErrorCode::InvalidSetup, "expected SETUP or RESUME");
                connection.write_frame(&Frame::connection(Body::Error(error))).await?;
                Err(NodeError::UnexpectedFirstFrame(format!("{:?}", first.frame_type())))
            },
        }
    }

    async fn run<S>(&self, mut connection: Connection<S>, mut parked: Parked, resume: Option<Frame>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let token = parked.session.resume_token().cloned();
        let mut requests = match &token {
            Some(token) => Some(self.registry.register_live(token.clone()).await),
            None => None,
        };

        // A RESUME the session refuses leaves an ERROR queued; the driver
        // writes it and reports the abandonment on its first pass.
        let processed = match resume {
            Some(frame) => {
                let now = self.env.now();
                connection.process::<_, Handover>(&mut parked.session, &mut parked.responder, frame, now).map(|_| ())
            },
            None => Ok(()),
        };
        let exit = match processed {
            Ok(()) => {
                let interrupt = handover_requested(requests.as_mut());
                connection.drive(&mut parked.session, &mut parked.responder, &self.env, interrupt).await
            },
            Err(err) => Err(err),
        };

        self.settle(token, requests, parked, exit).await
    }

    async fn settle(
        &self,
        token: Option<Bytes>,
        requests: Option<HandoverRequests>,
        parked: Parked,
        exit: Result<Exit<Handover>>,
    ) -> Result<()> {
        let (Some(token), Some(mut requests)) = (token, requests) else {
            return exit.map(|_| ());
        };

        match exit {
            Ok(Exit::Interrupted(reply)) => {
                if reply.send(parked).is_err() {
                    tracing::debug!("resuming connection went away during hand-over");
                }
                Ok(())
            },
            Ok(Exit::TransportLost | Exit::Reconnect { .. } | Exit::Finished) => {
                self.registry.park(token, parked, &mut requests).await;
                Ok(())
            },
            Ok(Exit::Abandoned(reason)) => {
                tracing::debug!(%reason, "dropping abandoned session");
                self.registry.forget(&token, &mut requests).await;
                Ok(())
            },
            Err(err) => {
                self.registry.forget(&token, &mut requests).await;
                Err(err)
            },
        }
    }
}

async fn handover_requested(requests: Option<&mut HandoverRequests>) -> Handover {
    match requests {
        Some(requests) => match requests.await {
            Ok(reply) => reply,
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
