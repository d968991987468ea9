//! Sessions by resume token.
//!
//! A resumable session is in exactly one place: owned by the task driving a
//! live connection, or parked here waiting for the client to come back.
//! Live sessions leave a hand-over channel behind, so a RESUME that arrives
//! before the server noticed the old transport died can pull the session out
//! of the old task.

use std::{collections::HashMap, time::Instant};

use bytes::Bytes;
use resumux_core::Session;
use tokio::sync::{Mutex, oneshot};

use crate::service::Responder;

/// A session and the responder serving it.
#[derive(Debug)]
pub struct Parked {
    /// Session state, positions and replay buffer included
    pub session: Session,
    /// Streams in progress
    pub responder: Responder,
}

/// Reply channel a live task sends its session through when asked.
pub type Handover = oneshot::Sender<Parked>;

/// Receiving end a live task watches for hand-over requests.
pub type HandoverRequests = oneshot::Receiver<Handover>;

#[derive(Debug)]
enum Slot {
    Live(oneshot::Sender<Handover>),
    Parked(Parked),
}

/// Resumable sessions keyed by token.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<HashMap<Bytes, Slot>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a task now drives the session for `token`.
    pub async fn register_live(&self, token: Bytes) -> HandoverRequests {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().await.insert(token, Slot::Live(tx));
        rx
    }

    /// The live task lost its transport: park the session, or hand it
    /// straight to a RESUME that is already waiting for it.
    pub async fn park(&self, token: Bytes, parked: Parked, requests: &mut HandoverRequests) {
        let mut slots = self.slots.lock().await;
        if let Ok(reply) = requests.try_recv() {
            if reply.send(parked).is_err() {
                tracing::debug!("resuming connection went away during hand-over");
            }
            return;
        }
        tracing::info!(parked = slots.len(), "session parked");
        slots.insert(token, Slot::Parked(parked));
    }

    /// The live task's session is gone for good.
    pub async fn forget(&self, token: &Bytes, requests: &mut HandoverRequests) {
        let mut slots = self.slots.lock().await;
        if requests.try_recv().is_ok() {
            // A RESUME claimed the slot already; dropping the reply fails it.
            return;
        }
        if matches!(slots.get(token), Some(Slot::Live(_))) {
            slots.remove(token);
        }
    }

    /// Take the session for `token`, pulling it from a live task if needed.
    pub async fn claim(&self, token: &Bytes) -> Option<Parked> {
        let waiting = {
            let mut slots = self.slots.lock().await;
            match slots.remove(token)? {
                Slot::Parked(parked) => return Some(parked),
                Slot::Live(requests) => {
                    let (reply, waiting) = oneshot::channel();
                    requests.send(reply).ok()?;
                    waiting
                },
            }
        };
        tracing::debug!("taking session over from a half-open connection");
        waiting.await.ok()
    }

    /// Advance timers of parked sessions and drop the abandoned ones.
    ///
    /// Returns how many were dropped.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Live(_) => true,
            Slot::Parked(parked) => {
                parked.session.tick(now);
                !parked.session.is_abandoned()
            },
        });
        let dropped = before - slots.len();
        if dropped > 0 {
            tracing::info!(dropped, "resume window elapsed for parked sessions");
        }
        dropped
    }

    /// Number of parked sessions.
    pub async fn parked(&self) -> usize {
        self.slots.lock().await.values().filter(|slot| matches!(slot, Slot::Parked(_))).count()
    }

    /// Number of sessions driven by a live connection.
    pub async fn live(&self) -> usize {
        self.slots.lock().await.values().filter(|slot| matches!(slot, Slot::Live(_))).count()
    }
}
