//! Scenario-based testing with mandatory oracles.
//!
//! A scenario sets up a client and a server, runs the SETUP exchange, applies
//! a sequence of steps (session operations, faults, time), and then hands the
//! final [`World`] to an oracle. A scenario without an oracle cannot be run.
//!
//! ```text
//! Scenario::new(..) ──steps──> .oracle(..) ──> RunnableScenario::run()
//! ```

mod builder;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use world::{FrameRecord, NetworkEvent, Peer, Side, World};

/// Final-state verification.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;

/// Reusable oracles.
pub mod oracle {
    use resumux_core::{SessionAction, StreamEvent};

    use super::{OracleFn, Side, World};

    /// Every oracle must pass.
    pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
        Box::new(move |world| oracles.iter().try_for_each(|oracle| oracle(world)))
    }

    /// Neither session was abandoned.
    pub fn sessions_alive() -> OracleFn {
        Box::new(|world: &World| {
            for side in [Side::Client, Side::Server] {
                let peer = world.peer(side).ok_or_else(|| format!("{side:?} missing"))?;
                if peer.abandoned() {
                    return Err(format!("{side:?} session was abandoned: {:?}", peer.actions()));
                }
            }
            Ok(())
        })
    }

    /// Each side accepted exactly what the other produced.
    pub fn positions_agree() -> OracleFn {
        Box::new(|world: &World| {
            let client = world.client().session();
            let server = world.server().ok_or("server missing")?.session();
            if client.outbound_position() != server.inbound_position() {
                return Err(format!(
                    "client sent {} frames, server accepted {}",
                    client.outbound_position(),
                    server.inbound_position()
                ));
            }
            if server.outbound_position() != client.inbound_position() {
                return Err(format!(
                    "server sent {} frames, client accepted {}",
                    server.outbound_position(),
                    client.inbound_position()
                ));
            }
            Ok(())
        })
    }

    /// The session on `side` was resumed at least once.
    pub fn resumed(side: Side) -> OracleFn {
        Box::new(move |world: &World| {
            let peer = world.peer(side).ok_or_else(|| format!("{side:?} missing"))?;
            if peer.actions().iter().any(|action| matches!(action, SessionAction::Resumed { .. })) {
                Ok(())
            } else {
                Err(format!("{side:?} never resumed"))
            }
        })
    }

    /// No stream on `side` failed.
    pub fn no_stream_errors(side: Side) -> OracleFn {
        Box::new(move |world: &World| {
            let peer = world.peer(side).ok_or_else(|| format!("{side:?} missing"))?;
            match peer.events().iter().find(|event| matches!(event, StreamEvent::Error { .. })) {
                Some(event) => Err(format!("{side:?} saw {event:?}")),
                None => Ok(()),
            }
        })
    }
}
