//! Items waiting for demand.
//!
//! A session refuses a data item once the peer's demand is used up. Items
//! produced beyond demand wait here, per stream, and are released when a
//! `Demand` event arrives.

use std::collections::{HashMap, VecDeque};

use resumux_core::{Session, SessionError, stream::Stream};
use resumux_proto::{Payload, StreamId};

#[derive(Debug, Default)]
struct Pending {
    items: VecDeque<Payload>,
    complete: bool,
}

/// Per-stream queues of unsent items.
#[derive(Debug, Default)]
pub struct Outboxes {
    streams: HashMap<StreamId, Pending>,
}

impl Outboxes {
    /// Empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item` on `id`.
    pub fn push(&mut self, id: StreamId, item: Payload) {
        self.streams.entry(id).or_default().items.push_back(item);
    }

    /// Complete `id` once everything queued so far has been sent.
    pub fn finish(&mut self, id: StreamId) {
        self.streams.entry(id).or_default().complete = true;
    }

    /// Drop everything queued on `id` (stream cancelled or failed).
    pub fn discard(&mut self, id: StreamId) {
        if let Some(pending) = self.streams.remove(&id) {
            if !pending.items.is_empty() {
                tracing::debug!(stream_id = id, dropped = pending.items.len(), "discarding unsent items");
            }
        }
    }

    /// Items still waiting on `id`.
    pub fn queued(&self, id: StreamId) -> usize {
        self.streams.get(&id).map_or(0, |pending| pending.items.len())
    }

    /// Whether any stream has something waiting.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Send as much of `id` as current demand allows.
    ///
    /// The queue is forgotten once its completion has been written or the
    /// session refuses an item for any reason other than demand.
    pub fn flush(&mut self, session: &mut Session, id: StreamId) -> Result<(), SessionError> {
        let Some(pending) = self.streams.get_mut(&id) else {
            return Ok(());
        };

        let result = drain(pending, session, id);
        if !matches!(result, Ok(false)) {
            self.streams.remove(&id);
        }
        result.map(|_| ())
    }
}

/// Returns whether the stream's direction is now complete.
fn drain(pending: &mut Pending, session: &mut Session, id: StreamId) -> Result<bool, SessionError> {
    let mut demand = session.stream(id).map_or(0, Stream::outbound_demand);
    while demand > 0 {
        let Some(item) = pending.items.pop_front() else {
            break;
        };
        let last = pending.complete && pending.items.is_empty();
        session.send(id, item, last)?;
        if last {
            return Ok(true);
        }
        demand -= 1;
    }

    if pending.complete && pending.items.is_empty() {
        session.complete(id)?;
        return Ok(true);
    }
    Ok(false)
}
