//! Pending-outbound buffer.

use std::collections::VecDeque;

use resumux_proto::{Frame, Position};

use crate::error::ResumeError;

/// Resumable frames sent (or parked) but not yet acknowledged by the peer.
///
/// Bounded: when full, the oldest frame is evicted. A later resume that
/// needs the evicted frame fails the position check.
#[derive(Debug, Clone)]
pub struct ResumeBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
    outbound_position: Position,
}

impl ResumeBuffer {
    /// Empty buffer retaining at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self { frames: VecDeque::new(), capacity: capacity.max(1), outbound_position: 0 }
    }

    /// Assign the next outbound position to `frame` without retaining it.
    pub fn stamp(&mut self, mut frame: Frame) -> Frame {
        self.outbound_position += 1;
        frame.position = self.outbound_position;
        frame
    }

    /// Assign the next outbound position and retain a copy for replay.
    pub fn stamp_and_retain(&mut self, frame: Frame) -> Frame {
        let frame = self.stamp(frame);
        self.frames.push_back(frame.clone());
        if self.frames.len() > self.capacity
            && let Some(evicted) = self.frames.pop_front()
        {
            tracing::warn!(position = evicted.position, "resume buffer full, evicting oldest frame");
        }
        frame
    }

    /// Drop every frame the peer has received, up to and including
    /// `position`.
    pub fn acknowledge(&mut self, position: Position) {
        while self.frames.front().is_some_and(|frame| frame.position <= position) {
            self.frames.pop_front();
        }
    }

    /// Position of the last resumable frame produced.
    pub fn outbound_position(&self) -> Position {
        self.outbound_position
    }

    /// Lowest position still available for replay.
    ///
    /// With nothing retained this is one past the outbound position.
    pub fn first_position(&self) -> Position {
        self.frames.front().map_or(self.outbound_position + 1, |frame| frame.position)
    }

    /// Frames the peer has not received, given the last position it did.
    ///
    /// `peer_inbound` must lie in `[first_position - 1, outbound_position]`;
    /// anything else means frames were lost for good or the peer claims
    /// frames we never sent. Frames at or below `peer_inbound` are dropped.
    pub fn replay_after(&mut self, peer_inbound: Position) -> Result<Vec<Frame>, ResumeError> {
        let first = self.first_position() - 1;
        let last = self.outbound_position;
        if peer_inbound < first || peer_inbound > last {
            return Err(ResumeError::PositionMismatch { peer: peer_inbound, first, last });
        }

        self.acknowledge(peer_inbound);
        Ok(self.frames.iter().cloned().collect())
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all retained frames. Positions keep counting.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use resumux_proto::{Body, Payload};

    use super::*;

    fn next(id: u32, n: u8) -> Frame {
        Frame::stream(id, Body::Payload { data: Some(Payload::new(vec![n])), complete: false })
    }

    fn filled(count: u8, capacity: usize) -> ResumeBuffer {
        let mut buffer = ResumeBuffer::new(capacity);
        for n in 1..=count {
            buffer.stamp_and_retain(next(1, n));
        }
        buffer
    }

    #[test]
    fn positions_start_at_one() {
        let mut buffer = ResumeBuffer::new(8);
        assert_eq!(buffer.stamp_and_retain(next(1, 1)).position, 1);
        assert_eq!(buffer.stamp(next(1, 2)).position, 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn replays_exactly_the_missing_suffix() {
        let mut buffer = filled(10, 64);
        let replay = buffer.replay_after(7).unwrap();

        let positions: Vec<Position> = replay.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![8, 9, 10]);
        assert_eq!(buffer.first_position(), 8);
    }

    #[test]
    fn peer_up_to_date_replays_nothing() {
        let mut buffer = filled(4, 64);
        assert!(buffer.replay_after(4).unwrap().is_empty());
    }

    #[test]
    fn acknowledged_frames_cannot_be_replayed() {
        let mut buffer = filled(10, 64);
        buffer.acknowledge(6);
        assert_eq!(buffer.first_position(), 7);

        assert!(buffer.replay_after(6).is_ok());
        assert_eq!(
            buffer.replay_after(5),
            Err(ResumeError::PositionMismatch { peer: 5, first: 6, last: 10 })
        );
    }

    #[test]
    fn peer_ahead_of_us_is_rejected() {
        let mut buffer = filled(3, 64);
        assert!(matches!(buffer.replay_after(4), Err(ResumeError::PositionMismatch { peer: 4, .. })));
    }

    #[test]
    fn eviction_breaks_old_resume_points() {
        let mut buffer = filled(6, 4);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.first_position(), 3);
        assert!(buffer.replay_after(1).is_err());
        assert_eq!(buffer.replay_after(2).unwrap().len(), 4);
    }
}
