//! Session resumption.
//!
//! Every resumable (stream-scoped) frame a side sends gets the next
//! outbound position, starting at 1, and a copy stays in the
//! [`ResumeBuffer`] until the peer acknowledges it. Each side counts the
//! resumable frames it accepted as its inbound position.
//!
//! After a transport loss the [`ResumeController`] keeps the session alive
//! for the resume window. On a new transport the client sends RESUME with its
//! token and positions; the server answers RESUME_OK with its inbound
//! position; each side then replays exactly the buffered frames the other
//! never received.

mod buffer;
mod controller;

pub use buffer::ResumeBuffer;
pub use controller::{ResumeController, ResumePoll, ResumeState};
