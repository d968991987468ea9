//! Frame header flags.

use bitflags::bitflags;

bitflags! {
    /// Per-frame flag bits carried in the header.
    ///
    /// Flags carry the boolean parts of a frame so that the multiplexer can
    /// see stream termination without touching the CBOR body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct FrameFlags: u16 {
        /// Sender has finished its direction of the stream
        const COMPLETE = 0x0001;
        /// PAYLOAD frame carries a data item
        const NEXT = 0x0002;
        /// SETUP requests a resumable session (token present)
        const RESUME_ENABLE = 0x0004;
        /// SETUP requests lease-based admission control
        const LEASE = 0x0008;
        /// KEEPALIVE asks the peer to echo a KEEPALIVE back
        const RESPOND = 0x0010;
    }
}
