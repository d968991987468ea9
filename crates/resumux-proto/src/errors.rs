//! Error types for wire decoding and encoding.

use thiserror::Error;

use crate::FrameType;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header did not start with [`crate::FrameHeader::MAGIC`]
    #[error("invalid magic {0:#06x}")]
    InvalidMagic(u16),

    /// Header version is not one we speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Frame type byte does not name a known frame
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// Flags contain bits we do not understand
    #[error("unknown frame flags {0:#06x}")]
    UnknownFlags(u16),

    /// Reserved header bytes were not zero
    #[error("reserved header field must be zero, got {0:#06x}")]
    ReservedNonZero(u16),

    /// Body length exceeds [`crate::FrameHeader::MAX_BODY_SIZE`]
    #[error("body of {size} bytes exceeds limit of {max} bytes")]
    BodyTooLarge {
        /// Declared or actual body size
        size: usize,
        /// Maximum permitted body size
        max: usize,
    },

    /// Connection-level frame carried a non-zero stream id, or a stream
    /// frame carried stream id 0
    #[error("{frame_type:?} frame cannot use stream id {stream_id}")]
    InvalidStreamId {
        /// Type of the offending frame
        frame_type: FrameType,
        /// Stream id found in the header
        stream_id: u32,
    },

    /// CBOR body could not be encoded or decoded
    #[error("CBOR body error: {0}")]
    Cbor(String),

    /// Body decoded but violates a structural rule for its frame type
    #[error("malformed {frame_type:?} frame: {reason}")]
    Malformed {
        /// Type of the offending frame
        frame_type: FrameType,
        /// What was wrong with it
        reason: &'static str,
    },
}
