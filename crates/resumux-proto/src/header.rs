//! Fixed-size frame header.
//!
//! ```text
//! 0       2   3   4           8                  16      18      20          24
//! ┌───────┬───┬───┬───────────┬──────────────────┬───────┬───────┬───────────┐
//! │ magic │ v │ t │ stream id │     position     │ flags │ rsvd  │ body len  │
//! └───────┴───┴───┴───────────┴──────────────────┴───────┴───────┴───────────┘
//! ```
//!
//! All multi-byte fields are big-endian.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::network_endian::{U16, U32, U64},
};

use crate::{FrameFlags, FrameType, Position, ProtocolError, Result, StreamId};

/// Wire header preceding every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    magic: U16,
    version: u8,
    frame_type: u8,
    stream_id: U32,
    position: U64,
    flags: U16,
    reserved: U16,
    body_len: U32,
}

impl FrameHeader {
    /// Encoded header size in bytes
    pub const SIZE: usize = 24;

    /// Magic prefix ("RX")
    pub const MAGIC: u16 = 0x5258;

    /// Protocol version spoken by this crate
    pub const VERSION: u8 = 1;

    /// Upper bound on body size (16 MB)
    pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

    /// Build a header for an outbound frame.
    pub fn new(
        frame_type: FrameType,
        stream_id: StreamId,
        position: Position,
        flags: FrameFlags,
        body_len: u32,
    ) -> Self {
        Self {
            magic: U16::new(Self::MAGIC),
            version: Self::VERSION,
            frame_type: frame_type.to_u8(),
            stream_id: U32::new(stream_id),
            position: U64::new(position),
            flags: U16::new(flags.bits()),
            reserved: U16::new(0),
            body_len: U32::new(body_len),
        }
    }

    /// Parse and validate a header from the first [`Self::SIZE`] bytes.
    ///
    /// Validates magic, version, type, flags and body size. Stream id rules
    /// are checked by [`crate::Frame`] once the body is known.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw = bytes.get(..Self::SIZE).ok_or(ProtocolError::Malformed {
            frame_type: FrameType::Error,
            reason: "header truncated",
        })?;
        let header = Self::read_from_bytes(raw).map_err(|_| ProtocolError::Malformed {
            frame_type: FrameType::Error,
            reason: "header truncated",
        })?;

        if header.magic.get() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic.get()));
        }
        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        if FrameType::from_u8(header.frame_type).is_none() {
            return Err(ProtocolError::UnknownFrameType(header.frame_type));
        }
        if FrameFlags::from_bits(header.flags.get()).is_none() {
            return Err(ProtocolError::UnknownFlags(header.flags.get()));
        }
        if header.reserved.get() != 0 {
            return Err(ProtocolError::ReservedNonZero(header.reserved.get()));
        }
        if header.body_len() > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: header.body_len(),
                max: Self::MAX_BODY_SIZE,
            });
        }

        Ok(header)
    }

    /// Frame type. Always valid on a parsed header.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Stream this frame belongs to (0 = connection).
    pub fn stream_id(&self) -> StreamId {
        self.stream_id.get()
    }

    /// Resume position (0 for connection-level frames).
    pub fn position(&self) -> Position {
        self.position.get()
    }

    /// Flag bits, unknown bits dropped.
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(self.flags.get())
    }

    /// Declared body length in bytes.
    pub fn body_len(&self) -> usize {
        self.body_len.get() as usize
    }

    /// Header bytes in wire order.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}
