//! Frames: header plus typed body.

use bytes::{BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    ErrorBody, FrameFlags, FrameHeader, FrameType, Keepalive, Lease, Payload, Position,
    ProtocolError, RequestChannel, RequestStream, Result, Resume, ResumeOk, Setup, StreamId,
};

/// Typed frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// SETUP
    Setup(Setup),
    /// LEASE
    Lease(Lease),
    /// KEEPALIVE
    Keepalive(Keepalive),
    /// RESUME
    Resume(Resume),
    /// RESUME_OK
    ResumeOk(ResumeOk),
    /// REQUEST_RESPONSE
    RequestResponse(Payload),
    /// REQUEST_FNF
    RequestFnf(Payload),
    /// REQUEST_STREAM
    RequestStream(RequestStream),
    /// REQUEST_CHANNEL
    RequestChannel(RequestChannel),
    /// REQUEST_N with its increment
    RequestN(u32),
    /// PAYLOAD
    Payload {
        /// Data item, if the frame carries one (NEXT flag)
        data: Option<Payload>,
        /// Sender finished its direction (COMPLETE flag)
        complete: bool,
    },
    /// CANCEL
    Cancel,
    /// ERROR
    Error(ErrorBody),
}

impl Body {
    /// Frame type this body is sent as.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup(_) => FrameType::Setup,
            Self::Lease(_) => FrameType::Lease,
            Self::Keepalive(_) => FrameType::Keepalive,
            Self::Resume(_) => FrameType::Resume,
            Self::ResumeOk(_) => FrameType::ResumeOk,
            Self::RequestResponse(_) => FrameType::RequestResponse,
            Self::RequestFnf(_) => FrameType::RequestFnf,
            Self::RequestStream(_) => FrameType::RequestStream,
            Self::RequestChannel(_) => FrameType::RequestChannel,
            Self::RequestN(_) => FrameType::RequestN,
            Self::Payload { .. } => FrameType::Payload,
            Self::Cancel => FrameType::Cancel,
            Self::Error(_) => FrameType::Error,
        }
    }

    fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        match self {
            Self::Setup(setup) => {
                flags.set(FrameFlags::LEASE, setup.lease);
                flags.set(FrameFlags::RESUME_ENABLE, setup.resume_enabled());
            },
            Self::Keepalive(keepalive) => flags.set(FrameFlags::RESPOND, keepalive.respond),
            Self::RequestChannel(request) => flags.set(FrameFlags::COMPLETE, request.complete),
            Self::Payload { data, complete } => {
                flags.set(FrameFlags::NEXT, data.is_some());
                flags.set(FrameFlags::COMPLETE, *complete);
            },
            _ => {},
        }
        flags
    }

    fn encode_cbor(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Setup(v) => to_cbor(v, out),
            Self::Lease(v) => to_cbor(v, out),
            Self::Keepalive(v) => to_cbor(v, out),
            Self::Resume(v) => to_cbor(v, out),
            Self::ResumeOk(v) => to_cbor(v, out),
            Self::RequestResponse(v) | Self::RequestFnf(v) => to_cbor(v, out),
            Self::RequestStream(v) => to_cbor(v, out),
            Self::RequestChannel(v) => to_cbor(v, out),
            Self::RequestN(n) => to_cbor(n, out),
            Self::Payload { data: Some(v), .. } => to_cbor(v, out),
            Self::Payload { data: None, .. } | Self::Cancel => Ok(()),
            Self::Error(v) => to_cbor(v, out),
        }
    }

    fn decode(frame_type: FrameType, flags: FrameFlags, body: &[u8]) -> Result<Self> {
        let decoded = match frame_type {
            FrameType::Setup => {
                let mut setup: Setup = from_cbor(body)?;
                setup.lease = flags.contains(FrameFlags::LEASE);
                if flags.contains(FrameFlags::RESUME_ENABLE) != setup.resume_enabled() {
                    return Err(ProtocolError::Malformed {
                        frame_type,
                        reason: "resume flag disagrees with token",
                    });
                }
                Self::Setup(setup)
            },
            FrameType::Lease => Self::Lease(from_cbor(body)?),
            FrameType::Keepalive => {
                let mut keepalive: Keepalive = from_cbor(body)?;
                keepalive.respond = flags.contains(FrameFlags::RESPOND);
                Self::Keepalive(keepalive)
            },
            FrameType::Resume => Self::Resume(from_cbor(body)?),
            FrameType::ResumeOk => Self::ResumeOk(from_cbor(body)?),
            FrameType::RequestResponse => Self::RequestResponse(from_cbor(body)?),
            FrameType::RequestFnf => Self::RequestFnf(from_cbor(body)?),
            FrameType::RequestStream => Self::RequestStream(from_cbor(body)?),
            FrameType::RequestChannel => {
                let mut request: RequestChannel = from_cbor(body)?;
                request.complete = flags.contains(FrameFlags::COMPLETE);
                Self::RequestChannel(request)
            },
            FrameType::RequestN => {
                let n: u32 = from_cbor(body)?;
                if n == 0 {
                    return Err(ProtocolError::Malformed { frame_type, reason: "zero increment" });
                }
                Self::RequestN(n)
            },
            FrameType::Payload => {
                let next = flags.contains(FrameFlags::NEXT);
                let complete = flags.contains(FrameFlags::COMPLETE);
                if !next && !complete {
                    return Err(ProtocolError::Malformed {
                        frame_type,
                        reason: "neither NEXT nor COMPLETE set",
                    });
                }
                let data = if next { Some(from_cbor(body)?) } else { None };
                Self::Payload { data, complete }
            },
            FrameType::Cancel => Self::Cancel,
            FrameType::Error => Self::Error(from_cbor(body)?),
        };
        Ok(decoded)
    }
}

/// A complete protocol frame.
///
/// `position` is 0 for connection-level frames. For stream frames it is
/// assigned by the session's resume buffer at write time; frames built by
/// the multiplexer start at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream this frame belongs to (0 = connection)
    pub stream_id: StreamId,
    /// Resume position
    pub position: Position,
    /// Typed body
    pub body: Body,
}

impl Frame {
    /// Stream-scoped frame, position not yet assigned.
    pub fn stream(stream_id: StreamId, body: Body) -> Self {
        Self { stream_id, position: 0, body }
    }

    /// Connection-level frame on stream 0.
    pub fn connection(body: Body) -> Self {
        Self { stream_id: 0, position: 0, body }
    }

    /// Frame type of the body.
    pub fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    /// Whether this frame takes part in resume position accounting.
    ///
    /// Every frame addressed to a stream is resumable; stream-0 frames are
    /// never buffered or replayed.
    pub fn is_resumable(&self) -> bool {
        self.stream_id != 0
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        self.validate_stream_id()?;

        let mut body = Vec::new();
        self.body.encode_cbor(&mut body)?;
        if body.len() > FrameHeader::MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: FrameHeader::MAX_BODY_SIZE,
            });
        }

        let header = FrameHeader::new(
            self.frame_type(),
            self.stream_id,
            self.position,
            self.body.flags(),
            body.len() as u32,
        );
        dst.reserve(FrameHeader::SIZE + body.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&body);
        Ok(())
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a whole frame; nothing
    /// is consumed in that case. On success the frame's bytes are split off.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < FrameHeader::SIZE {
            return Ok(None);
        }
        let header = FrameHeader::parse(&src[..])?;
        let total = FrameHeader::SIZE + header.body_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let raw = src.split_to(total);
        let frame_type = header.frame_type().ok_or(ProtocolError::UnknownFrameType(raw[3]))?;
        let body = Body::decode(frame_type, header.flags(), &raw[FrameHeader::SIZE..])?;
        let frame = Self { stream_id: header.stream_id(), position: header.position(), body };
        frame.validate_stream_id()?;
        Ok(Some(frame))
    }

    fn validate_stream_id(&self) -> Result<()> {
        let frame_type = self.frame_type();
        let valid = if frame_type.is_connection_level() {
            self.stream_id == 0
        } else if frame_type == FrameType::Error {
            true
        } else {
            self.stream_id != 0
        };
        if valid {
            Ok(())
        } else {
            Err(ProtocolError::InvalidStreamId { frame_type, stream_id: self.stream_id })
        }
    }
}

fn to_cbor<T: Serialize>(value: &T, out: &mut Vec<u8>) -> Result<()> {
    ciborium::ser::into_writer(value, out).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

fn from_cbor<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;
    use crate::ErrorCode;

    fn roundtrip(frame: &Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decode must consume exactly one frame");
        decoded
    }

    #[test]
    fn flags_carry_booleans_across_the_wire() {
        let setup = Frame::connection(Body::Setup(Setup {
            keepalive_interval_ms: 20_000,
            max_lifetime_ms: 90_000,
            lease: true,
            resume_token: Some(Bytes::from_static(b"0123456789abcdef")),
            data_mime: "application/json".into(),
            metadata_mime: "text/plain".into(),
            payload: Payload::new("Client-123"),
        }));
        assert_eq!(roundtrip(&setup), setup);

        let done = Frame { stream_id: 5, position: 9, body: Body::Payload { data: None, complete: true } };
        assert_eq!(roundtrip(&done), done);

        let keepalive = Frame::connection(Body::Keepalive(Keepalive {
            respond: true,
            last_received_position: 42,
        }));
        assert_eq!(roundtrip(&keepalive), keepalive);
    }

    #[test]
    fn partial_input_needs_more_bytes() {
        let frame = Frame { stream_id: 1, position: 1, body: Body::RequestN(8) };
        let mut full = BytesMut::new();
        frame.encode(&mut full).unwrap();

        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert_eq!(Frame::decode(&mut partial).unwrap(), None);
            assert_eq!(partial.len(), cut, "incomplete input must not be consumed");
        }
    }

    #[test]
    fn two_frames_back_to_back() {
        let first = Frame { stream_id: 1, position: 1, body: Body::Cancel };
        let second = Frame::connection(Body::Error(ErrorBody::new(
            ErrorCode::ConnectionClose,
            "bye",
        )));
        let mut buf = BytesMut::new();
        first.encode(&mut buf).unwrap();
        second.encode(&mut buf).unwrap();

        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(first));
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(second));
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn connection_frames_must_use_stream_zero() {
        let bad = Frame { stream_id: 3, position: 0, body: Body::Lease(Lease { time_to_live_ms: 1, count: 1 }) };
        let mut buf = BytesMut::new();
        assert!(matches!(bad.encode(&mut buf), Err(ProtocolError::InvalidStreamId { .. })));

        let bad = Frame::connection(Body::Cancel);
        assert!(matches!(bad.encode(&mut buf), Err(ProtocolError::InvalidStreamId { .. })));
    }

    #[test]
    fn payload_without_next_or_complete_is_malformed() {
        let header = FrameHeader::new(FrameType::Payload, 1, 1, FrameFlags::empty(), 0);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(Frame::decode(&mut buf), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn zero_request_n_is_malformed() {
        let mut body = Vec::new();
        to_cbor(&0u32, &mut body).unwrap();
        let header = FrameHeader::new(FrameType::RequestN, 1, 1, FrameFlags::empty(), body.len() as u32);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        buf.extend_from_slice(&body);
        assert!(matches!(Frame::decode(&mut buf), Err(ProtocolError::Malformed { .. })));
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut buf = BytesMut::from(&bytes[..]);
            let _ = Frame::decode(&mut buf);
        }

        #[test]
        fn decode_never_panics_behind_valid_header(
            frame_type in 1u8..=0x0E,
            flags in 0u16..0x20,
            body in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let Some(frame_type) = FrameType::from_u8(frame_type) else { return Ok(()) };
            let header = FrameHeader::new(
                frame_type,
                1,
                1,
                FrameFlags::from_bits_truncate(flags),
                body.len() as u32,
            );
            let mut buf = BytesMut::from(&header.to_bytes()[..]);
            buf.extend_from_slice(&body);
            let _ = Frame::decode(&mut buf);
        }
    }
}
