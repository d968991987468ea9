//! Frame type codes.

/// Kind of a frame, as carried in the header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Connection setup, sent once by the client
    Setup = 0x01,
    /// Grant of a request budget to the peer
    Lease = 0x02,
    /// Liveness probe and position acknowledgement
    Keepalive = 0x03,
    /// Request expecting exactly one response
    RequestResponse = 0x04,
    /// Request expecting no response
    RequestFnf = 0x05,
    /// Request expecting a stream of responses
    RequestStream = 0x06,
    /// Bidirectional stream request
    RequestChannel = 0x07,
    /// Additional demand for a stream
    RequestN = 0x08,
    /// Stream cancellation
    Cancel = 0x09,
    /// Data item and/or completion
    Payload = 0x0A,
    /// Stream or connection error
    Error = 0x0B,
    /// Resume an existing session on a new transport
    Resume = 0x0D,
    /// Resume accepted
    ResumeOk = 0x0E,
}

impl FrameType {
    /// Decode a type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Setup),
            0x02 => Some(Self::Lease),
            0x03 => Some(Self::Keepalive),
            0x04 => Some(Self::RequestResponse),
            0x05 => Some(Self::RequestFnf),
            0x06 => Some(Self::RequestStream),
            0x07 => Some(Self::RequestChannel),
            0x08 => Some(Self::RequestN),
            0x09 => Some(Self::Cancel),
            0x0A => Some(Self::Payload),
            0x0B => Some(Self::Error),
            0x0D => Some(Self::Resume),
            0x0E => Some(Self::ResumeOk),
            _ => None,
        }
    }

    /// Type byte for this frame type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Frames that only ever travel on stream 0.
    ///
    /// ERROR is absent: it is valid on both stream 0 and stream ids.
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::Setup | Self::Lease | Self::Keepalive | Self::Resume | Self::ResumeOk
        )
    }

    /// Frames that open a new stream.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestResponse | Self::RequestFnf | Self::RequestStream | Self::RequestChannel
        )
    }
}
