//! Transport abstraction for byte-stream connections.
//!
//! A resumux session runs over one duplex byte stream at a time and survives
//! replacing it. Production uses TCP; tests use turmoil's simulated TCP.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of duplex byte streams.
///
/// A server calls [`Transport::accept`] in a loop; a client calls
/// [`Transport::connect`] once for SETUP and again for every reconnection
/// attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One established connection.
    ///
    /// Frames are written and read as a single ordered byte stream; the
    /// stream is dropped when the transport is lost.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept an incoming connection.
    ///
    /// Blocks until a peer connects and returns the stream with the peer's
    /// address.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Connect to a remote endpoint.
    async fn connect(&self, remote: SocketAddr) -> io::Result<Self::Stream>;
}
