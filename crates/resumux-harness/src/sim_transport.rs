//! Turmoil-backed transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use resumux_core::transport::Transport;
use turmoil::net::{TcpListener, TcpStream};

/// Simulated TCP transport.
///
/// A server binds with [`SimTransport::bind`]; a client that only connects
/// uses [`SimTransport::client`].
pub struct SimTransport {
    listener: Option<TcpListener>,
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTransport")
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

impl SimTransport {
    /// Bind a listener on the current turmoil host.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener: Some(listener) })
    }

    /// Connect-only transport.
    pub fn client() -> Self {
        Self { listener: None }
    }

    /// Resolve `host:port` inside the simulation and connect.
    pub async fn connect_to(addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not listening"))?;
        listener.accept().await
    }

    async fn connect(&self, remote: SocketAddr) -> io::Result<Self::Stream> {
        TcpStream::connect(remote).await
    }
}
