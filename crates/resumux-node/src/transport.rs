//! TCP transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use resumux_core::transport::Transport;
use tokio::net::{TcpListener, TcpStream};

/// Plain TCP.
#[derive(Debug)]
pub struct TcpTransport {
    listener: Option<TcpListener>,
}

impl TcpTransport {
    /// Listen on `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Self { listener: Some(listener) })
    }

    /// Connect-only transport.
    pub fn client() -> Self {
        Self { listener: None }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not listening"))?
            .local_addr()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not listening"))?;
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    async fn connect(&self, remote: SocketAddr) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
