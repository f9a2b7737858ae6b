//! Outbound connections to the destination.
//!
//! The connection layer opens exactly one upstream connection per request
//! through a [`Connector`]. [`TcpConnector`] is the real dialer; tests plug in
//! in-memory streams.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::Destination;

#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, destination: &Destination) -> io::Result<Self::Stream>;
}

/// Dials the destination over TCP, resolving host names through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, destination: &Destination) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect((destination.host(), destination.port())).await?;
        debug!(%destination, local_addr = ?stream.local_addr().ok(), "connected to destination");
        Ok(stream)
    }
}
