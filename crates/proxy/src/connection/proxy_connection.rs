use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::codec::{MessageDecoder, read_message_with_rest};
use crate::config::ProxyConfig;
use crate::connection::{close, forward, tunnel};
use crate::connector::Connector;
use crate::protocol::{Destination, ParseError, ProxyError};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identifier of a client connection, used in log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One proxied client connection, from the first request byte to close.
///
/// `ProxyConnection` reads exactly one request, resolves its destination from
/// the `Host` header and then either forwards it (plain HTTP) or opens a
/// tunnel (`CONNECT`). It owns the client stream; the upstream stream is
/// owned by the forward or tunnel step. Both are closed on every exit path.
///
/// # Type Parameters
///
/// * `S`: The client stream type
/// * `C`: The connector used to reach destinations
pub struct ProxyConnection<S, C: ?Sized> {
    id: ConnectionId,
    client: S,
    connector: Arc<C>,
    config: Arc<ProxyConfig>,
}

impl<S, C> ProxyConnection<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Connector + ?Sized,
{
    pub fn new(client: S, connector: Arc<C>, config: Arc<ProxyConfig>) -> Self {
        Self { id: ConnectionId::next(), client, connector, config }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serves the single request/response exchange of this connection.
    ///
    /// A client that closes before sending anything is a normal termination.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::Request`] if the request is malformed or has no `Host` header
    /// - [`ProxyError::Connect`] if the destination is unreachable
    /// - [`ProxyError::Response`], [`ProxyError::Forward`] or [`ProxyError::Tunnel`]
    ///   if the exchange fails midway
    pub async fn process(mut self) -> Result<(), ProxyError> {
        let result = self.do_process().await;
        close(&mut self.client).await;
        result
    }

    async fn do_process(&mut self) -> Result<(), ProxyError> {
        let buffer_size = self.config.buffer_size;

        let (request, pipelined) = read_message_with_rest(&mut self.client, MessageDecoder::request(), buffer_size).await?;
        let Some(request) = request else {
            debug!("client closed before sending a request");
            return Ok(());
        };

        let (head, raw_request) = request.into_parts();
        let head = head.ok_or_else(|| ParseError::invalid_header("client closed inside the request head"))?;
        let destination = Destination::from_head(&head)?;
        let method = head.method().ok_or(ParseError::InvalidMethod)?;

        info!(%method, uri = head.target(), %destination, "dispatching request");

        if head.is_connect() {
            tunnel(&mut self.client, &*self.connector, &destination, pipelined, &self.config.agent, buffer_size).await?;
        } else {
            forward(&mut self.client, &*self.connector, &destination, method, raw_request, buffer_size).await?;
        }
        Ok(())
    }
}

impl<S, C: ?Sized> fmt::Debug for ProxyConnection<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConnection").field("id", &self.id).field("config", &self.config).finish_non_exhaustive()
    }
}
