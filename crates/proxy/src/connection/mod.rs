//! Proxy connection handling module
//!
//! This module drives one client connection from its request to close.
//!
//! # Components
//!
//! - [`ProxyConnection`]: Owns a client stream and:
//!   - Reads and frames exactly one request
//!   - Resolves the destination from the `Host` header
//!   - Dispatches to [`forward`] or [`tunnel`]
//!   - Closes the client on every exit path
//! - [`forward`]: Plain HTTP request/response relay, bytes passed through untouched
//! - [`tunnel`]: `CONNECT` acknowledgement followed by a bidirectional [`relay`]
//!
//! Every stream is closed exactly once, by whoever opened or accepted it.

mod forward;
mod proxy_connection;
mod tunnel;

pub use forward::forward;
pub use proxy_connection::{ConnectionId, ProxyConnection};
pub use tunnel::{CONNECTION_ESTABLISHED, TunnelStats, connect_ack, is_retryable, relay, tunnel};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Shuts down the write side of `stream`; failures are logged and swallowed.
pub(crate) async fn close<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        debug!(cause = %e, "shutdown failed, peer likely gone");
    }
}
