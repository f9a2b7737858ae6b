//! Plain HTTP forwarding: one request out, one response back, both verbatim.

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::codec::{MessageDecoder, read_message};
use crate::connection::close;
use crate::connector::Connector;
use crate::protocol::{Destination, ProxyError};

/// Sends `request` to `destination` and relays the framed response to `client`.
///
/// The request bytes are written exactly as the client sent them; headers are
/// never rewritten. The response is framed with [`MessageDecoder`] and written
/// back exactly as the destination sent it. The upstream connection is closed
/// before returning, on success and failure alike.
///
/// # Errors
///
/// - [`ProxyError::Connect`] if the destination is unreachable; nothing is sent to the client
/// - [`ProxyError::Response`] if the response head is malformed
/// - [`ProxyError::Forward`] if writing to either side fails
pub async fn forward<S, C>(
    client: &mut S,
    connector: &C,
    destination: &Destination,
    method: &Method,
    request: Bytes,
    buffer_size: usize,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Connector + ?Sized,
{
    let mut server = connector.connect(destination).await.map_err(|e| ProxyError::connect(destination, e))?;

    let result = exchange(client, &mut server, method, request, buffer_size).await;
    close(&mut server).await;
    result
}

async fn exchange<S, U>(client: &mut S, server: &mut U, method: &Method, request: Bytes, buffer_size: usize) -> Result<(), ProxyError>
where
    S: AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    server.write_all(&request).await.map_err(ProxyError::forward)?;
    server.flush().await.map_err(ProxyError::forward)?;

    let response = read_message(&mut *server, MessageDecoder::response_to(method), buffer_size).await.map_err(ProxyError::response)?;

    let Some(response) = response else {
        debug!("destination closed without responding");
        return Ok(());
    };

    client.write_all(response.bytes()).await.map_err(ProxyError::forward)?;
    client.flush().await.map_err(ProxyError::forward)?;

    info!(
        status = ?response.head().and_then(|head| head.status()),
        request_bytes = request.len(),
        response_bytes = response.bytes().len(),
        complete = response.is_complete(),
        "forwarded request"
    );
    Ok(())
}
