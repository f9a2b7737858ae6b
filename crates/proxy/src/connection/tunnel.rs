//! `CONNECT` tunnels: acknowledge, then relay opaque bytes both ways.
//!
//! Each direction runs as its own future doing bounded reads and full writes.
//! Both futures are driven by one `select!`, so the first direction to finish
//! (end-of-stream or a fatal error) cancels the other and ends the session.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tracing::{debug, info, trace};

use crate::connection::close;
use crate::connector::Connector;
use crate::protocol::{Destination, ProxyError};

/// Status line of the acknowledgement sent once the upstream connection is open.
pub const CONNECTION_ESTABLISHED: &str = "HTTP/1.1 200 Connection established\r\n";

/// Builds the full acknowledgement: status line, one agent header, blank line.
pub fn connect_ack(agent: &str) -> String {
    format!("{CONNECTION_ESTABLISHED}ProxyServer-agent: {agent}\r\n\r\n")
}

/// Bytes moved through a tunnel, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_server: u64,
    pub server_to_client: u64,
}

/// Which side ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

/// Opens a tunnel from `client` to `destination`.
///
/// `pipelined` holds bytes the client sent behind the `CONNECT` head; they are
/// delivered to the destination before relaying starts.
///
/// # Errors
///
/// - [`ProxyError::Connect`] if the destination is unreachable; no acknowledgement is sent
/// - [`ProxyError::Tunnel`] if a fatal I/O error ends the session
pub async fn tunnel<S, C>(
    client: &mut S,
    connector: &C,
    destination: &Destination,
    pipelined: Bytes,
    agent: &str,
    buffer_size: usize,
) -> Result<TunnelStats, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Connector + ?Sized,
{
    let mut server = connector.connect(destination).await.map_err(|e| ProxyError::connect(destination, e))?;

    let result = acknowledge_and_relay(client, &mut server, pipelined, agent, buffer_size).await;
    close(&mut server).await;

    if let Ok(stats) = &result {
        info!(client_to_server = stats.client_to_server, server_to_client = stats.server_to_client, "tunnel closed");
    }
    result
}

async fn acknowledge_and_relay<S, U>(
    client: &mut S,
    server: &mut U,
    pipelined: Bytes,
    agent: &str,
    buffer_size: usize,
) -> Result<TunnelStats, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    client.write_all(connect_ack(agent).as_bytes()).await.map_err(ProxyError::tunnel)?;
    client.flush().await.map_err(ProxyError::tunnel)?;

    if !pipelined.is_empty() {
        server.write_all(&pipelined).await.map_err(ProxyError::tunnel)?;
    }

    let mut stats = relay(client, server, buffer_size).await?;
    stats.client_to_server += pipelined.len() as u64;
    Ok(stats)
}

/// Relays bytes between `client` and `server` until either side closes.
///
/// Reads are at most `buffer_size` bytes. When one side reaches end-of-stream
/// the other direction is cancelled; closing both streams is left to their
/// owners. Retryable errors are retried in place, see [`is_retryable`].
///
/// # Errors
///
/// Returns [`ProxyError::Tunnel`] on the first fatal I/O error in either direction.
pub async fn relay<A, B>(client: &mut A, server: &mut B, buffer_size: usize) -> Result<TunnelStats, ProxyError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut server_read, mut server_write) = tokio::io::split(server);
    let mut stats = TunnelStats::default();

    let (side, result) = select! {
        result = pump(&mut client_read, &mut server_write, buffer_size, &mut stats.client_to_server) => (Side::Client, result),
        result = pump(&mut server_read, &mut client_write, buffer_size, &mut stats.server_to_client) => (Side::Server, result),
    };

    match result {
        Ok(()) => {
            debug!(?side, "peer closed, tunnel finished");
            Ok(stats)
        }
        Err(e) => {
            debug!(?side, cause = %e, "fatal tunnel error");
            Err(ProxyError::tunnel(e))
        }
    }
}

/// Returns true for conditions that mean "no progress right now" rather than a broken stream.
pub fn is_retryable(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Copies from `reader` to `writer` until `reader` reaches end-of-stream.
async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, transferred: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(e) if is_retryable(&e) => {
                trace!(cause = %e, "retrying tunnel read");
                continue;
            }
            Err(e) => return Err(e),
        };

        write_all(writer, &buf[..read]).await?;
        *transferred += read as u64;
    }
}

async fn write_all<W>(writer: &mut W, mut data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !data.is_empty() {
        match writer.write(data).await {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => data = &data[written..],
            Err(e) if is_retryable(&e) => trace!(cause = %e, "retrying tunnel write"),
            Err(e) => return Err(e),
        }
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{ReadBuf, duplex};

    /// A stream whose reads follow a script of data and errors; writes are discarded.
    #[derive(Debug)]
    struct ScriptedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedStream {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self { reads: reads.into() }
        }
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                Some(Err(e)) => Poll::Ready(Err(e)),
                None => Poll::Ready(Ok(())),
            }
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn ack_is_exact() {
        assert_eq!(connect_ack("MyProxy"), "HTTP/1.1 200 Connection established\r\nProxyServer-agent: MyProxy\r\n\r\n");
    }

    #[test]
    fn classifies_errors() {
        assert!(is_retryable(&io::ErrorKind::WouldBlock.into()));
        assert!(is_retryable(&io::ErrorKind::Interrupted.into()));
        assert!(!is_retryable(&io::ErrorKind::ConnectionReset.into()));
        assert!(!is_retryable(&io::ErrorKind::BrokenPipe.into()));
        assert!(!is_retryable(&io::ErrorKind::ConnectionAborted.into()));
    }

    #[tokio::test]
    async fn relays_both_directions_unchanged() {
        let (mut client, mut proxy_client) = duplex(64);
        let (mut proxy_server, mut server) = duplex(64);

        let relay = tokio::spawn(async move { relay(&mut proxy_client, &mut proxy_server, 16).await });

        let upstream = b"\x16\x03\x01 client hello, longer than one sixteen byte read";
        client.write_all(upstream).await.unwrap();
        let mut received = vec![0u8; upstream.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..], &upstream[..]);

        server.write_all(b"server hello").await.unwrap();
        let mut received = [0u8; 12];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"server hello");

        drop(client);
        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats, TunnelStats { client_to_server: upstream.len() as u64, server_to_client: 12 });

        // the finished relay task dropped its ends, so the destination sees end-of-stream
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn server_close_ends_session() {
        let (mut client, mut proxy_client) = duplex(64);
        let (mut proxy_server, server) = duplex(64);

        drop(server);
        let stats = relay(&mut proxy_client, &mut proxy_server, 16).await.unwrap();
        assert_eq!(stats, TunnelStats::default());
        drop(proxy_client);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut client = ScriptedStream::new(vec![
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"abc".to_vec()),
            Err(io::ErrorKind::WouldBlock.into()),
            Ok(b"def".to_vec()),
        ]);
        let (mut proxy_server, mut server) = duplex(64);

        let stats = relay(&mut client, &mut proxy_server, 16).await.unwrap();
        assert_eq!(stats.client_to_server, 6);
        drop(proxy_server);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(&received[..], b"abcdef");
    }

    #[tokio::test]
    async fn fatal_errors_end_session() {
        let mut client = ScriptedStream::new(vec![Ok(b"abc".to_vec()), Err(io::ErrorKind::ConnectionReset.into())]);
        let (mut proxy_server, _server) = duplex(64);

        let result = relay(&mut client, &mut proxy_server, 16).await;
        assert!(matches!(result, Err(ProxyError::Tunnel { source }) if source.kind() == io::ErrorKind::ConnectionReset));
    }
}
