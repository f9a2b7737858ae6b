//! The listening side of the proxy.
//!
//! [`ProxyServer`] binds a TCP listener whose backlog is `max_clients`, accepts
//! clients and serves each one on its own task. At most `max_clients`
//! connections are served at the same time: a semaphore permit is taken before
//! every accept and released when the connection task ends, so excess clients
//! wait in the backlog instead of being refused.
//!
//! # Example
//!
//! ```no_run
//! use micro_proxy::server::ProxyServer;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = ProxyServer::builder().host("127.0.0.1").port(3000).max_clients(50).build().expect("valid config");
//!     server.start().await
//! }
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, lookup_host};
use tokio::select;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ProxyConfig;
use crate::connection::ProxyConnection;
use crate::connector::{Connector, TcpConnector};
use crate::ensure;

#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ProxyConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn host<H: Into<String>>(mut self, host: H) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.config.max_clients = max_clients;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn agent<A: Into<String>>(mut self, agent: A) -> Self {
        self.config.agent = agent.into();
        self
    }

    /// Replaces every setting at once.
    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ProxyServer, ServerBuildError> {
        let config = self.config;
        ensure!(!config.host.is_empty(), ServerBuildError::EmptyHost);
        ensure!(config.max_clients > 0, ServerBuildError::ZeroMaxClients);
        ensure!(config.buffer_size > 0, ServerBuildError::ZeroBufferSize);
        Ok(ProxyServer { config: Arc::new(config), connector: Arc::new(TcpConnector) })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ServerBuildError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("max clients must be at least 1")]
    ZeroMaxClients,
    #[error("buffer size must be at least 1")]
    ZeroBufferSize,
}

#[derive(Debug)]
pub struct ProxyServer<C = TcpConnector> {
    config: Arc<ProxyConfig>,
    connector: Arc<C>,
}

impl ProxyServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl<C> ProxyServer<C>
where
    C: Connector + 'static,
{
    /// Swaps the way destinations are dialed, keeping the configuration.
    pub fn with_connector<D: Connector>(self, connector: D) -> ProxyServer<D> {
        ProxyServer { config: self.config, connector: Arc::new(connector) }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Binds the listening socket with a backlog of `max_clients`.
    ///
    /// The host is resolved and the first address returned is used.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let config = &self.config;
        let address = lookup_host((config.host.as_str(), config.port)).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{}:{} resolved to no address", config.host, config.port))
        })?;

        let socket = if address.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;

        let backlog = u32::try_from(config.max_clients).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog)?;

        info!(address = %listener.local_addr()?, max_clients = config.max_clients, "proxy listening");
        Ok(listener)
    }

    /// Binds and serves until the process is stopped.
    pub async fn start(self) -> io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await;
        Ok(())
    }

    /// Accepts and serves clients on `listener` until `shutdown` completes.
    ///
    /// Connections already being served keep running after shutdown; only
    /// accepting stops. Accept failures are logged and the loop continues.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_clients));
        tokio::pin!(shutdown);

        loop {
            let permit = select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (tcp_stream, peer) = select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            debug!(%peer, available = permits.available_permits(), "accepted client");

            let connection = ProxyConnection::new(tcp_stream, Arc::clone(&self.connector), Arc::clone(&self.config));
            let span = info_span!("connection", id = %connection.id(), %peer);

            tokio::spawn(
                async move {
                    let _permit = permit;
                    match connection.process().await {
                        Ok(()) => info!("finished process, connection shutdown"),
                        Err(e) => error!(cause = %e, "proxy error, connection shutdown"),
                    }
                }
                .instrument(span),
            );
        }

        info!("stopped accepting clients");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Destination;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    /// A destination that answers every connection with [`RESPONSE`] once the request head arrives.
    async fn upstream() -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 256];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        let read = stream.read(&mut buf).await.unwrap();
                        if read == 0 {
                            return;
                        }
                        head.extend_from_slice(&buf[..read]);
                    }
                    stream.write_all(RESPONSE).await.unwrap();
                });
            }
        });
        (address, handle)
    }

    async fn proxy(max_clients: usize) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
        let server = ProxyServer::builder().host("127.0.0.1").port(0).max_clients(max_clients).build().unwrap();
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));
        (address, stop, handle)
    }

    /// Serves every dial from memory with [`RESPONSE`] and records the destination.
    #[derive(Debug, Default)]
    struct InMemoryConnector {
        dialed: Arc<Mutex<Vec<Destination>>>,
    }

    #[async_trait]
    impl Connector for InMemoryConnector {
        type Stream = DuplexStream;

        async fn connect(&self, destination: &Destination) -> io::Result<Self::Stream> {
            self.dialed.lock().unwrap().push(destination.clone());
            let (stream, mut upstream) = duplex(1024);
            tokio::spawn(async move {
                let mut head = [0u8; 64];
                let _ = upstream.read(&mut head).await;
                let _ = upstream.write_all(RESPONSE).await;
            });
            Ok(stream)
        }
    }

    fn get(upstream: SocketAddr) -> String {
        format!("GET http://{upstream}/ HTTP/1.1\r\nHost: {upstream}\r\nAccept: */*\r\n\r\n")
    }

    #[test]
    fn build_validates_config() {
        assert_eq!(ProxyServer::builder().max_clients(0).build().err(), Some(ServerBuildError::ZeroMaxClients));
        assert_eq!(ProxyServer::builder().buffer_size(0).build().err(), Some(ServerBuildError::ZeroBufferSize));
        assert_eq!(ProxyServer::builder().host("").build().err(), Some(ServerBuildError::EmptyHost));

        let server = ProxyServer::builder().agent("MyProxy").port(8080).build().unwrap();
        assert_eq!(server.config().agent, "MyProxy");
        assert_eq!(server.config().port, 8080);
        assert_eq!(server.config().host, "0.0.0.0");
    }

    #[tokio::test]
    async fn proxies_over_tcp() {
        let (upstream, _upstream_task) = upstream().await;
        let (address, stop, serving) = proxy(4).await;

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(get(upstream).as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(&response[..], RESPONSE);

        stop.send(()).unwrap();
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn custom_connector_dials_destinations() {
        let connector = InMemoryConnector::default();
        let dialed = Arc::clone(&connector.dialed);

        let server = ProxyServer::builder().host("127.0.0.1").port(0).build().unwrap().with_connector(connector);
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(b"GET http://backend.internal:8080/ HTTP/1.1\r\nHost: backend.internal:8080\r\n\r\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(&response[..], RESPONSE);
        assert_eq!(*dialed.lock().unwrap(), vec![Destination::new("backend.internal", 8080)]);

        stop.send(()).unwrap();
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn excess_clients_wait_for_a_free_slot() {
        let (upstream, _upstream_task) = upstream().await;
        let (address, stop, serving) = proxy(1).await;

        // holds the only slot while the proxy waits for its request
        let idle = TcpStream::connect(address).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut waiting = TcpStream::connect(address).await.unwrap();
        waiting.write_all(get(upstream).as_bytes()).await.unwrap();

        let mut first_byte = [0u8; 1];
        assert!(timeout(Duration::from_millis(200), waiting.read(&mut first_byte)).await.is_err());

        drop(idle);

        let mut response = Vec::new();
        timeout(Duration::from_secs(5), waiting.read_to_end(&mut response)).await.unwrap().unwrap();
        assert_eq!(&response[..], RESPONSE);

        stop.send(()).unwrap();
        serving.await.unwrap();
    }
}
