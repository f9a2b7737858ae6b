//! An asynchronous micro forward HTTP proxy
//!
//! This crate provides a small HTTP/1.x forward proxy built on top of tokio.
//! Clients configure it as their proxy; for each connection it reads one
//! request, finds the destination from the `Host` header and then either:
//!
//! - forwards a plain request and relays the destination's response, both
//!   byte-for-byte, or
//! - answers a `CONNECT` request with `200 Connection established` and relays
//!   opaque bytes in both directions until either side closes.
//!
//! # Features
//!
//! - Message framing by `Content-Length`, chunked terminator or a single read
//! - Bounded concurrency: at most `max_clients` connections served at once
//! - Pluggable upstream dialing through [`connector::Connector`]
//! - Structured logging with `tracing`
//!
//! # Example
//!
//! ```no_run
//! use micro_proxy::server::ProxyServer;
//! use tracing::{error, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let server = ProxyServer::builder().host("127.0.0.1").port(3000).build().expect("valid config");
//!     if let Err(e) = server.start().await {
//!         error!(cause = %e, "proxy stopped");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`server`]: Listener, connection limit and per-connection tasks
//! - [`connection`]: One client connection: dispatch, forwarding and tunneling
//! - [`codec`]: Message head parsing and message framing
//! - [`protocol`]: Message heads, destinations and error types
//! - [`connector`]: Opening upstream connections
//! - [`config`]: Settings and their defaults
//!
//! # Error Handling
//!
//! - [`protocol::ProxyError`]: Everything that can end a proxied connection
//! - [`protocol::ParseError`]: Malformed or oversized message heads
//!
//! # Limitations
//!
//! - One request per client connection, no keep-alive
//! - Requests and responses are buffered whole before being relayed
//! - No timeouts on idle clients or destinations
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod config;
pub mod connection;
pub mod connector;
pub mod protocol;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
