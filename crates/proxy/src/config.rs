//! Proxy configuration with documented defaults.
//!
//! [`ProxyConfig`] is assembled by [`crate::server::ServerBuilder`] (and, for
//! the binary, from command-line flags). Every connection shares one
//! configuration through an `Arc`.

/// Default bind host: all IPv4 interfaces.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default listen backlog and cap on concurrently served connections.
pub const DEFAULT_MAX_CLIENTS: usize = 50;

/// Default read size, in bytes, for message framing and tunnel relaying.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default value of the `ProxyServer-agent` header sent in the `CONNECT` acknowledgement.
pub const DEFAULT_AGENT: &str = "micro-proxy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Host name or IP address to bind to
    pub host: String,
    /// Port to bind to, `0` picks an ephemeral port
    pub port: u16,
    /// Listen backlog, and the number of connections served at the same time
    pub max_clients: usize,
    /// Bytes read per call while framing messages and relaying tunnels
    pub buffer_size: usize,
    /// Identifies this proxy in the `CONNECT` acknowledgement
    pub agent: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            agent: DEFAULT_AGENT.to_string(),
        }
    }
}
