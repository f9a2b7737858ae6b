//! Resolution of the upstream address from the `Host` header.
//!
//! The destination always comes from `Host`, for plain requests and `CONNECT`
//! alike. An absolute-URI request-target is forwarded untouched but never
//! consulted.

use std::fmt;
use std::str::FromStr;

use crate::ensure;
use crate::protocol::{MessageHead, ParseError};

/// Port used when the `Host` header carries no explicit port.
pub const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Reads the destination from the `Host` header of a request head.
    ///
    /// # Errors
    ///
    /// - [`ParseError::MissingHost`] if the header is absent
    /// - [`ParseError::InvalidHost`] if the value is not `host[:port]`
    pub fn from_head(head: &MessageHead) -> Result<Self, ParseError> {
        let value = head.headers().get(http::header::HOST).ok_or(ParseError::MissingHost)?;
        let value = value.to_str().map_err(|_| ParseError::invalid_host("value can't to_str"))?;
        value.parse()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Destination {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        // bracketed IPv6 literal, e.g. [::1]:8080
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| ParseError::invalid_host(format!("unclosed bracket in {s}")))?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after.strip_prefix(':').ok_or_else(|| ParseError::invalid_host(format!("unexpected {after} after ]")))?;
                    (host, Some(port))
                }
            }
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        ensure!(!host.is_empty(), ParseError::invalid_host("empty host"));

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| ParseError::invalid_host(format!("port {port} is not u16")))?,
            None => DEFAULT_HTTP_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') { write!(f, "[{}]:{}", self.host, self.port) } else { write!(f, "{}:{}", self.host, self.port) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Version};

    use crate::protocol::StartLine;

    fn head_with(headers: HeaderMap) -> MessageHead {
        MessageHead::new(StartLine::Request { method: Method::GET, target: "/".into() }, Version::HTTP_11, headers, 0)
    }

    #[test]
    fn default_port() {
        let destination: Destination = "example.com".parse().unwrap();
        assert_eq!(destination.host(), "example.com");
        assert_eq!(destination.port(), 80);
    }

    #[test]
    fn explicit_port() {
        let destination: Destination = "example.com:443".parse().unwrap();
        assert_eq!(destination, Destination::new("example.com", 443));
        assert_eq!(destination.to_string(), "example.com:443");
    }

    #[test]
    fn ipv6_literal() {
        let destination: Destination = "[::1]:8080".parse().unwrap();
        assert_eq!(destination, Destination::new("::1", 8080));
        assert_eq!(destination.to_string(), "[::1]:8080");

        let destination: Destination = "[fe80::1]".parse().unwrap();
        assert_eq!(destination.port(), 80);
    }

    #[test]
    fn invalid_values() {
        assert!(matches!("example.com:https".parse::<Destination>(), Err(ParseError::InvalidHost { .. })));
        assert!(matches!("example.com:70000".parse::<Destination>(), Err(ParseError::InvalidHost { .. })));
        assert!(matches!(":80".parse::<Destination>(), Err(ParseError::InvalidHost { .. })));
        assert!(matches!("[::1".parse::<Destination>(), Err(ParseError::InvalidHost { .. })));
    }

    #[test]
    fn missing_host_header() {
        let head = head_with(HeaderMap::new());
        let error = Destination::from_head(&head).unwrap_err();
        assert!(matches!(error, ParseError::MissingHost));
        assert_eq!(error.to_string(), "missing Host header");
    }

    #[test]
    fn host_header_lookup_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "127.0.0.1:8080".parse().unwrap());
        let destination = Destination::from_head(&head_with(headers)).unwrap();
        assert_eq!(destination, Destination::new("127.0.0.1", 8080));
    }
}
