use std::io;
use thiserror::Error;

use crate::protocol::Destination;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request error: {source}")]
    Request {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    Response { source: ParseError },

    #[error("could not connect to {host}:{port}: {source}")]
    Connect { host: String, port: u16, source: io::Error },

    #[error("forward error: {source}")]
    Forward { source: io::Error },

    #[error("tunnel error: {source}")]
    Tunnel { source: io::Error },
}

impl ProxyError {
    pub fn response(source: ParseError) -> Self {
        Self::Response { source }
    }

    pub fn connect(destination: &Destination, source: io::Error) -> Self {
        Self::Connect { host: destination.host().to_string(), port: destination.port(), source }
    }

    pub fn forward<E: Into<io::Error>>(e: E) -> Self {
        Self::Forward { source: e.into() }
    }

    pub fn tunnel<E: Into<io::Error>>(e: E) -> Self {
        Self::Tunnel { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid status code: {0:?}")]
    InvalidStatus(Option<u16>),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("missing Host header")]
    MissingHost,

    #[error("invalid Host header: {reason}")]
    InvalidHost { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_host<S: ToString>(str: S) -> Self {
        Self::InvalidHost { reason: str.to_string() }
    }
}
