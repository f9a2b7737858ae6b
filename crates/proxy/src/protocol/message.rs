//! Parsed view over the head section of an HTTP/1.x message.
//!
//! The proxy never re-serializes messages: the head is parsed only to learn
//! where the message ends and where the request should go. The raw bytes are
//! what travels on the wire.

use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};

/// The start line of a message, which differs between requests and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: Method, target: String },
    Response { status: StatusCode },
}

/// The parsed head (start line and header fields) of a request or response.
///
/// `head_len` is the number of bytes the head occupies in the buffer it was
/// parsed from, including the blank line terminator. Body bytes start there.
#[derive(Debug, Clone)]
pub struct MessageHead {
    start_line: StartLine,
    version: Version,
    headers: HeaderMap,
    head_len: usize,
}

impl MessageHead {
    pub(crate) fn new(start_line: StartLine, version: Version, headers: HeaderMap, head_len: usize) -> Self {
        Self { start_line, version, headers, head_len }
    }

    /// Returns the request method, or `None` for a response head.
    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Returns the request-target exactly as received, or `None` for a response head.
    pub fn target(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    /// Returns the status code, or `None` for a request head.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.start_line {
            StartLine::Request { .. } => None,
            StartLine::Response { status } => Some(*status),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Header lookups are case-insensitive; the raw bytes keep the sender's casing.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn head_len(&self) -> usize {
        self.head_len
    }

    #[inline]
    pub fn is_connect(&self) -> bool {
        self.method() == Some(&Method::CONNECT)
    }

    /// Returns true if the last coding of `Transfer-Encoding` is `chunked`.
    pub fn is_chunked(&self) -> bool {
        is_chunked(self.headers.get(http::header::TRANSFER_ENCODING))
    }
}

/// Checks if the Transfer-Encoding header indicates chunked encoding.
///
/// According to RFC 7230, chunked must be the last encoding if present.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii().eq_ignore_ascii_case(CHUNKED);
        }
    }
    false
}

/// Represents how the end of a message body is found on the wire.
///
/// - Known length: the body is exactly this many bytes after the head
/// - Chunked: the message ends with the terminal chunk `0\r\n\r\n`
/// - Empty: no framing information, the message is whatever the first read returned
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// No body framing
    Empty,
}

impl PayloadSize {
    /// Returns true if the payload uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}
