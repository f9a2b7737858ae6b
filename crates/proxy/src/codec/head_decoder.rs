//! HTTP head parsing for both requests and responses.
//!
//! [`HeadDecoder`] turns the leading bytes of a message into a [`MessageHead`]
//! and decides how the rest of the message is delimited ([`PayloadSize`]).
//! It never consumes the buffer: the framer needs the raw bytes untouched so
//! they can be forwarded verbatim.
//!
//! # Limits
//!
//! - Requests: at most 64 headers and an 8KB head
//! - Responses: at most 256 headers and a 64KB head
//! - Only HTTP/1.0 and HTTP/1.1
//!
//! Parsing is tolerant of partial input: an incomplete head yields `Ok(None)`
//! so the caller can read more and try again.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use httparse::{Error, Status};
use tracing::trace;

use crate::ensure;
use crate::protocol::{MessageHead, ParseError, PayloadSize, StartLine};

/// Maximum number of headers allowed in a request head
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire request head
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Maximum number of headers allowed in a response head
const MAX_RESPONSE_HEADER_NUM: usize = 256;

/// Maximum size in bytes allowed for the entire response head
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadKind {
    Request,
    /// `bodyless` is set when the response answers a request that never gets a body back (HEAD)
    Response { bodyless: bool },
}

/// Parser for HTTP/1.x message heads, backed by `httparse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadDecoder {
    kind: HeadKind,
}

impl HeadDecoder {
    /// A decoder for the request a client sends to the proxy.
    pub fn request() -> Self {
        Self { kind: HeadKind::Request }
    }

    /// A decoder for a response whose request method is unknown.
    pub fn response() -> Self {
        Self { kind: HeadKind::Response { bodyless: false } }
    }

    /// A decoder for the response to a request made with `method`.
    ///
    /// Responses to `HEAD` carry `Content-Length` without a body, so they are
    /// always framed as [`PayloadSize::Empty`].
    pub fn response_to(method: &Method) -> Self {
        Self { kind: HeadKind::Response { bodyless: method == Method::HEAD } }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, HeadKind::Response { .. })
    }

    /// Largest head, in bytes, this decoder accepts.
    pub fn max_head_bytes(&self) -> usize {
        match self.kind {
            HeadKind::Request => MAX_HEADER_BYTES,
            HeadKind::Response { .. } => MAX_RESPONSE_HEADER_BYTES,
        }
    }

    /// Attempts to parse a message head from the start of `src`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((head, payload_size)))` if a complete head was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if parsing failed
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if:
    /// - The number of headers exceeds the limit for the message kind
    /// - The head size exceeds [`HeadDecoder::max_head_bytes`]
    /// - The HTTP version is not supported
    /// - `Content-Length` is not a valid number
    pub fn parse(&self, src: &[u8]) -> Result<Option<(MessageHead, PayloadSize)>, ParseError> {
        let parsed = match self.kind {
            HeadKind::Request => parse_request(src)?,
            HeadKind::Response { .. } => parse_response(src)?,
        };

        let max_bytes = self.max_head_bytes();
        match parsed {
            Some(head) => {
                trace!(head_len = head.head_len(), "parsed message head");
                ensure!(head.head_len() <= max_bytes, ParseError::too_large_header(head.head_len(), max_bytes));
                let payload_size = self.payload_size(&head)?;
                Ok(Some((head, payload_size)))
            }
            None => {
                ensure!(src.len() <= max_bytes, ParseError::too_large_header(src.len(), max_bytes));
                Ok(None)
            }
        }
    }

    /// Determines how the message body is delimited.
    ///
    /// Chunked wins over `Content-Length` when both are present. Responses
    /// that can never carry a body (1xx, 204, 304, or answers to `HEAD`)
    /// are empty regardless of their headers. A `CONNECT` request ends with
    /// its head: anything behind it already belongs to the tunnel.
    fn payload_size(&self, head: &MessageHead) -> Result<PayloadSize, ParseError> {
        if head.is_connect() {
            return Ok(PayloadSize::Length(0));
        }

        if let HeadKind::Response { bodyless } = self.kind {
            let no_body_status = head
                .status()
                .is_some_and(|s| s.is_informational() || s == StatusCode::NO_CONTENT || s == StatusCode::NOT_MODIFIED);
            if bodyless || no_body_status {
                return Ok(PayloadSize::Empty);
            }
        }

        if head.is_chunked() {
            return Ok(PayloadSize::Chunked);
        }

        match head.headers().get(http::header::CONTENT_LENGTH) {
            None => Ok(PayloadSize::Empty),
            Some(cl_value) => {
                let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

                let length =
                    cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

                Ok(PayloadSize::Length(length))
            }
        }
    }
}

fn parse_request(src: &[u8]) -> Result<Option<MessageHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(src).map_err(|e| map_httparse_error(e, MAX_HEADER_NUM))? {
        Status::Complete(head_len) => head_len,
        Status::Partial => return Ok(None),
    };

    let method = req.method.ok_or(ParseError::InvalidMethod)?;
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
    let target = req.path.ok_or_else(|| ParseError::invalid_header("missing request target"))?.to_string();

    let start_line = StartLine::Request { method, target };
    Ok(Some(MessageHead::new(start_line, to_version(req.version)?, to_header_map(req.headers)?, head_len)))
}

fn parse_response(src: &[u8]) -> Result<Option<MessageHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADER_NUM];
    let mut res = httparse::Response::new(&mut headers);

    let head_len = match res.parse(src).map_err(|e| map_httparse_error(e, MAX_RESPONSE_HEADER_NUM))? {
        Status::Complete(head_len) => head_len,
        Status::Partial => return Ok(None),
    };

    let status = res.code.ok_or(ParseError::InvalidStatus(None))?;
    let status = StatusCode::from_u16(status).map_err(|_| ParseError::InvalidStatus(Some(status)))?;

    let start_line = StartLine::Response { status };
    Ok(Some(MessageHead::new(start_line, to_version(res.version)?, to_header_map(res.headers)?, head_len)))
}

fn map_httparse_error(e: Error, max_num: usize) -> ParseError {
    match e {
        Error::TooManyHeaders => ParseError::too_many_headers(max_num),
        e => ParseError::invalid_header(e.to_string()),
    }
}

fn to_version(version: Option<u8>) -> Result<Version, ParseError> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        // HTTP/2 and HTTP/3 are not proxied
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

fn to_header_map(headers: &[httparse::Header<'_>]) -> Result<HeaderMap, ParseError> {
    let mut header_map = HeaderMap::with_capacity(headers.len());
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value).map_err(|e| ParseError::invalid_header(e.to_string()))?;
        header_map.append(name, value);
    }
    Ok(header_map)
}
