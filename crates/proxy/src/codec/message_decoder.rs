//! Framing of one complete HTTP message out of a byte stream.
//!
//! [`MessageDecoder`] is driven by [`tokio_util::codec::FramedRead`]: every
//! time new bytes arrive it decides whether the buffer already holds a whole
//! message. The message is handed out as raw bytes so it can be forwarded
//! verbatim; the parsed head travels alongside for routing decisions.
//!
//! The end of a message is found as follows:
//!
//! - chunked transfer encoding: the buffer ends with the terminal chunk `0\r\n\r\n`
//! - `Content-Length: N`: the buffer holds the head plus exactly N body bytes
//! - neither: whatever the first read returned once the head is complete
//!
//! A response head beyond the header limits is not an error: the bytes
//! buffered so far are handed out unframed, without a parsed head.
//!
//! No timeout is applied; a silent peer keeps the decoder waiting.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::Method;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, trace};

use crate::codec::HeadDecoder;
use crate::protocol::{MessageHead, ParseError, PayloadSize};

/// The terminal chunk that ends a chunked body (without trailers).
pub const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// One framed message: its raw bytes and, when it could be parsed, its head.
#[derive(Debug, Clone)]
pub struct RawMessage {
    head: Option<MessageHead>,
    bytes: Bytes,
    complete: bool,
}

impl RawMessage {
    /// Returns the parsed head, or `None` if the peer closed before the head was complete.
    pub fn head(&self) -> Option<&MessageHead> {
        self.head.as_ref()
    }

    /// Returns the raw bytes of the message exactly as received.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Returns false if the peer closed the stream before the message was fully framed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn into_parts(self) -> (Option<MessageHead>, Bytes) {
        (self.head, self.bytes)
    }
}

#[derive(Debug)]
enum FrameState {
    /// Waiting for a complete head
    Head,
    /// Head parsed, waiting for the body to be delimited
    Body { head: MessageHead, payload_size: PayloadSize },
}

/// A decoder producing one [`RawMessage`] per complete HTTP message.
#[derive(Debug)]
pub struct MessageDecoder {
    head_decoder: HeadDecoder,
    state: FrameState,
}

impl MessageDecoder {
    pub fn new(head_decoder: HeadDecoder) -> Self {
        Self { head_decoder, state: FrameState::Head }
    }

    /// A decoder for the request a client sends to the proxy.
    pub fn request() -> Self {
        Self::new(HeadDecoder::request())
    }

    /// A decoder for the response to a request made with `method`.
    pub fn response_to(method: &Method) -> Self {
        Self::new(HeadDecoder::response_to(method))
    }

    fn take_message(&mut self, src: &mut BytesMut, len: usize, complete: bool) -> RawMessage {
        let head = match std::mem::replace(&mut self.state, FrameState::Head) {
            FrameState::Head => None,
            FrameState::Body { head, .. } => Some(head),
        };
        RawMessage { head, bytes: src.split_to(len).freeze(), complete }
    }
}

impl Decoder for MessageDecoder {
    type Item = RawMessage;
    type Error = ParseError;

    /// Attempts to frame a message from the bytes buffered so far.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` once the buffer holds a complete message
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if the head could not be parsed; a response head over
    ///   the header limits is handed out unframed instead
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let FrameState::Head = self.state {
            match self.head_decoder.parse(src) {
                Ok(Some((head, payload_size))) => {
                    trace!(head_len = head.head_len(), ?payload_size, "framing message");
                    self.state = FrameState::Body { head, payload_size };
                }
                Ok(None) => return Ok(None),
                Err(e @ (ParseError::TooManyHeaders { .. } | ParseError::TooLargeHeader { .. })) if self.head_decoder.is_response() => {
                    debug!(cause = %e, received = src.len(), "response head over limits, relaying unframed");
                    let len = src.len();
                    return Ok(Some(self.take_message(src, len, true)));
                }
                Err(e) => return Err(e),
            }
        }

        let FrameState::Body { head, payload_size } = &self.state else {
            return Ok(None);
        };

        let message_len = match *payload_size {
            PayloadSize::Empty => Some(src.len()),
            PayloadSize::Chunked => {
                let body = src.get(head.head_len()..).unwrap_or_default();
                (body.len() >= CHUNKED_TERMINATOR.len() && body.ends_with(CHUNKED_TERMINATOR)).then_some(src.len())
            }
            PayloadSize::Length(length) => {
                let total = head.head_len().saturating_add(usize::try_from(length).unwrap_or(usize::MAX));
                (src.len() >= total).then_some(total)
            }
        };

        Ok(message_len.map(|len| self.take_message(src, len, true)))
    }

    /// Hands out whatever was received when the peer closes mid-message.
    ///
    /// A peer closing early is a normal termination, not an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        if src.is_empty() {
            return Ok(None);
        }

        debug!(received = src.len(), "peer closed before message was complete");
        let len = src.len();
        Ok(Some(self.take_message(src, len, false)))
    }
}

/// Reads exactly one message from `reader`.
///
/// The read buffer starts at `buffer_size` bytes. Returns `Ok(None)` if the
/// peer closed without sending anything.
///
/// # Errors
///
/// Returns `ParseError` if the head is malformed or the read fails.
pub async fn read_message<R>(reader: R, decoder: MessageDecoder, buffer_size: usize) -> Result<Option<RawMessage>, ParseError>
where
    R: AsyncRead + Unpin,
{
    let (message, _rest) = read_message_with_rest(reader, decoder, buffer_size).await?;
    Ok(message)
}

/// Like [`read_message`], but also returns bytes read past the end of the message.
///
/// The surplus matters for `CONNECT`, where a client may pipeline tunnel
/// bytes right behind the request head.
///
/// # Errors
///
/// Returns `ParseError` if the head is malformed or the read fails.
pub async fn read_message_with_rest<R>(
    reader: R,
    decoder: MessageDecoder,
    buffer_size: usize,
) -> Result<(Option<RawMessage>, Bytes), ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut framed_read = FramedRead::with_capacity(reader, decoder, buffer_size);
    let message = framed_read.next().await.transpose()?;
    let rest = framed_read.read_buffer_mut().split().freeze();
    Ok((message, rest))
}
