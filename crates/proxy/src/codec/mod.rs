//! HTTP codec module for framing proxied messages
//!
//! The proxy forwards bytes, not parsed messages, so the codec only answers
//! two questions: what does the head say, and where does the message end.
//!
//! - [`HeadDecoder`]: parses a request or response head with `httparse`,
//!   tolerating partial input
//! - [`MessageDecoder`]: a [`tokio_util::codec::Decoder`] that frames one
//!   complete message by `Content-Length` or the chunked terminator
//!
//! # Example
//!
//! ```no_run
//! use micro_proxy::codec::{read_message, MessageDecoder};
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = TcpStream::connect("127.0.0.1:3000").await?;
//! if let Some(message) = read_message(&mut stream, MessageDecoder::request(), 8192).await? {
//!     println!("received {} bytes", message.bytes().len());
//! }
//! # Ok(())
//! # }
//! ```

mod head_decoder;
mod message_decoder;

pub use head_decoder::HeadDecoder;
pub use message_decoder::{CHUNKED_TERMINATOR, MessageDecoder, RawMessage, read_message, read_message_with_rest};
