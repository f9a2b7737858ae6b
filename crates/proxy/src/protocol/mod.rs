//! Core protocol types shared by the codec and connection layers.
//!
//! - **Message heads** ([`message`]): the parsed start line and header fields
//!   - [`MessageHead`]: request or response head plus its byte length
//!   - [`PayloadSize`]: how the end of the body is found
//!
//! - **Destinations** ([`destination`]): where a request should be sent
//!   - [`Destination`]: host and port taken from the `Host` header
//!
//! - **Error Handling** ([`error`]):
//!   - [`ProxyError`]: Top-level per-connection error type
//!   - [`ParseError`]: Request parsing errors

mod message;
pub use message::MessageHead;
pub use message::PayloadSize;
pub use message::StartLine;

mod destination;
pub use destination::DEFAULT_HTTP_PORT;
pub use destination::Destination;

mod error;
pub use error::ParseError;
pub use error::ProxyError;
