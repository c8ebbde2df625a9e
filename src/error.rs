//! Unified error type.

use thiserror::Error as ThisError;

/// Boxed error produced by an inbound body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by si's fallible operations.
///
/// Malformed query or path values never end up here: those accessors fall
/// back to a default. What does end up here is what a handler has to make a
/// decision about: an unreadable body, a payload that does not decode, or a
/// write the peer never received.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Writing to or flushing the response sink failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The inbound body stream failed while being drained.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL-encoded form body could not be parsed.
    #[error("form: {0}")]
    Form(#[from] serde_urlencoded::de::Error),

    /// The response sink cannot be flushed incrementally, so it cannot carry
    /// an event stream. A 500 has already been written when this is returned.
    #[error("streaming not supported")]
    StreamingUnsupported,

    /// The response sink was handed to an event stream that has since ended.
    #[error("response already closed")]
    ResponseClosed,

    /// The address given to [`Server::bind`](crate::Server::bind) is not a
    /// valid `host:port` pair.
    #[error("invalid address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },
}
