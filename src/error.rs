use thiserror::Error;

use crate::message::CodedError;

/// Errors surfaced by the peer and its transports.
///
/// All variants are `Clone` because a single connection-level failure
/// cascades to every pending request and to every inbound subscriber.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Frame was not valid JSON, or decoded to something other than an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Frame had no truthy request/response/notification discriminator.
    #[error("unknown message kind")]
    UnknownKind,

    /// A mandatory message field was missing or had the wrong type.
    #[error("missing or invalid `{0}` field")]
    InvalidField(&'static str),

    /// The transport could not be established or terminated abnormally.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection closed while the operation was still outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// A transport-level write failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload could not be converted to JSON.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote side answered a request with a failure response.
    #[error(transparent)]
    Response(#[from] CodedError),
}

/// Result type alias for peer operations.
pub type Result<T> = std::result::Result<T, Error>;
