//! Bidirectional request/response/notification peer over one
//! persistent transport (the protoo protocol)
//!
//! Either endpoint of a connection can issue a *request* and await the
//! correlated *response*, issue a fire-and-forget *notification*, and
//! simultaneously receive and answer requests/notifications initiated
//! by the remote side — all multiplexed over a single WebSocket
//! connection (or any transport implementing the [`Transport`] trait).
//!
//! The crate is organized around three pieces:
//!
//! - the wire message model ([`Message`] and friends): message shapes,
//!   the text codec, and the structured error types.
//! - the [`transport`] adapters, translating a raw socket's life cycle
//!   into a message-level send/receive contract, including the
//!   graceful-vs-abnormal close distinction (close code 4000 means an
//!   intentional disconnect).
//! - the correlation engine ([`Peer`]): one per connection, tracking
//!   outstanding requests by id and broadcasting unsolicited inbound
//!   events to subscribers.

// Import all sub modules once...
mod error;
mod message;
mod peer;

pub mod transport;

mod macros;

// Re-export main types
pub use error::{Error, Result};
pub use message::{CodedError, Message, Notification, Request, RequestError, Response};
pub use peer::{Peer, PeerEvent};
pub use transport::{Inbox, Transport, TransportPtr};
pub use transport::{GRACEFUL_CLOSE_CODE, WS_SUBPROTOCOL};

pub use transport::{create_memory_transport, MemorySocket};

#[cfg(feature = "websocket")]
pub use transport::websocket::connect as connect_websocket;
