// src/transport/mod.rs

//! Transport implementations.
//!
//! A transport presents a raw bidirectional socket as a message-level
//! contract: an outbound [`Transport::send`] operation plus an inbound
//! sequence of parsed messages (the [`Inbox`]). Higher-level semantics
//! such as request correlation live in [`crate::peer`].
//!
//! The inbound sequence encodes the connection's terminal state:
//!
//! - `Some(Ok(message))` — a parsed inbound frame.
//! - `Some(Err(error))` — the sequence's terminal failure: an abnormal
//!   close, a socket error, or a malformed frame (a single connection
//!   is not expected to tolerate protocol corruption). No further
//!   items follow.
//! - `None` without a prior error — graceful completion (the remote
//!   closed with [`GRACEFUL_CLOSE_CODE`], or the local side closed).
//!
//! The memory transport is always available and serves as the
//! reference implementation of these semantics; the WebSocket
//! transport is behind the `websocket` feature (default on).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{Message, Result};

mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{create_memory_transport, MemorySocket};

/// Close code signalling an intentional, error-free disconnect.
///
/// Any other close code, and any socket-level error, terminates the
/// inbound sequence with failure.
pub const GRACEFUL_CLOSE_CODE: u16 = 4000;

/// Subprotocol token requested during the WebSocket handshake.
///
/// Servers reject connections that do not ask for it; the value is a
/// compatibility contract with other protoo implementations.
pub const WS_SUBPROTOCOL: &str = "protoo";

/// The inbound half of a transport.
pub type Inbox = mpsc::Receiver<Result<Message>>;

/// The outbound half of a transport.
///
/// Implementations own the underlying socket exclusively; consumers
/// never manipulate it directly.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Serialize `message` and write it to the socket.
    ///
    /// Write failures are reported as this operation's error, never
    /// silently dropped.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Close the underlying socket and stop delivering inbound events.
    ///
    /// Idempotent: closing twice has no additional effect.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` is cheap; clones share the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;
