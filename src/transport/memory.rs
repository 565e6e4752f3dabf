// src/transport/memory.rs

//! In-memory transport implementation.
//!
//! Simulates the remote end of a connection entirely within the
//! process. It is the **reference implementation** of transport
//! semantics: other transports are expected to approximate this
//! behavior as closely as their underlying sockets allow.
//!
//! Frames still cross the codec in both directions — `send()` writes
//! serialized text onto the in-process wire, and [`MemorySocket`]
//! delivers raw text through [`Message::parse`] — so tests exercise
//! the same paths a network transport would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{Error, Inbox, Message, Result, Transport, TransportPtr};

struct MemoryTransport {
    // ---
    /// Serialized frames written by the local peer.
    wire: mpsc::Sender<String>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    async fn send(&self, message: &Message) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        self.wire
            .send(message.serialize())
            .await
            .map_err(|_| Error::Transport("in-memory wire closed".into()))
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The remote end of an in-memory connection.
///
/// Tests drive the connection through this handle: read the frames the
/// peer wrote from [`wire`](MemorySocket::wire), inject inbound frames
/// with [`deliver`](MemorySocket::deliver), and terminate with
/// [`close`](MemorySocket::close) (graceful) or
/// [`fail`](MemorySocket::fail) (abnormal).
pub struct MemorySocket {
    /// Raw serialized frames written by the local peer, in send order.
    pub wire: mpsc::Receiver<String>,
    inbound: mpsc::Sender<Result<Message>>,
}

impl MemorySocket {
    // ---
    /// Deliver a raw inbound frame, running it through the codec
    /// exactly as a network transport would.
    pub async fn deliver_raw(&self, raw: &str) {
        let _ = self.inbound.send(Message::parse(raw)).await;
    }

    /// Deliver a well-formed inbound message.
    pub async fn deliver(&self, message: Message) {
        self.deliver_raw(&message.serialize()).await;
    }

    /// Terminate the connection abnormally with `error`.
    pub async fn fail(self, error: Error) {
        let _ = self.inbound.send(Err(error)).await;
    }

    /// Terminate the connection gracefully (the in-memory equivalent
    /// of a close with [`crate::GRACEFUL_CLOSE_CODE`]).
    pub fn close(self) {}

    /// Read and parse the next frame the peer wrote.
    ///
    /// `None` when the peer's transport has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        let raw = self.wire.recv().await?;
        Some(Message::parse(&raw).expect("peer wrote a malformed frame"))
    }
}

/// Create a connected in-memory transport.
///
/// Returns the local peer's transport and inbox, plus the
/// [`MemorySocket`] standing in for the remote end. Always available;
/// requires no external resources.
pub fn create_memory_transport() -> (TransportPtr, Inbox, MemorySocket) {
    // ---
    let (wire_tx, wire_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    let transport: TransportPtr = Arc::new(MemoryTransport {
        wire: wire_tx,
        closed: AtomicBool::new(false),
    });

    (
        transport,
        inbound_rx,
        MemorySocket {
            wire: wire_rx,
            inbound: inbound_tx,
        },
    )
}
