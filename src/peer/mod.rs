// src/peer/mod.rs

//! The correlation engine.
//!
//! A [`Peer`] multiplexes one transport into many tracked
//! request/response exchanges plus a broadcast sequence of unsolicited
//! inbound events. It is simultaneously a source (subscribe for
//! inbound requests and notifications) and a sink (issue requests and
//! notifications, answer inbound requests) bound to the same
//! transport.
//!
//! # Architecture
//!
//! The peer owns a background receive loop that drains the transport's
//! inbox. Responses are matched against the pending-request table and
//! never surfaced to subscribers; requests and notifications are
//! broadcast as [`PeerEvent`]s. When the inbox terminates the loop
//! emits a single [`PeerEvent::Closed`] and rejects every still
//! pending request.
//!
//! # Concurrency
//!
//! Any number of requests can be in flight at once. The pending table
//! sits behind a mutex, but operations are plain `HashMap`
//! insert/remove so contention is minimal. Request completion order
//! follows response arrival, not issuance order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::macros::log_debug;
use crate::message::{CodedError, Message, Notification, Request, RequestError, Response};
use crate::{Error, Inbox, Result, TransportPtr};

mod pending;

use pending::PendingRequests;

/// Capacity of the inbound broadcast channel. A subscriber that lags
/// further than this behind loses the oldest events
/// (`RecvError::Lagged`), never blocks the receive loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An unsolicited inbound event, or the connection's terminal state.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The remote side issued a request; answer it with
    /// [`Peer::respond`] or [`Peer::respond_error`].
    Request(Request),
    /// The remote side issued a notification; no reply is expected.
    Notification(Notification),
    /// The connection terminated. `error` is `None` for a graceful
    /// close and carries the connection error otherwise. Always the
    /// last event delivered.
    Closed { error: Option<Error> },
}

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The protected state is the pending-request table, a plain map with
/// no invariants spanning multiple fields; the worst outcome of
/// ignoring poison is a dropped response, and connection-level
/// failures are handled by the receive loop anyway.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn to_payload(data: impl Serialize) -> Result<Value> {
    // ---
    serde_json::to_value(data).map_err(|err| Error::Serialization(err.to_string()))
}

/// A bidirectional protocol peer over one transport.
///
/// Cheap to clone (internally `Arc`-backed); clones share the same
/// connection, pending table and event stream.
///
/// # Example
///
/// ```no_run
/// # use protoo_peer::{transport, Peer, PeerEvent, Result};
/// # use serde_json::json;
/// # async fn example() -> Result<()> {
/// let (t, inbox) = transport::websocket::connect("ws://example.org/?peerId=A").await?;
/// let peer = Peer::over_transport(t, inbox);
///
/// let mut events = peer.subscribe();
///
/// let answer = peer.request("join", json!({ "room": "lobby" })).await?;
/// println!("joined: {answer}");
///
/// while let Ok(event) = events.recv().await {
///     match event {
///         PeerEvent::Request(request) => {
///             peer.respond(&request, json!({ "pong": true })).await?;
///         }
///         PeerEvent::Notification(n) => println!("note: {}", n.method),
///         PeerEvent::Closed { error } => {
///             println!("closed: {error:?}");
///             break;
///         }
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    pending: Mutex<PendingRequests>,
    events: broadcast::Sender<PeerEvent>,
    /// Monotonic request id source. Monotonic ids cannot collide among
    /// outstanding requests, and the table dies with the connection so
    /// cross-restart reuse is harmless.
    next_id: AtomicU64,
    /// Set once, by whichever of close()/receive-loop reaches the
    /// terminal state first.
    closed: AtomicBool,

    /// Receive loop handle, kept so the task is not detached silently
    /// and can be joined on shutdown later if needed.
    _rx_task: JoinHandle<()>,
}

impl Inner {
    // ---

    /// Route one inbound message.
    fn handle_message(&self, message: Message) {
        // ---
        // Frames can still trickle in after a local close (the memory
        // transport's inbound channel stays open, and a WebSocket
        // remote may write before it sees our close frame). Closed
        // means closed: the Closed event is the last one delivered.
        if self.closed.load(Ordering::SeqCst) {
            log_debug!("dropping inbound message after close");
            return;
        }

        match message {
            Message::Response(response) => {
                let outcome = match response.result {
                    Ok(data) => Ok(data),
                    Err(coded) => Err(Error::Response(coded)),
                };

                let delivered =
                    lock_ignore_poison(&self.pending).complete(response.id, outcome);

                if !delivered {
                    // A response nobody is waiting for; discard, never fatal.
                    log_debug!("response for unknown request id {}", response.id);
                }
            }
            Message::Request(request) => {
                // No subscribers is fine; the event is simply lost.
                let _ = self.events.send(PeerEvent::Request(request));
            }
            Message::Notification(notification) => {
                let _ = self.events.send(PeerEvent::Notification(notification));
            }
        }
    }

    /// Reach the terminal state: emit the final event and reject every
    /// pending request. Idempotent; only the first caller acts.
    fn terminate(&self, error: Option<Error>) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.events.send(PeerEvent::Closed {
            error: error.clone(),
        });

        let reject_with = error.unwrap_or(Error::ConnectionClosed);
        lock_ignore_poison(&self.pending).reject_all(&reject_with);
    }
}

impl Peer {
    // ---

    /// Create a peer over an already-established transport.
    ///
    /// The peer does not own the connection's establishment; it
    /// receives the transport fully constructed, together with the
    /// inbox carrying its inbound sequence.
    pub fn over_transport(transport: TransportPtr, mut inbox: Inbox) -> Self {
        // ---
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<Inner>| {
            // ---
            let weak = weak.clone();

            // Receive loop: drain the inbox until the connection
            // terminates or the peer itself is dropped.
            let rx_task = tokio::spawn(async move {
                // ---
                loop {
                    match inbox.recv().await {
                        Some(Ok(message)) => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            inner.handle_message(message);
                        }
                        Some(Err(error)) => {
                            // Abnormal termination.
                            if let Some(inner) = weak.upgrade() {
                                inner.terminate(Some(error));
                            }
                            break;
                        }
                        None => {
                            // Graceful completion.
                            if let Some(inner) = weak.upgrade() {
                                inner.terminate(None);
                            }
                            break;
                        }
                    }
                }
            });

            Inner {
                // ---
                transport,
                pending: Mutex::new(PendingRequests::new()),
                events,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                _rx_task: rx_task,
            }
        });

        Self { inner }
    }

    /// Issue a request and await its response.
    ///
    /// The first matching response wins; later responses with the same
    /// id are discarded. There is no built-in timeout: the only other
    /// way this resolves is the connection reaching its terminal
    /// state, which rejects every pending request.
    ///
    /// # Errors
    ///
    /// - [`Error::Response`] if the remote answers with a failure
    ///   response (carrying its code and reason).
    /// - [`Error::ConnectionClosed`] or [`Error::Connection`] if the
    ///   connection terminates before the response arrives.
    /// - [`Error::Transport`] if the send itself fails.
    pub async fn request(&self, method: &str, data: impl Serialize) -> Result<Value> {
        // ---
        let data = to_payload(data)?;

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = lock_ignore_poison(&self.inner.pending).register(id);

        // The connection may have reached its terminal state between
        // the check above and the registration; an entry added after
        // reject_all() would otherwise never resolve.
        if self.inner.closed.load(Ordering::SeqCst) {
            lock_ignore_poison(&self.inner.pending).remove(id);
            return Err(Error::ConnectionClosed);
        }

        let message = Message::Request(Request {
            id,
            method: method.to_owned(),
            data,
        });

        if let Err(err) = self.inner.transport.send(&message).await {
            // Never leave an entry that cannot be resolved.
            lock_ignore_poison(&self.inner.pending).remove(id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without resolution: the peer went away.
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Issue a notification. Fire-and-forget: no correlation, no
    /// reply; fails only on local send failure.
    pub async fn notify(&self, method: &str, data: impl Serialize) -> Result<()> {
        // ---
        let message = Message::Notification(Notification {
            method: method.to_owned(),
            data: to_payload(data)?,
        });
        self.inner.transport.send(&message).await
    }

    /// Answer an inbound request with a success response.
    ///
    /// Valid only for a request previously delivered through
    /// [`subscribe`](Self::subscribe). The peer does no bookkeeping
    /// here: answering the same request twice sends two responses,
    /// which is a caller error.
    pub async fn respond(&self, request: &Request, data: impl Serialize) -> Result<()> {
        // ---
        let message = Message::Response(Response::ok(request.id, to_payload(data)?));
        self.inner.transport.send(&message).await
    }

    /// Answer an inbound request with a failure response carrying the
    /// error's code and reason.
    pub async fn respond_error(&self, error: RequestError) -> Result<()> {
        // ---
        let message = Message::Response(error.into_response());
        self.inner.transport.send(&message).await
    }

    /// Reject an inbound request with `code` and `reason`.
    ///
    /// Convenience over [`respond_error`](Self::respond_error) for the
    /// common case where the request is at hand.
    pub async fn reject(&self, request: &Request, code: i64, reason: &str) -> Result<()> {
        // ---
        let message = Message::Response(Response::err(
            request.id,
            CodedError::new(code, reason),
        ));
        self.inner.transport.send(&message).await
    }

    /// Subscribe to inbound events.
    ///
    /// The stream is live: every subscriber receives the same events,
    /// and subscribing late misses earlier ones. Responses are
    /// consumed internally for correlation and never appear here.
    ///
    /// The receiver composes freely (wrap it in
    /// `tokio_stream::wrappers::BroadcastStream` to filter or map);
    /// sending operations act directly on the transport and are
    /// unaffected by any transformation of a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the connection has reached its terminal state.
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Close the connection gracefully.
    ///
    /// Closes the transport, emits `PeerEvent::Closed { error: None }`
    /// to every subscriber and rejects all pending requests with
    /// [`Error::ConnectionClosed`]. Idempotent.
    pub async fn close(&self) -> Result<()> {
        // ---
        let result = self.inner.transport.close().await;
        self.inner.terminate(None);
        result
    }
}
