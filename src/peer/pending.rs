use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Tracks outstanding requests waiting for responses.
///
/// Maps request ids to oneshot senders. When a matching response
/// arrives the sender delivers the outcome to the future returned by
/// `Peer::request`. Entries never outlive their resolution or the
/// connection's terminal state.
pub(super) struct PendingRequests {
    // ---
    requests: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

impl PendingRequests {
    // ---

    /// Create a new empty table.
    pub fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
        }
    }

    /// Register a pending request.
    ///
    /// Returns the receiver that resolves when the response arrives.
    pub fn register(&mut self, id: u64) -> oneshot::Receiver<Result<Value>> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.requests.insert(id, tx);
        rx
    }

    /// Resolve a pending request with the response outcome.
    ///
    /// Returns true if `id` was outstanding. A response for an unknown
    /// id is not an error; the caller decides whether to log it.
    pub fn complete(&mut self, id: u64, outcome: Result<Value>) -> bool {
        // ---
        if let Some(tx) = self.requests.remove(&id) {
            // Ignore a dropped receiver; the requester gave up.
            let _ = tx.send(outcome);
            true
        } else {
            false
        }
    }

    /// Remove a pending request without resolving it.
    ///
    /// Used when the send itself fails before a response can exist.
    pub fn remove(&mut self, id: u64) -> bool {
        // ---
        self.requests.remove(&id).is_some()
    }

    /// Reject every pending request with clones of `error`.
    ///
    /// Called exactly once, when the connection reaches its terminal
    /// state.
    pub fn reject_all(&mut self, error: &Error) {
        // ---
        for (_, tx) in self.requests.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        // ---
        self.requests.len()
    }
}
