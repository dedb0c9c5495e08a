//! Pending-request bookkeeping for the DAP client.
//!
//! Tracks outstanding requests by `seq` and routes responses to waiting
//! callers via oneshot channels. Every registered request settles exactly
//! once: by its response, by [`Dispatcher::fail_all`], or by cancellation.
use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DapError;
use crate::protocol::Response;

/// Result delivered to a waiting request.
pub type DispatchResult = Result<Value, DapError>;

/// Manages pending requests and routes responses.
pub struct Dispatcher {
    /// Map of request seq to pending response sender.
    pending: HashMap<i64, oneshot::Sender<DispatchResult>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a pending request and return a receiver for the response.
    pub fn register_request(&mut self, seq: i64) -> oneshot::Receiver<DispatchResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);
        rx
    }

    /// How many requests are pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Settle the request `response` answers.
    ///
    /// Returns false for a stray or duplicate response, which is logged and
    /// otherwise ignored.
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(sender) = self.pending.remove(&response.request_seq) else {
            tracing::warn!(
                "received response for unknown request seq: {} ({})",
                response.request_seq,
                response.command
            );
            return false;
        };

        let result = if response.success {
            Ok(response.body.unwrap_or_else(|| Value::Object(Default::default())))
        } else {
            Err(DapError::from_response(
                response.message.as_deref(),
                response.body.as_ref(),
            ))
        };
        // The caller may have stopped waiting.
        let _ = sender.send(result);
        true
    }

    /// Cancel a pending request. Returns true if it was found and canceled.
    pub fn cancel(&mut self, seq: i64) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Reject every pending request with [`DapError::Disposed`].
    pub fn cancel_all(&mut self) {
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(DapError::Disposed));
        }
    }

    /// Reject every pending request with a transport error.
    pub fn fail_all(&mut self, reason: &str) {
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(DapError::Transport(reason.to_string())));
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
