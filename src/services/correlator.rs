use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{DomBridgeError, Result};
use crate::protocol;

struct PendingRequest {
    respond_to: oneshot::Sender<Result<Value>>,
    timeout: JoinHandle<()>,
}

/// Controller-side pending-request table. Every issued id resolves exactly
/// once: whichever of response arrival, timeout expiry, or disconnect wins
/// removes the entry and completes the continuation; the losers find the
/// table empty and do nothing.
pub struct RequestCorrelator {
    timeout: Duration,
    pending: HashMap<String, PendingRequest>,
    expired_tx: mpsc::UnboundedSender<String>,
}

impl RequestCorrelator {
    /// Returns the correlator and the stream of expired ids its timers feed.
    /// The owning loop passes each received id back into [`expire`].
    ///
    /// [`expire`]: RequestCorrelator::expire
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                timeout,
                pending: HashMap::new(),
                expired_tx,
            },
            expired_rx,
        )
    }

    /// Mint a fresh request id and register its continuation with a bound
    /// timeout.
    pub fn issue(&mut self, respond_to: oneshot::Sender<Result<Value>>) -> String {
        let id = protocol::mint_id();
        let expired_tx = self.expired_tx.clone();
        let delay = self.timeout;
        let timer_id = id.clone();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expired_tx.send(timer_id);
        });
        self.pending.insert(
            id.clone(),
            PendingRequest {
                respond_to,
                timeout,
            },
        );
        id
    }

    /// Complete the pending request for a response. Late or duplicate
    /// responses find no entry and are silently ignored.
    pub fn resolve(
        &mut self,
        request_id: &str,
        success: bool,
        data: Option<Value>,
        error: Option<String>,
    ) {
        if success {
            self.complete(request_id, Ok(data.unwrap_or(Value::Null)));
        } else {
            let detail = error.unwrap_or_else(|| "command failed".to_string());
            self.complete(request_id, Err(DomBridgeError::CommandFailed(detail)));
        }
    }

    /// Fail the pending request with a specific error, e.g. when the broker
    /// answers with an error envelope instead of a response.
    pub fn fail(&mut self, request_id: &str, error: DomBridgeError) {
        self.complete(request_id, Err(error));
    }

    /// Fired by the timeout timer. A request resolved in the meantime is
    /// left untouched.
    pub fn expire(&mut self, id: &str) {
        self.complete(id, Err(DomBridgeError::CommandTimeout));
    }

    /// Reject everything still pending, used when the transport drops.
    pub fn abandon_all(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (_, entry) in pending {
            entry.timeout.abort();
            let _ = entry.respond_to.send(Err(DomBridgeError::ConnectionClosed));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn complete(&mut self, id: &str, outcome: Result<Value>) {
        let Some(entry) = self.pending.remove(id) else {
            return;
        };
        entry.timeout.abort();
        let _ = entry.respond_to.send(outcome);
    }
}
