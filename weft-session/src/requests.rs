//! Correlated server→client requests
//!
//! Each outgoing request gets a fresh numeric id and a oneshot slot. A
//! response with a matching id fills the slot; anything else is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use weft_core::ClientCallError;
use weft_types::{RequestId, Response, Value};

type Reply = std::result::Result<Value, ClientCallError>;

pub struct RequestTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    timeout: Duration,
}

/// A registered request waiting for its response.
pub struct PendingRequest {
    pub id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl RequestTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn register(&self) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        PendingRequest { id, rx }
    }

    /// Route a client response. Returns false if nobody was waiting for it.
    pub fn resolve(&self, response: Response) -> bool {
        let id = match &response.id {
            RequestId::Number(n) => *n,
            RequestId::Text(text) => {
                debug!(id = %text, "dropping response with non-numeric id");
                return false;
            }
        };
        let Some(tx) = self.pending.lock().remove(&id) else {
            debug!(id, "dropping unmatched or late response");
            return false;
        };
        let reply = response.into_result().map_err(ClientCallError::Remote);
        // the caller may have given up already
        tx.send(reply).is_ok()
    }

    /// Fail one request without a response.
    pub fn fail(&self, id: u64, error: ClientCallError) {
        if let Some(tx) = self.pending.lock().remove(&id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Fail every outstanding request.
    pub fn fail_all(&self, error: ClientCallError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait for `request`, giving up after the tracker's timeout.
    pub async fn wait(&self, request: PendingRequest) -> Reply {
        match tokio::time::timeout(self.timeout, request.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ClientCallError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request.id);
                Err(ClientCallError::Timeout(self.timeout))
            }
        }
    }
}
