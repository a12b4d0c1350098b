//! Message transports
//!
//! A session talks to its client through a [`Transport`]: send an envelope,
//! receive the next one, and observe closure without consuming a message.
//! Three implementations live here:
//!
//! - [`WebSocketTransport`]: a live axum WebSocket
//! - [`RecordingTransport`]: an in-memory log with canned responses, for tests
//! - [`MultiplexTransport`]: one primary transport teed into others

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use weft_types::Envelope;

use crate::error::Result;

pub mod multiplex;
pub mod recording;
pub mod websocket;

pub use multiplex::MultiplexTransport;
pub use recording::RecordingTransport;
pub use websocket::WebSocketTransport;

/// Normal closure; the session ends.
pub const CLOSE_NORMAL: u16 = 1000;
/// The presented session token is unknown or expired.
pub const CLOSE_INVALID_SESSION: u16 = 4000;

/// How a transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// One side asked to end the session.
    Intentional,
    /// The connection dropped; the session may be resumed.
    Interrupted,
}

/// One-shot closure latch shared between a transport and its observers.
///
/// The first reason fired wins; later calls are ignored.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Latch `reason`. Returns false if the signal had already fired.
    pub fn fire(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) -> CloseReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // the sender lives in `self`, so this only fails during teardown
            if rx.changed().await.is_err() {
                return CloseReason::Interrupted;
            }
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &Envelope) -> Result<()>;

    /// Next incoming message. Cancel-safe: dropping the future loses nothing.
    async fn receive(&self) -> Result<Envelope>;

    /// Close from our side with a WebSocket-style close code.
    async fn close(&self, code: u16, reason: &str);

    fn close_signal(&self) -> &CloseSignal;

    fn is_closed(&self) -> bool {
        self.close_signal().is_closed()
    }

    async fn closed(&self) -> CloseReason {
        self.close_signal().wait().await
    }
}
