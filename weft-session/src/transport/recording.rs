//! In-memory transport for deterministic tests
//!
//! Every sent envelope is appended to a log. Requests whose method has a
//! canned response queued are answered immediately with the request's id,
//! as a client would.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use weft_types::{Envelope, RpcError, Value};

use super::{CloseReason, CloseSignal, Transport};
use crate::error::{Result, TransportError};

pub struct RecordingTransport {
    sent: Mutex<Vec<Envelope>>,
    canned: Mutex<HashMap<String, VecDeque<std::result::Result<Value, RpcError>>>>,
    closes: Mutex<Vec<(u16, String)>>,
    incoming_tx: mpsc::UnboundedSender<Envelope>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    sent_notify: Notify,
    signal: CloseSignal,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            canned: Mutex::new(HashMap::new()),
            closes: Mutex::new(Vec::new()),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            sent_notify: Notify::new(),
            signal: CloseSignal::new(),
        }
    }

    /// Queue a successful answer for the next request with `method`.
    pub fn respond_to(&self, method: &str, result: Value) {
        self.canned
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    /// Queue an error answer for the next request with `method`.
    pub fn fail_with(&self, method: &str, error: RpcError) {
        self.canned
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Deliver `message` as if the client had sent it.
    pub fn push_incoming(&self, message: Envelope) {
        // the receiver lives as long as `self`
        let _ = self.incoming_tx.send(message);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    /// Sent messages with the given method, oldest first.
    pub fn sent_with(&self, method: &str) -> Vec<Envelope> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.method() == Some(method))
            .cloned()
            .collect()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Close frames sent through [`Transport::close`].
    pub fn close_frames(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }

    /// Simulate the network dropping.
    pub fn interrupt(&self) {
        self.signal.fire(CloseReason::Interrupted);
    }

    /// Simulate the client closing on purpose.
    pub fn hang_up(&self) {
        self.signal.fire(CloseReason::Intentional);
    }

    /// Wait until at least `count` messages with `method` have been sent.
    pub async fn wait_for(&self, method: &str, count: usize) -> Vec<Envelope> {
        loop {
            let notified = self.sent_notify.notified();
            let matching = self.sent_with(method);
            if matching.len() >= count {
                return matching;
            }
            notified.await;
        }
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &Envelope) -> Result<()> {
        if let Some(reason) = self.signal.reason() {
            return Err(TransportError::Closed(reason));
        }
        self.sent.lock().push(message.clone());
        if let Envelope::Request(request) = message {
            let canned = self
                .canned
                .lock()
                .get_mut(&request.method)
                .and_then(VecDeque::pop_front);
            match canned {
                Some(Ok(result)) => self.push_incoming(Envelope::response_ok(request.id.clone(), result)),
                Some(Err(error)) => self.push_incoming(Envelope::response_err(request.id.clone(), error)),
                None => {}
            }
        }
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Envelope> {
        let mut incoming = self.incoming_rx.lock().await;
        tokio::select! {
            biased;
            message = incoming.recv() => message.ok_or(TransportError::Closed(CloseReason::Interrupted)),
            reason = self.signal.wait() => Err(TransportError::Closed(reason)),
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
        self.signal.fire(CloseReason::Intentional);
        self.sent_notify.notify_waiters();
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.signal
    }
}
