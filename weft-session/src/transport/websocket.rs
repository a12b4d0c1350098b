//! Live transport over an axum WebSocket
//!
//! A reader task decodes text frames into a channel so `receive` stays
//! cancel-safe. A close frame with code 1000 counts as intentional; any
//! other close, or the socket simply going away, as an interruption.

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use weft_types::Envelope;

use super::{CloseReason, CloseSignal, Transport};
use crate::error::{Result, TransportError};

const INCOMING_BUFFER: usize = 64;

pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    incoming: Mutex<mpsc::Receiver<Envelope>>,
    signal: CloseSignal,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, mut stream) = socket.split();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let signal = CloseSignal::new();
        let reader_signal = signal.clone();

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match Envelope::from_text(text.as_str()) {
                        Ok(envelope) => {
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(?err, "dropping undecodable frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = match frame {
                            Some(frame) if frame.code == close_code::NORMAL => {
                                CloseReason::Intentional
                            }
                            _ => CloseReason::Interrupted,
                        };
                        debug!(?reason, "client closed websocket");
                        reader_signal.fire(reason);
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(?err, "websocket read failed");
                        break;
                    }
                }
            }
            reader_signal.fire(CloseReason::Interrupted);
        });

        Self {
            sink: Mutex::new(sink),
            incoming: Mutex::new(rx),
            signal,
            reader,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: &Envelope) -> Result<()> {
        if let Some(reason) = self.signal.reason() {
            return Err(TransportError::Closed(reason));
        }
        let text = message.to_text().map_err(TransportError::Encode)?;
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(Message::Text(text.into())).await {
            self.signal.fire(CloseReason::Interrupted);
            return Err(TransportError::Io(err.to_string()));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Envelope> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            message = incoming.recv() => match message {
                Some(message) => Ok(message),
                None => Err(TransportError::Closed(
                    self.signal.reason().unwrap_or(CloseReason::Interrupted),
                )),
            },
            reason = self.signal.wait() => Err(TransportError::Closed(reason)),
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        self.signal.fire(CloseReason::Intentional);
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(Message::Close(Some(frame))).await {
            debug!(?err, "failed to send close frame");
        }
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.signal
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
