//! Fan one logical stream out to several transports.
//!
//! The primary transport carries the conversation: incoming messages and
//! closure come from it alone. Every outgoing message is also copied to each
//! tee; a failing tee is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weft_types::Envelope;

use super::{CloseSignal, Transport};
use crate::error::Result;

pub struct MultiplexTransport {
    primary: Arc<dyn Transport>,
    tees: Vec<Arc<dyn Transport>>,
}

impl MultiplexTransport {
    pub fn new(primary: Arc<dyn Transport>) -> Self {
        Self {
            primary,
            tees: Vec::new(),
        }
    }

    pub fn with_tee(mut self, tee: Arc<dyn Transport>) -> Self {
        self.tees.push(tee);
        self
    }

    pub fn tee_count(&self) -> usize {
        self.tees.len()
    }
}

#[async_trait]
impl Transport for MultiplexTransport {
    async fn send(&self, message: &Envelope) -> Result<()> {
        self.primary.send(message).await?;
        for (index, tee) in self.tees.iter().enumerate() {
            if let Err(err) = tee.send(message).await {
                debug!(tee = index, ?err, "tee transport rejected message");
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Envelope> {
        self.primary.receive().await
    }

    async fn close(&self, code: u16, reason: &str) {
        self.primary.close(code, reason).await;
        for tee in &self.tees {
            tee.close(code, reason).await;
        }
    }

    fn close_signal(&self) -> &CloseSignal {
        self.primary.close_signal()
    }
}
