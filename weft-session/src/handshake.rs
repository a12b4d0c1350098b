//! Initial client handshake
//!
//! The first message on a fresh connection must be `handshake`, carrying the
//! client descriptor. Malformed descriptor fields fall back to defaults and
//! are logged; only a missing or late handshake is fatal.

use std::time::Duration;

use tracing::{debug, warn};
use weft_types::wire::methods;
use weft_types::{ClientDescriptor, DescriptorIssue, Envelope, RequestId, Value};

use crate::error::{HandshakeError, TransportError};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct Handshake {
    pub descriptor: ClientDescriptor,
    pub issues: Vec<DescriptorIssue>,
    /// Set when the client sent the handshake as a request and expects a reply.
    pub request_id: Option<RequestId>,
}

/// Wait for the handshake on `transport`.
pub async fn await_handshake(
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<Handshake, HandshakeError> {
    let message = match tokio::time::timeout(timeout, transport.receive()).await {
        Err(_) => return Err(HandshakeError::Timeout(timeout)),
        Ok(Err(TransportError::Closed(_))) => return Err(HandshakeError::Closed),
        Ok(Err(err)) => return Err(err.into()),
        Ok(Ok(message)) => message,
    };

    let (params, request_id) = match message {
        Envelope::Notification(n) if n.method == methods::HANDSHAKE => (n.params, None),
        Envelope::Request(r) if r.method == methods::HANDSHAKE => (r.params, Some(r.id)),
        Envelope::Notification(n) => return Err(HandshakeError::Unexpected(n.method)),
        Envelope::Request(r) => return Err(HandshakeError::Unexpected(r.method)),
        Envelope::Response(_) => return Err(HandshakeError::Unexpected("a response".into())),
    };

    Ok(read_descriptor(&params, request_id))
}

fn read_descriptor(params: &Value, request_id: Option<RequestId>) -> Handshake {
    let (descriptor, issues) = ClientDescriptor::from_params(params);
    for issue in &issues {
        warn!(field = issue.field, reason = %issue.reason, "handshake field replaced by default");
    }
    debug!(
        locale = %descriptor.locale,
        width = descriptor.window_width,
        height = descriptor.window_height,
        "handshake received"
    );
    Handshake {
        descriptor,
        issues,
        request_id,
    }
}
