//! Error types for the session layer

use std::time::Duration;

use thiserror::Error;
use weft_core::ClientCallError;

use crate::transport::CloseReason;

/// Failures of a single transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed ({0:?})")]
    Closed(CloseReason),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("transport i/o error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed(_))
    }
}

/// Why a session was never created.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no handshake within {0:?}")]
    Timeout(Duration),

    #[error("transport closed before the handshake")]
    Closed,

    #[error("expected a handshake, got {0}")]
    Unexpected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Unknown, expired or closed session token
    #[error("invalid session token")]
    InvalidToken,
}

/// Why a connection did not end up attached to a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Failure to turn a URL into a page. Fatal to the navigation only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no page for {0:?}")]
    NotFound(String),

    #[error("navigation to {url:?} refused: {reason}")]
    Refused { url: String, reason: String },

    #[error("more than {hops} redirects starting at {url:?}")]
    TooManyRedirects { url: String, hops: usize },
}

/// Failures of the asset and upload services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("unknown asset {0}")]
    UnknownAsset(String),

    #[error("unknown upload {0}")]
    UnknownUpload(String),

    #[error("upload {0} was cancelled")]
    UploadCancelled(String),

    #[error("upload {0} already completed")]
    UploadCompleted(String),
}

/// Failure of [`crate::SessionHandle::verify_layout`].
#[derive(Debug, Error)]
pub enum LayoutCheckError {
    #[error(transparent)]
    Call(#[from] ClientCallError),

    #[error("client sent malformed layout records: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("session is closed")]
    Closed,
}

/// Result type using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;
