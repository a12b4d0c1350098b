//! Error types for the component engine

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use weft_types::{ComponentId, RpcError};

/// Engine-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Component unknown or already destroyed
    #[error("component {0} not found")]
    NotFound(ComponentId),

    /// Operation needs a composite component
    #[error("component {0} is not composite")]
    NotComposite(ComponentId),

    /// A composite already holds its single child
    #[error("composite {0} already has a child")]
    ChildSlotTaken(ComponentId),

    /// Element names a class that was never registered
    #[error("unknown component class {0:?}")]
    UnknownClass(String),

    /// Two elements of one build output carry the same key
    #[error("duplicate key {key:?} in build output of {owner}")]
    DuplicateKey { owner: ComponentId, key: String },

    /// Composite elements take attributes only
    #[error("element of composite class {0:?} cannot carry children")]
    UnexpectedChildren(String),

    /// The dirty set kept refilling itself
    #[error("refresh did not converge after {rounds} rounds; still dirty: {pending:?}")]
    RefreshDiverged {
        rounds: usize,
        pending: Vec<ComponentId>,
    },

    #[error("a refresh cycle is already in progress")]
    RefreshInProgress,
}

impl CoreError {
    /// Errors caused by the shape of a build's output rather than engine state.
    pub fn is_invalid_output(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownClass(_)
                | CoreError::DuplicateKey { .. }
                | CoreError::UnexpectedChildren(_)
        )
    }
}

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure raised by user code: build functions, event handlers, hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("invalid build output: {0}")]
    InvalidOutput(String),

    #[error("attribute {name:?}: {reason}")]
    Attribute { name: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl BuildError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        BuildError::Failed(msg.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        BuildError::Panicked(msg)
    }
}

/// Failure of a correlated call to the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientCallError {
    #[error("session is closed")]
    Closed,

    #[error("client is disconnected")]
    Disconnected,

    #[error("client did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("client returned an error: {0}")]
    Remote(RpcError),
}

/// Where a recovered error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Build,
    EventHandler,
    Lifecycle,
    Timer,
    ClientInput,
    Navigation,
    Task,
    Transport,
}

/// An error that was handled without taking the session down.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveredError {
    pub at: DateTime<Utc>,
    pub source: ErrorSource,
    pub component: Option<ComponentId>,
    pub message: String,
}

/// Bounded log of recovered errors, newest last.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    entries: VecDeque<RecoveredError>,
    capacity: usize,
    total: u64,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn record(
        &mut self,
        source: ErrorSource,
        component: Option<ComponentId>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::warn!(?source, component = ?component, %message, "recovered error");
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(RecoveredError {
            at: Utc::now(),
            source,
            component,
            message,
        });
        self.total += 1;
    }

    pub fn recent(&self) -> impl Iterator<Item = &RecoveredError> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&RecoveredError> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Errors recorded since creation, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(256)
    }
}
