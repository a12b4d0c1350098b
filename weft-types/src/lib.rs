//! Shared types for weft
//!
//! This crate provides the value types exchanged between the component engine,
//! the session layer and the remote client: component identities, attribute
//! maps, the JSON-RPC envelope, the client handshake descriptor and layout
//! records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod descriptor;
pub mod layout;
pub mod wire;

pub use descriptor::{ClientDescriptor, DescriptorIssue};
pub use layout::{LayoutMap, LayoutRecord, Point, Size, Viewport};
pub use wire::{Envelope, Notification, Request, RequestId, Response, RpcError};

/// Attribute values are plain JSON so they serialize to the wire unchanged.
pub type Value = serde_json::Value;

/// Attribute set of a component, ordered by name for deterministic output.
pub type Attrs = BTreeMap<String, Value>;

/// Component identifier
///
/// Stable for the lifetime of the logical UI element it names, including
/// across reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u64);

impl ComponentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ComponentId {
    fn from(id: u64) -> Self {
        ComponentId(id)
    }
}

impl From<ComponentId> for u64 {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
