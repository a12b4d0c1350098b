//! Weft component engine
//!
//! This crate holds the server-side half of a remote UI: a tree of
//! components whose state lives here while a thin client renders it.
//!
//! # Architecture
//!
//! ```text
//! dirty set → build (composites) → reconcile → delta → wire
//! ```
//!
//! - **Store**: arena of components keyed by [`ComponentId`]. Parent links
//!   are back-pointers only; ownership follows child lists.
//! - **Classes**: every component names a [`ComponentClass`] in a
//!   [`ClassRegistry`]. Composite classes build an [`Element`] description;
//!   primitive classes own their children directly.
//! - **Reconciler**: matches a fresh build output against the previous one,
//!   preserving identities by key or position and merging attributes.
//! - **Refresh**: drains the dirty set in rounds until it stays empty.
//! - **Delta**: serializes only what changed since the client last heard.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weft_core::{ClassRegistry, Composite, Element, Tree};
//!
//! let mut registry = ClassRegistry::with_builtins();
//! registry.register(Composite::new("Hello", |_ctx| Ok(Element::text("hello"))));
//!
//! let mut tree = Tree::new(Arc::new(registry));
//! tree.set_page(Element::new("Hello"));
//! tree.refresh()?;
//! let delta = tree.take_delta();
//! ```

pub mod attachments;
pub mod class;
pub mod context;
pub mod delta;
pub mod dirty;
pub mod element;
pub mod error;
pub mod reconcile;
pub mod refresh;
pub mod store;
pub mod tree;

pub use attachments::Attachments;
pub use class::{
    builtin, ClassKind, ClassRegistry, ComponentClass, Composite, EventFlow, LayoutRole,
    Primitive, BUILD_FAILURE_CLASS, ROOT_CLASS,
};
pub use context::{BuildContext, ClientEvent, EventContext, SessionApi, Task, TreeUpdate};
pub use delta::Delta;
pub use dirty::DirtyTracker;
pub use element::Element;
pub use error::{
    BuildError, ClientCallError, CoreError, ErrorLog, ErrorSource, RecoveredError, Result,
};
pub use reconcile::ReconcileOutcome;
pub use refresh::{CyclePhase, RefreshConfig, RefreshStats};
pub use store::{Body, BuildFailureInfo, BuildRecord, ComponentNode, ComponentStore};
pub use tree::Tree;

pub use weft_types::{Attrs, ComponentId, Value};
