//! Contexts handed to user code.
//!
//! Build functions and event handlers never reach global state; everything
//! they can read or change comes through the context they are called with.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use weft_types::{Attrs, ComponentId, Value};

use crate::attachments::Attachments;
use crate::error::{BuildError, ClientCallError, CoreError};
use crate::store::ComponentNode;
use crate::tree::Tree;

/// User interaction reported by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub target: ComponentId,
    pub name: String,
    pub payload: Value,
}

impl ClientEvent {
    pub fn new(target: ComponentId, name: impl Into<String>, payload: Value) -> Self {
        Self {
            target,
            name: name.into(),
            payload,
        }
    }
}

/// Mutation shipped to the session's serving loop and applied between cycles.
pub type TreeUpdate = Box<dyn FnOnce(&mut Tree) + Send>;

/// Background work started by a handler.
pub type Task = Box<dyn FnOnce(Arc<dyn SessionApi>) -> BoxFuture<'static, ()> + Send>;

/// What a background task may do with its session.
pub trait SessionApi: Send + Sync {
    /// Queue `update` for the serving loop. False once the session is gone.
    fn update(&self, update: TreeUpdate) -> bool;

    /// Send a correlated request to the client and wait for its answer.
    fn call_client(
        &self,
        method: &str,
        params: Value,
    ) -> BoxFuture<'static, Result<Value, ClientCallError>>;

    fn notify_client(&self, method: &str, params: Value) -> bool;
}

fn decode_attr<T: DeserializeOwned>(name: &str, value: Option<&Value>) -> Result<T, BuildError> {
    let value = value.ok_or_else(|| BuildError::Attribute {
        name: name.to_string(),
        reason: "missing".to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| BuildError::Attribute {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

pub struct BuildContext<'a> {
    id: ComponentId,
    attrs: &'a Attrs,
    attachments: &'a Attachments,
    state_writes: Vec<(String, Value)>,
    attachment_reads: HashSet<TypeId>,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(id: ComponentId, attrs: &'a Attrs, attachments: &'a Attachments) -> Self {
        Self {
            id,
            attrs,
            attachments,
            state_writes: Vec::new(),
            attachment_reads: HashSet::new(),
        }
    }

    /// The composite being built.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn attr_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, BuildError> {
        decode_attr(name, self.attrs.get(name))
    }

    pub fn str_attr(&self, name: &str) -> &str {
        self.attrs.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Read a session attachment. The build is redone when it is replaced.
    pub fn attachment<T: Any + Send + Sync>(&mut self) -> Option<&'a T> {
        self.attachment_reads.insert(TypeId::of::<T>());
        self.attachments.get::<T>()
    }

    /// Change this component's own state once the build has been reconciled.
    /// A change schedules another build.
    pub fn set_state(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.state_writes.push((name.into(), value.into()));
    }

    pub(crate) fn finish(self) -> (Vec<(String, Value)>, HashSet<TypeId>) {
        (self.state_writes, self.attachment_reads)
    }
}

pub struct EventContext<'a> {
    tree: &'a mut Tree,
    id: ComponentId,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(tree: &'a mut Tree, id: ComponentId) -> Self {
        Self { tree, id }
    }

    /// The component whose handler is running.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.tree.store().get(self.id).ok()?.attr(name)
    }

    pub fn attr_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, BuildError> {
        decode_attr(name, self.attr(name))
    }

    pub fn node(&self, id: ComponentId) -> Result<&ComponentNode, CoreError> {
        self.tree.store().get(id)
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.tree.store().get(self.id).ok()?.parent()
    }

    /// Set one of this component's attributes; returns whether it changed.
    pub fn set_attr(&mut self, name: &str, value: impl Into<Value>) -> Result<bool, BuildError> {
        Ok(self.tree.set_attr(self.id, name, value.into())?)
    }

    pub fn set_attr_of(
        &mut self,
        id: ComponentId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<bool, BuildError> {
        Ok(self.tree.set_attr(id, name, value.into())?)
    }

    pub fn mark_dirty(&mut self, id: ComponentId) -> Result<(), BuildError> {
        Ok(self.tree.mark_dirty(id)?)
    }

    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.tree.attachment::<T>()
    }

    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) {
        self.tree.attach(value);
    }

    /// Start background work; it is cancelled when the session closes.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(Arc<dyn SessionApi>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tree.push_task(Box::new(move |api| Box::pin(task(api))));
    }

    /// Send a notification after the current cycle's delta.
    pub fn notify_client(&mut self, method: &str, params: Value) {
        self.tree.push_outgoing(method, params);
    }

    /// Ask the session to navigate to `url` once the current dispatch is done.
    pub fn navigate(&mut self, url: impl Into<String>) {
        self.tree.push_navigation(url.into());
    }
}
