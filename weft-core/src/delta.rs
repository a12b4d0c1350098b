//! Delta serialization
//!
//! The tree remembers the last state it sent for every component. After a
//! refresh, only components touched since then are re-serialized and
//! compared, and only changed keys go on the wire. Each changed component
//! is sent with empty context entries for its ancestors up to its owning
//! composite so the client can place it.

use std::collections::BTreeMap;

use serde_json::{json, Map};
use weft_types::{wire::methods, ComponentId, Envelope, Value};

use crate::store::Body;
use crate::tree::Tree;

pub(crate) type Snapshot = Map<String, Value>;

pub const TYPE_KEY: &str = "_type_";
pub const KEY_KEY: &str = "_key_";
pub const CHILDREN_KEY: &str = "_children_";
pub const CHILD_KEY: &str = "_child_";

/// Per-component attribute changes produced by one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub states: BTreeMap<ComponentId, Map<String, Value>>,
    pub root: ComponentId,
    /// The client must discard what it has and take `states` as the whole tree.
    pub full: bool,
}

impl Delta {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn to_envelope(&self) -> Envelope {
        let method = if self.full {
            methods::REPLACE_COMPONENT_STATES
        } else {
            methods::UPDATE_COMPONENT_STATES
        };
        let states: Map<String, Value> = self
            .states
            .iter()
            .map(|(id, state)| (id.as_u64().to_string(), Value::Object(state.clone())))
            .collect();
        Envelope::notification(
            method,
            json!({
                "deltaStates": states,
                "rootComponentId": self.root,
            }),
        )
    }
}

impl Tree {
    fn snapshot(&self, id: ComponentId) -> Option<Snapshot> {
        let node = self.store.get(id).ok()?;
        let mut state: Snapshot = node
            .attrs()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        state.insert(TYPE_KEY.into(), Value::from(node.class_name()));
        state.insert(
            KEY_KEY.into(),
            node.key().map(Value::from).unwrap_or(Value::Null),
        );
        match node.body() {
            Body::Composite { child } => {
                state.insert(CHILD_KEY.into(), json!(child));
            }
            Body::Primitive { children, .. } => {
                state.insert(CHILDREN_KEY.into(), json!(children));
            }
        }
        Some(state)
    }

    /// Changes since the last delta, or `None` when the client is up to date.
    pub fn take_delta(&mut self) -> Option<Delta> {
        let touched = std::mem::take(&mut self.touched);
        self.sent.retain(|id, _| self.store.contains(*id));

        let mut states = BTreeMap::new();
        for id in touched {
            let Some(current) = self.snapshot(id) else {
                continue;
            };
            let changes = match self.sent.get(&id) {
                None => current.clone(),
                Some(previous) => diff(previous, &current),
            };
            if !changes.is_empty() {
                states.insert(id, changes);
            }
            self.sent.insert(id, current);
        }
        if states.is_empty() {
            return None;
        }

        let changed: Vec<_> = states.keys().copied().collect();
        for id in changed {
            for ancestor in self.store.ancestors(id) {
                states.entry(ancestor).or_default();
                if self.store.get(ancestor).is_ok_and(|n| n.is_composite()) {
                    break;
                }
            }
        }
        tracing::debug!(components = states.len(), "delta ready");
        Some(Delta {
            states,
            root: self.root,
            full: false,
        })
    }

    /// The whole live tree, for a client that lost track of it.
    pub fn full_state(&mut self) -> Delta {
        self.touched.clear();
        self.sent.clear();
        let mut states = BTreeMap::new();
        for id in self.store.subtree(self.root) {
            if let Some(state) = self.snapshot(id) {
                self.sent.insert(id, state.clone());
                states.insert(id, state);
            }
        }
        Delta {
            states,
            root: self.root,
            full: true,
        }
    }
}

fn diff(previous: &Snapshot, current: &Snapshot) -> Snapshot {
    let mut out = Snapshot::new();
    for (key, value) in current {
        if previous.get(key) != Some(value) {
            out.insert(key.clone(), value.clone());
        }
    }
    for key in previous.keys() {
        if !current.contains_key(key) {
            out.insert(key.clone(), Value::Null);
        }
    }
    out
}
