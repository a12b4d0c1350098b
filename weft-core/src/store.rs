//! Component store
//!
//! Arena of live components indexed by identity. Parent links are plain ids
//! and are the source of truth for ownership: a component owns exactly the
//! children whose parent link points back at it.

use std::any::TypeId;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use weft_types::{Attrs, ComponentId, Value};

use crate::class::{ClassKind, LayoutRole};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Built by a build function; `child` is its last output.
    Composite { child: Option<ComponentId> },
    /// Owns an ordered child list.
    Primitive {
        role: LayoutRole,
        children: Vec<ComponentId>,
    },
}

impl Body {
    fn for_kind(kind: ClassKind) -> Self {
        match kind {
            ClassKind::Composite => Body::Composite { child: None },
            ClassKind::Primitive(role) => Body::Primitive {
                role,
                children: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentNode {
    pub(crate) id: ComponentId,
    pub(crate) class: String,
    pub(crate) key: Option<String>,
    pub(crate) attrs: Attrs,
    /// Attributes supplied explicitly by the creating build call.
    pub(crate) explicit: BTreeSet<String>,
    /// Attributes changed after construction (live state).
    pub(crate) mutated: BTreeSet<String>,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) body: Body,
}

impl ComponentNode {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, Body::Composite { .. })
    }

    pub fn layout_role(&self) -> Option<LayoutRole> {
        match self.body {
            Body::Primitive { role, .. } => Some(role),
            Body::Composite { .. } => None,
        }
    }

    /// Children in order; a composite has at most one.
    pub fn children(&self) -> &[ComponentId] {
        match &self.body {
            Body::Composite { child } => child.as_slice(),
            Body::Primitive { children, .. } => children,
        }
    }

    pub fn was_mutated(&self, name: &str) -> bool {
        self.mutated.contains(name)
    }

    pub fn was_explicit(&self, name: &str) -> bool {
        self.explicit.contains(name)
    }
}

/// A build failure remembered until the next successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailureInfo {
    pub class: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bookkeeping for a composite's last build.
#[derive(Debug, Clone, Default)]
pub struct BuildRecord {
    pub(crate) root: Option<ComponentId>,
    pub(crate) failure: Option<BuildFailureInfo>,
    pub(crate) builds: u64,
    pub(crate) attachment_reads: HashSet<TypeId>,
}

impl BuildRecord {
    pub fn root(&self) -> Option<ComponentId> {
        self.root
    }

    pub fn failure(&self) -> Option<&BuildFailureInfo> {
        self.failure.as_ref()
    }

    pub fn builds(&self) -> u64 {
        self.builds
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Mounted(ComponentId),
    Unmounted {
        id: ComponentId,
        class: String,
        attrs: Attrs,
    },
}

#[derive(Debug, Default)]
pub struct ComponentStore {
    nodes: HashMap<ComponentId, ComponentNode>,
    records: HashMap<ComponentId, BuildRecord>,
    next_id: u64,
    events: Vec<LifecycleEvent>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a component and append it to `parent`.
    pub fn create(
        &mut self,
        class: &str,
        kind: ClassKind,
        attrs: Attrs,
        parent: Option<ComponentId>,
    ) -> Result<ComponentId> {
        if let Some(parent_id) = parent {
            let parent_node = self.get(parent_id)?;
            if let Body::Composite { child: Some(_) } = parent_node.body {
                return Err(CoreError::ChildSlotTaken(parent_id));
            }
        }
        let explicit = attrs.keys().cloned().collect();
        let id = self.insert(class, kind, None, attrs, explicit, parent);
        if let Some(parent_id) = parent {
            if let Ok(parent_node) = self.get_mut(parent_id) {
                match &mut parent_node.body {
                    Body::Composite { child } => *child = Some(id),
                    Body::Primitive { children, .. } => children.push(id),
                }
            }
        }
        Ok(id)
    }

    /// Register a node without linking it into its parent's body.
    pub(crate) fn insert(
        &mut self,
        class: &str,
        kind: ClassKind,
        key: Option<String>,
        attrs: Attrs,
        explicit: BTreeSet<String>,
        parent: Option<ComponentId>,
    ) -> ComponentId {
        self.next_id += 1;
        let id = ComponentId(self.next_id);
        self.nodes.insert(
            id,
            ComponentNode {
                id,
                class: class.to_string(),
                key,
                attrs,
                explicit,
                mutated: BTreeSet::new(),
                parent,
                body: Body::for_kind(kind),
            },
        );
        if kind.is_composite() {
            self.records.insert(id, BuildRecord::default());
        }
        self.events.push(LifecycleEvent::Mounted(id));
        id
    }

    pub fn get(&self, id: ComponentId) -> Result<&ComponentNode> {
        self.nodes.get(&id).ok_or(CoreError::NotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: ComponentId) -> Result<&mut ComponentNode> {
        self.nodes.get_mut(&id).ok_or(CoreError::NotFound(id))
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn record(&self, id: ComponentId) -> Option<&BuildRecord> {
        self.records.get(&id)
    }

    pub(crate) fn record_mut(&mut self, id: ComponentId) -> Option<&mut BuildRecord> {
        self.records.get_mut(&id)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = (ComponentId, &BuildRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// Replace the children of `parent` and point each child back at it.
    pub(crate) fn set_children(&mut self, parent: ComponentId, new_children: Vec<ComponentId>) -> Result<()> {
        for child in &new_children {
            self.get_mut(*child)?.parent = Some(parent);
        }
        let node = self.get_mut(parent)?;
        match &mut node.body {
            Body::Primitive { children, .. } => *children = new_children,
            Body::Composite { child } => {
                if new_children.len() > 1 {
                    return Err(CoreError::ChildSlotTaken(parent));
                }
                *child = new_children.first().copied();
            }
        }
        Ok(())
    }

    /// Detach `id` from its parent and destroy it with everything it owns.
    ///
    /// Nodes are removed first; unmount events are queued afterwards, deepest
    /// first, so no handler can observe a half-removed subtree.
    pub fn destroy(&mut self, id: ComponentId) -> Result<Vec<ComponentId>> {
        let parent = self.get(id)?.parent;
        if let Some(parent_id) = parent {
            if let Ok(parent_node) = self.get_mut(parent_id) {
                match &mut parent_node.body {
                    Body::Composite { child } => {
                        if *child == Some(id) {
                            *child = None;
                        }
                    }
                    Body::Primitive { children, .. } => children.retain(|c| *c != id),
                }
            }
        }

        let order = self.owned_postorder(id);
        let mut removed = Vec::with_capacity(order.len());
        for node_id in &order {
            if let Some(node) = self.nodes.remove(node_id) {
                self.records.remove(node_id);
                removed.push(node);
            }
        }
        let ids = removed.iter().map(|n| n.id).collect();
        for node in removed {
            self.events.push(LifecycleEvent::Unmounted {
                id: node.id,
                class: node.class,
                attrs: node.attrs,
            });
        }
        Ok(ids)
    }

    /// Subtree of `id` in post-order, following only owning links.
    fn owned_postorder(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                out.push(current);
                continue;
            }
            stack.push((current, true));
            if let Some(node) = self.nodes.get(&current) {
                for child in node.children().iter().rev() {
                    let owned = self
                        .nodes
                        .get(child)
                        .is_some_and(|c| c.parent == Some(current));
                    if owned {
                        stack.push((*child, false));
                    }
                }
            }
        }
        out
    }

    /// Subtree of `id` in pre-order.
    pub fn subtree(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current);
                stack.extend(node.children().iter().rev().copied());
            }
        }
        out
    }

    pub fn ancestors(&self, id: ComponentId) -> Ancestors<'_> {
        Ancestors {
            store: self,
            next: self.nodes.get(&id).and_then(|n| n.parent),
        }
    }

    pub fn depth(&self, id: ComponentId) -> usize {
        self.ancestors(id).count()
    }

    /// Closest strict ancestor with a build function.
    pub fn nearest_composite_ancestor(&self, id: ComponentId) -> Option<ComponentId> {
        self.ancestors(id)
            .find(|a| self.nodes.get(a).is_some_and(ComponentNode::is_composite))
    }

    pub fn take_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }
}

pub struct Ancestors<'a> {
    store: &'a ComponentStore,
    next: Option<ComponentId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ComponentId;

    fn next(&mut self) -> Option<ComponentId> {
        let current = self.next?;
        self.next = self.store.nodes.get(&current).and_then(|n| n.parent);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attrs {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn column() -> ClassKind {
        ClassKind::Primitive(LayoutRole::Column)
    }

    fn leaf() -> ClassKind {
        ClassKind::Primitive(LayoutRole::Leaf)
    }

    #[test]
    fn test_create_and_get() {
        let mut store = ComponentStore::new();
        let root = store.create("Column", column(), Attrs::new(), None).unwrap();
        let a = store
            .create("Text", leaf(), attrs(&[("text", json!("a"))]), Some(root))
            .unwrap();
        let b = store.create("Text", leaf(), Attrs::new(), Some(root)).unwrap();

        assert_ne!(a, b);
        assert_eq!(store.get(root).unwrap().children(), &[a, b]);
        assert_eq!(store.get(a).unwrap().parent(), Some(root));
        assert_eq!(store.get(a).unwrap().attr("text"), Some(&json!("a")));
        assert!(store.get(a).unwrap().was_explicit("text"));
        assert_eq!(store.depth(a), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = ComponentStore::new();
        assert_eq!(
            store.get(ComponentId(99)).err(),
            Some(CoreError::NotFound(ComponentId(99)))
        );
    }

    #[test]
    fn test_create_under_missing_parent_fails() {
        let mut store = ComponentStore::new();
        let err = store
            .create("Text", leaf(), Attrs::new(), Some(ComponentId(5)))
            .unwrap_err();
        assert_eq!(err, CoreError::NotFound(ComponentId(5)));
    }

    #[test]
    fn test_destroy_detaches_then_unmounts_bottom_up() {
        let mut store = ComponentStore::new();
        let root = store.create("Column", column(), Attrs::new(), None).unwrap();
        let row = store.create("Row", ClassKind::Primitive(LayoutRole::Row), Attrs::new(), Some(root)).unwrap();
        let leaf_a = store.create("Text", leaf(), Attrs::new(), Some(row)).unwrap();
        let leaf_b = store.create("Text", leaf(), Attrs::new(), Some(row)).unwrap();
        store.take_events();

        let removed = store.destroy(row).unwrap();
        assert_eq!(removed, vec![leaf_a, leaf_b, row]);
        assert!(store.get(root).unwrap().children().is_empty());
        assert!(store.get(leaf_a).is_err());

        let unmounted: Vec<_> = store
            .take_events()
            .into_iter()
            .map(|e| match e {
                LifecycleEvent::Unmounted { id, .. } => id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(unmounted, vec![leaf_a, leaf_b, row]);
    }

    #[test]
    fn test_destroy_skips_children_owned_elsewhere() {
        let mut store = ComponentStore::new();
        let root = store.create("Column", column(), Attrs::new(), None).unwrap();
        let old_parent = store.create("Column", column(), Attrs::new(), Some(root)).unwrap();
        let moved = store.create("Text", leaf(), Attrs::new(), Some(old_parent)).unwrap();

        // moved now belongs to root; old_parent's list is stale
        store.set_children(root, vec![old_parent, moved]).unwrap();
        store.destroy(old_parent).unwrap();

        assert!(store.contains(moved));
        assert_eq!(store.get(root).unwrap().children(), &[moved]);
    }

    #[test]
    fn test_nearest_composite_ancestor() {
        let mut store = ComponentStore::new();
        let host = store.create("Page", ClassKind::Composite, Attrs::new(), None).unwrap();
        let col = store.create("Column", column(), Attrs::new(), Some(host)).unwrap();
        let text = store.create("Text", leaf(), Attrs::new(), Some(col)).unwrap();

        assert_eq!(store.nearest_composite_ancestor(text), Some(host));
        assert_eq!(store.nearest_composite_ancestor(host), None);
        assert_eq!(store.ancestors(text).collect::<Vec<_>>(), vec![col, host]);
        assert!(store.record(host).is_some());
        assert_eq!(store.subtree(host), vec![host, col, text]);
    }
}
