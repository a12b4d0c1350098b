//! Reconciliation
//!
//! Matches a composite's fresh build output against the subtree it produced
//! last time. Matching is scoped to one build output: the walk descends
//! through primitives but stops at nested composites, whose children belong
//! to their own build.
//!
//! A keyed element only ever matches the old node carrying the same key,
//! wherever it sat in the old scope. An unkeyed element only matches the
//! unkeyed old node at its position. A match of the same class keeps its
//! identity; anything else is created fresh and the old node destroyed.

use std::collections::{BTreeSet, HashMap, HashSet};

use weft_types::{Attrs, ComponentId};

use crate::class::ClassRegistry;
use crate::element::Element;
use crate::error::{CoreError, Result};
use crate::store::{Body, ComponentNode, ComponentStore};

/// What one reconciliation did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub root: Option<ComponentId>,
    pub created: Vec<ComponentId>,
    pub reused: Vec<ComponentId>,
    /// Reused components whose attributes differ after the merge.
    pub changed: Vec<ComponentId>,
    pub destroyed: Vec<ComponentId>,
}

/// Check an element tree before it touches the store.
pub fn validate(registry: &ClassRegistry, owner: ComponentId, element: &Element) -> Result<()> {
    let mut keys = HashSet::new();
    validate_element(registry, owner, element, &mut keys)
}

fn validate_element<'e>(
    registry: &ClassRegistry,
    owner: ComponentId,
    element: &'e Element,
    keys: &mut HashSet<&'e str>,
) -> Result<()> {
    let class = registry.get(&element.class)?;
    if class.kind().is_composite() && !element.children.is_empty() {
        return Err(CoreError::UnexpectedChildren(element.class.clone()));
    }
    if let Some(key) = element.key.as_deref() {
        if !keys.insert(key) {
            return Err(CoreError::DuplicateKey {
                owner,
                key: key.to_string(),
            });
        }
    }
    for child in &element.children {
        validate_element(registry, owner, child, keys)?;
    }
    Ok(())
}

/// Reconcile `element` as the new output of composite `owner`.
pub fn reconcile(
    store: &mut ComponentStore,
    registry: &ClassRegistry,
    owner: ComponentId,
    element: Element,
) -> Result<ReconcileOutcome> {
    let old_root = match store.get(owner)?.body() {
        Body::Composite { child } => *child,
        Body::Primitive { .. } => return Err(CoreError::NotComposite(owner)),
    };
    validate(registry, owner, &element)?;

    let old_scope = old_root.map(|root| scope_of(store, root)).unwrap_or_default();
    let old_keyed = old_scope
        .iter()
        .filter_map(|id| {
            let node = store.get(*id).ok()?;
            Some((node.key.clone()?, *id))
        })
        .collect();

    let mut pass = Pass {
        store,
        registry,
        old_keyed,
        used: HashSet::new(),
        outcome: ReconcileOutcome::default(),
    };
    let root = pass.reconcile_node(old_root, element, owner)?;
    pass.store.set_children(owner, vec![root])?;
    pass.outcome.root = Some(root);

    for id in old_scope {
        if pass.used.contains(&id) || !pass.store.contains(id) {
            continue;
        }
        let removed = pass.store.destroy(id)?;
        pass.outcome.destroyed.extend(removed);
    }

    tracing::trace!(
        owner = %owner,
        created = pass.outcome.created.len(),
        reused = pass.outcome.reused.len(),
        destroyed = pass.outcome.destroyed.len(),
        "reconciled build output"
    );
    Ok(pass.outcome)
}

/// Old nodes of one build output: the root and every primitive-owned
/// descendant, stopping below composites.
fn scope_of(store: &ComponentStore, root: ComponentId) -> Vec<ComponentId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Ok(node) = store.get(id) else { continue };
        out.push(id);
        if let Body::Primitive { children, .. } = node.body() {
            stack.extend(children.iter().rev().copied());
        }
    }
    out
}

struct Pass<'a> {
    store: &'a mut ComponentStore,
    registry: &'a ClassRegistry,
    old_keyed: HashMap<String, ComponentId>,
    used: HashSet<ComponentId>,
    outcome: ReconcileOutcome,
}

impl Pass<'_> {
    fn reconcile_node(
        &mut self,
        positional: Option<ComponentId>,
        element: Element,
        parent: ComponentId,
    ) -> Result<ComponentId> {
        let candidate = match element.key.as_deref() {
            Some(key) => self.old_keyed.get(key).copied(),
            None => positional.filter(|id| {
                self.store
                    .get(*id)
                    .is_ok_and(|node| node.key.is_none())
            }),
        };
        let candidate = candidate
            .filter(|id| !self.used.contains(id))
            .filter(|id| {
                self.store
                    .get(*id)
                    .is_ok_and(|node| node.class == element.class)
            });

        let Element {
            class,
            key,
            attrs,
            children,
        } = element;
        let class_def = self.registry.get(&class)?;
        let kind = class_def.kind();

        let id = match candidate {
            Some(id) => {
                self.used.insert(id);
                let node = self.store.get_mut(id)?;
                node.parent = Some(parent);
                if merge_attrs(node, class_def.defaults(), attrs) {
                    self.outcome.changed.push(id);
                }
                self.outcome.reused.push(id);
                id
            }
            None => {
                let explicit: BTreeSet<String> = attrs.keys().cloned().collect();
                let mut initial = class_def.defaults();
                initial.extend(attrs);
                let id = self
                    .store
                    .insert(&class, kind, key, initial, explicit, Some(parent));
                self.used.insert(id);
                self.outcome.created.push(id);
                id
            }
        };

        if !kind.is_composite() {
            let old_children = self.store.get(id)?.children().to_vec();
            let mut new_children = Vec::with_capacity(children.len());
            for (index, child) in children.into_iter().enumerate() {
                let positional = old_children.get(index).copied();
                new_children.push(self.reconcile_node(positional, child, id)?);
            }
            self.store.set_children(id, new_children)?;
        }
        Ok(id)
    }
}

/// Merge a rebuilt element's explicit attributes into a reused node.
///
/// Explicit values win. Otherwise a value mutated since construction is
/// kept, and anything else falls back to the class default or is dropped.
/// Returns whether the attribute set changed.
fn merge_attrs(node: &mut ComponentNode, defaults: Attrs, explicit: Attrs) -> bool {
    let mut next = defaults;
    for name in &node.mutated {
        if explicit.contains_key(name) {
            continue;
        }
        if let Some(value) = node.attrs.get(name) {
            next.insert(name.clone(), value.clone());
        }
    }
    node.mutated.retain(|name| !explicit.contains_key(name));
    node.explicit = explicit.keys().cloned().collect();
    next.extend(explicit);

    let changed = next != node.attrs;
    node.attrs = next;
    changed
}
