//! Dirty tracking
//!
//! A set of components pending rebuild. Marking is idempotent; draining
//! yields ids in first-marked order so refresh cycles are deterministic.

use std::collections::HashSet;

use weft_types::ComponentId;

#[derive(Debug, Default, Clone)]
pub struct DirtyTracker {
    order: Vec<ComponentId>,
    members: HashSet<ComponentId>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `id` was not already dirty.
    pub fn mark_dirty(&mut self, id: ComponentId) -> bool {
        if self.members.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.members.contains(&id)
    }

    pub fn remove(&mut self, id: ComponentId) -> bool {
        if self.members.remove(&id) {
            self.order.retain(|c| *c != id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.order.iter().copied()
    }

    /// Take every pending id, leaving the set empty.
    pub fn drain(&mut self) -> Vec<ComponentId> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_idempotent() {
        let mut dirty = DirtyTracker::new();
        assert!(dirty.mark_dirty(ComponentId(3)));
        assert!(!dirty.mark_dirty(ComponentId(3)));
        assert_eq!(dirty.len(), 1);
    }

    #[test]
    fn test_drain_keeps_first_marked_order() {
        let mut dirty = DirtyTracker::new();
        for id in [5, 2, 5, 9, 2] {
            dirty.mark_dirty(ComponentId(id));
        }
        assert_eq!(
            dirty.drain(),
            vec![ComponentId(5), ComponentId(2), ComponentId(9)]
        );
        assert!(dirty.is_empty());
        assert!(dirty.mark_dirty(ComponentId(5)));
    }

    #[test]
    fn test_remove() {
        let mut dirty = DirtyTracker::new();
        dirty.mark_dirty(ComponentId(1));
        dirty.mark_dirty(ComponentId(2));
        assert!(dirty.remove(ComponentId(1)));
        assert!(!dirty.contains(ComponentId(1)));
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![ComponentId(2)]);
    }
}
