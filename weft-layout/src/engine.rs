//! Shadow layout computation
//!
//! Two passes over the live tree: natural sizes bottom-up, then allocation
//! top-down starting from the viewport. Containers are dispatched on their
//! [`LayoutRole`]; composites pass their whole box to their single child.

use weft_core::{ComponentId, ComponentNode, LayoutRole, Tree};
use weft_types::{LayoutMap, LayoutRecord, Point, Size, Viewport};

/// Text metrics the shadow layout assumes the client uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub char_width: f64,
    pub line_height: f64,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        LayoutMetrics {
            char_width: 8.0,
            line_height: 20.0,
        }
    }
}

/// Attributes that give a leaf its text content, in priority order.
const TEXT_ATTRS: [&str; 4] = ["text", "label", "value", "placeholder"];

#[derive(Debug, Clone, Default)]
pub struct ShadowLayout {
    metrics: LayoutMetrics,
}

impl ShadowLayout {
    pub fn new(metrics: LayoutMetrics) -> Self {
        ShadowLayout { metrics }
    }

    pub fn metrics(&self) -> &LayoutMetrics {
        &self.metrics
    }

    /// Lay out the whole tree inside `viewport`.
    pub fn compute(&self, tree: &Tree, viewport: Viewport) -> LayoutMap {
        let mut map = LayoutMap::new();
        let root = tree.root();
        if tree.get(root).is_err() {
            return map;
        }
        let mut naturals = std::collections::HashMap::new();
        self.measure(tree, root, &mut naturals);
        self.allocate(
            tree,
            root,
            Point::new(0.0, 0.0),
            Size::new(viewport.width, viewport.height),
            &naturals,
            &mut map,
        );
        tracing::trace!(components = map.len(), "shadow layout computed");
        map
    }

    fn measure(
        &self,
        tree: &Tree,
        id: ComponentId,
        naturals: &mut std::collections::HashMap<ComponentId, Size>,
    ) -> Size {
        let Ok(node) = tree.get(id) else {
            return Size::ZERO;
        };
        let children: Vec<Size> = node
            .children()
            .iter()
            .map(|child| self.measure(tree, *child, naturals))
            .collect();

        let size = match node.layout_role() {
            None => children.first().copied().unwrap_or(Size::ZERO),
            Some(role) => {
                let content = match role {
                    LayoutRole::Row => {
                        let spacing = gaps(node, children.len());
                        Size::new(
                            children.iter().map(|s| s.width).sum::<f64>() + spacing,
                            children.iter().map(|s| s.height).fold(0.0, f64::max),
                        )
                    }
                    LayoutRole::Column => {
                        let spacing = gaps(node, children.len());
                        Size::new(
                            children.iter().map(|s| s.width).fold(0.0, f64::max),
                            children.iter().map(|s| s.height).sum::<f64>() + spacing,
                        )
                    }
                    LayoutRole::Stack => Size::new(
                        children.iter().map(|s| s.width).fold(0.0, f64::max),
                        children.iter().map(|s| s.height).fold(0.0, f64::max),
                    ),
                    LayoutRole::Leaf => self.leaf_content(node),
                };
                Size::new(
                    content.width.max(number(node, "min_width")),
                    content.height.max(number(node, "min_height")),
                )
            }
        };
        naturals.insert(id, size);
        size
    }

    fn leaf_content(&self, node: &ComponentNode) -> Size {
        let text = TEXT_ATTRS
            .iter()
            .filter_map(|name| node.attr(name).and_then(|v| v.as_str()))
            .find(|s| !s.is_empty());
        match text {
            Some(text) => Size::new(
                text.chars().count() as f64 * self.metrics.char_width,
                self.metrics.line_height,
            ),
            None if TEXT_ATTRS.iter().any(|name| node.attr(name).is_some()) => {
                Size::new(0.0, self.metrics.line_height)
            }
            None => Size::ZERO,
        }
    }

    fn allocate(
        &self,
        tree: &Tree,
        id: ComponentId,
        position: Point,
        size: Size,
        naturals: &std::collections::HashMap<ComponentId, Size>,
        map: &mut LayoutMap,
    ) {
        let Ok(node) = tree.get(id) else { return };
        let natural = naturals.get(&id).copied().unwrap_or(Size::ZERO);
        map.insert(
            id,
            LayoutRecord {
                natural,
                allocated: size,
                position,
            },
        );

        let children = node.children();
        let child_natural =
            |child: &ComponentId| naturals.get(child).copied().unwrap_or(Size::ZERO);

        match node.layout_role() {
            None => {
                if let Some(child) = children.first() {
                    self.allocate(tree, *child, position, size, naturals, map);
                }
            }
            Some(LayoutRole::Leaf) => {}
            Some(LayoutRole::Stack) => {
                for child in children {
                    let child_size = cross_size(tree, *child, child_natural(child), size);
                    self.allocate(tree, *child, position, child_size, naturals, map);
                }
            }
            Some(role @ (LayoutRole::Row | LayoutRole::Column)) => {
                let horizontal = role == LayoutRole::Row;
                let spacing = number(node, "spacing");
                let main = |s: Size| if horizontal { s.width } else { s.height };
                let grow_attr = if horizontal { "grow_x" } else { "grow_y" };

                let used: f64 = children.iter().map(|c| main(child_natural(c))).sum::<f64>()
                    + gaps(node, children.len());
                let growers = children
                    .iter()
                    .filter(|c| tree.get(**c).is_ok_and(|n| flag(n, grow_attr)))
                    .count();
                let extra = (main(size) - used).max(0.0);
                let share = if growers > 0 {
                    extra / growers as f64
                } else {
                    0.0
                };

                let mut offset = 0.0;
                for child in children {
                    let natural = child_natural(child);
                    let grows = tree.get(*child).is_ok_and(|n| flag(n, grow_attr));
                    let along = main(natural) + if grows { share } else { 0.0 };
                    let across = cross_size(tree, *child, natural, size);
                    let (child_size, child_pos) = if horizontal {
                        (
                            Size::new(along, across.height),
                            Point::new(position.x + offset, position.y),
                        )
                    } else {
                        (
                            Size::new(across.width, along),
                            Point::new(position.x, position.y + offset),
                        )
                    };
                    self.allocate(tree, *child, child_pos, child_size, naturals, map);
                    offset += along + spacing;
                }
            }
        }
    }
}

/// Size of a child given its parent box: growing axes fill it, the others
/// keep the natural size.
fn cross_size(tree: &Tree, child: ComponentId, natural: Size, parent: Size) -> Size {
    let Ok(node) = tree.get(child) else {
        return natural;
    };
    // composites take whatever their parent offers on both axes
    if node.is_composite() {
        return Size::new(
            if grows_through(tree, child, "grow_x") { parent.width } else { natural.width },
            if grows_through(tree, child, "grow_y") { parent.height } else { natural.height },
        );
    }
    Size::new(
        if flag(node, "grow_x") { parent.width } else { natural.width },
        if flag(node, "grow_y") { parent.height } else { natural.height },
    )
}

/// Whether the primitive a chain of composites ends in grows along `attr`.
fn grows_through(tree: &Tree, mut id: ComponentId, attr: &str) -> bool {
    while let Ok(node) = tree.get(id) {
        if !node.is_composite() {
            return flag(node, attr);
        }
        match node.children().first() {
            Some(child) => id = *child,
            None => return false,
        }
    }
    false
}

fn number(node: &ComponentNode, name: &str) -> f64 {
    node.attr(name).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn flag(node: &ComponentNode, name: &str) -> bool {
    node.attr(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn gaps(node: &ComponentNode, count: usize) -> f64 {
    number(node, "spacing") * count.saturating_sub(1) as f64
}
