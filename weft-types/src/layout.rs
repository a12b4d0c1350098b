//! Layout records produced by the client and by the shadow layout engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ComponentId;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Viewport metrics reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Geometry of one component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutRecord {
    /// Size the component asks for.
    pub natural: Size,
    /// Size the parent actually gave it.
    pub allocated: Size,
    /// Top-left corner, relative to the viewport.
    pub position: Point,
}

/// Layout records keyed by component.
pub type LayoutMap = BTreeMap<ComponentId, LayoutRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_map_uses_string_keys_on_the_wire() {
        let mut map = LayoutMap::new();
        map.insert(
            ComponentId(3),
            LayoutRecord {
                natural: Size::new(10.0, 2.0),
                allocated: Size::new(20.0, 2.0),
                position: Point::new(0.0, 1.5),
            },
        );
        let text = serde_json::to_string(&map).unwrap();
        assert!(text.starts_with(r#"{"3":{"natural""#), "{text}");
        let back: LayoutMap = serde_json::from_str(&text).unwrap();
        assert_eq!(back, map);
    }
}
