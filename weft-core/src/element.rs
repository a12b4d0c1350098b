//! Element descriptions returned by build functions.
//!
//! An element names a component class and carries only the attributes the
//! build call supplied explicitly. Class defaults are filled in when the
//! element is instantiated, so the reconciler can tell the two apart.

use weft_types::{Attrs, Value};

use crate::class::{builtin, BUILD_FAILURE_CLASS};

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) class: String,
    pub(crate) key: Option<String>,
    pub(crate) attrs: Attrs,
    pub(crate) children: Vec<Element>,
}

impl Element {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            key: None,
            attrs: Attrs::new(),
            children: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn child_elements(&self) -> &[Element] {
        &self.children
    }

    /// Number of elements in this description, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Element::node_count).sum::<usize>()
    }

    pub fn row(children: impl IntoIterator<Item = Element>) -> Self {
        Element::new(builtin::ROW).children(children)
    }

    pub fn column(children: impl IntoIterator<Item = Element>) -> Self {
        Element::new(builtin::COLUMN).children(children)
    }

    pub fn stack(children: impl IntoIterator<Item = Element>) -> Self {
        Element::new(builtin::STACK).children(children)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Element::new(builtin::TEXT).attr("text", text.into())
    }

    pub fn button(label: impl Into<String>) -> Self {
        Element::new(builtin::BUTTON).attr("label", label.into())
    }

    pub fn text_input() -> Self {
        Element::new(builtin::TEXT_INPUT)
    }

    pub fn spacer() -> Self {
        Element::new(builtin::SPACER)
    }

    /// Placeholder shown in place of a composite whose build failed.
    pub(crate) fn build_failure(class: &str, message: &str) -> Self {
        Element::new(BUILD_FAILURE_CLASS)
            .attr("class", class)
            .attr("message", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let el = Element::column([
            Element::text("hello").key("greeting"),
            Element::button("Go").attr("min_width", 80),
        ]);
        assert_eq!(el.class_name(), builtin::COLUMN);
        assert_eq!(el.node_count(), 3);
        assert_eq!(el.child_elements()[0].key_str(), Some("greeting"));
        assert_eq!(el.child_elements()[1].attrs().get("min_width"), Some(&json!(80)));
    }
}
